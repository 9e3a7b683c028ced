//! A cursor over the piece list exposing byte, codepoint, and grapheme
//! granularity advance, mirroring the distilled interface's `Iterator`.

use unicode_segmentation::GraphemeCursor;

use crate::block::BlockStore;
use crate::piece::{PieceArena, PieceId, HEAD, TAIL};

/// How far (in codepoints) a grapheme-boundary lookup looks around the
/// cursor before falling back to the window edge. Generous enough for
/// every grapheme cluster seen in practice (emoji ZWJ sequences, combining
/// marks) without materializing the whole buffer.
const GRAPHEME_WINDOW_CODEPOINTS: usize = 32;

pub(crate) fn find_piece(arena: &PieceArena, pos: u64) -> (PieceId, u64) {
    let mut node = HEAD;
    let mut cum = 0u64;
    loop {
        let next = arena.next(node);
        if next == TAIL {
            return (TAIL, cum);
        }
        let len = arena.len_of(next);
        if cum + len > pos {
            return (next, cum);
        }
        cum += len;
        node = next;
    }
}

/// A read-only cursor into a buffer's current piece list. Borrows the
/// arena and block store for its lifetime; it does not see edits made
/// through a `&mut Buffer` obtained after the cursor (the borrow checker
/// enforces this).
#[derive(Clone)]
pub struct Cursor<'a> {
    arena: &'a PieceArena,
    blocks: &'a BlockStore,
    size: u64,
    piece: PieceId,
    piece_start: u64,
    pos: u64,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(arena: &'a PieceArena, blocks: &'a BlockStore, size: u64, pos: u64) -> Self {
        let (piece, piece_start) = find_piece(arena, pos);
        Cursor {
            arena,
            blocks,
            size,
            piece,
            piece_start,
            pos,
        }
    }

    pub fn pos(&self) -> u64 {
        self.pos
    }

    /// True iff the cursor sits on a real piece, i.e. not at/after the end
    /// of the buffer.
    pub fn valid(&self) -> bool {
        self.piece != TAIL
    }

    fn seek(&mut self, pos: u64) {
        let (piece, piece_start) = find_piece(self.arena, pos);
        self.piece = piece;
        self.piece_start = piece_start;
        self.pos = pos;
    }

    fn byte_at(&self, pos: u64) -> u8 {
        if pos >= self.size {
            return 0;
        }
        let (piece, piece_start) = if pos == self.pos {
            (self.piece, self.piece_start)
        } else {
            find_piece(self.arena, pos)
        };
        let p = self.arena.piece(piece);
        let off = pos - piece_start;
        self.blocks.bytes(p.block, p.offset + off, 1)[0]
    }

    /// The byte at the cursor, or a synthetic NUL at end-of-buffer.
    pub fn byte_get(&self) -> u8 {
        self.byte_at(self.pos)
    }

    /// Same as `byte_get`, but a `\r` immediately followed by `\n` reads as
    /// `\n`.
    pub fn char_get(&self) -> u8 {
        let b = self.byte_get();
        if b == b'\r' && self.byte_at(self.pos + 1) == b'\n' {
            b'\n'
        } else {
            b
        }
    }

    /// Advances one byte, crossing a piece boundary if necessary. Returns
    /// the new current byte (NUL past the last byte).
    pub fn byte_next(&mut self) -> u8 {
        if self.pos < self.size {
            self.pos += 1;
            if self.piece != TAIL {
                let len = self.arena.len_of(self.piece);
                if self.pos - self.piece_start >= len {
                    self.piece_start += len;
                    self.piece = self.arena.next(self.piece);
                }
            }
        }
        self.byte_get()
    }

    /// Retreats one byte. Returns the new current byte.
    pub fn byte_prev(&mut self) -> u8 {
        if self.pos > 0 {
            self.pos -= 1;
            if self.piece == TAIL || self.pos < self.piece_start {
                self.piece = self.arena.prev(self.piece);
                self.piece_start -= self.arena.len_of(self.piece);
            }
        }
        self.byte_get()
    }

    fn codepoint_len_at(&self, pos: u64) -> u64 {
        if pos >= self.size {
            return 0;
        }
        let b = self.byte_at(pos);
        if b & 0x80 == 0 {
            1
        } else if b & 0xE0 == 0xC0 {
            2
        } else if b & 0xF0 == 0xE0 {
            3
        } else if b & 0xF8 == 0xF0 {
            4
        } else {
            // Continuation byte out of context (shouldn't happen on a
            // well-formed buffer); treat as a single byte to stay in sync.
            1
        }
    }

    /// Advances past one UTF-8 codepoint. Returns the first byte of the
    /// new codepoint (NUL at end-of-buffer).
    pub fn codepoint_next(&mut self) -> u8 {
        let len = self.codepoint_len_at(self.pos);
        let target = self.pos + len.max(1);
        self.seek(target.min(self.size));
        self.byte_get()
    }

    /// Retreats to the start of the preceding UTF-8 codepoint.
    pub fn codepoint_prev(&mut self) -> u8 {
        let mut p = self.pos;
        if p == 0 {
            return self.byte_get();
        }
        p -= 1;
        while p > 0 && self.byte_at(p) & 0xC0 == 0x80 {
            p -= 1;
        }
        self.seek(p);
        self.byte_get()
    }

    fn collect_range(&self, start: u64, end: u64) -> Vec<u8> {
        let mut out = Vec::with_capacity((end - start) as usize);
        let (mut node, mut node_start) = find_piece(self.arena, start);
        let mut pos = start;
        while pos < end && node != TAIL {
            let piece = self.arena.piece(node);
            let piece_end = node_start + piece.len;
            let take_end = piece_end.min(end);
            let off = piece.offset + (pos - node_start);
            let len = take_end - pos;
            out.extend_from_slice(self.blocks.bytes(piece.block, off, len));
            pos = take_end;
            node_start = piece_end;
            node = self.arena.next(node);
        }
        out
    }

    fn codepoint_window(&self, pos: u64) -> (u64, u64) {
        let mut start = pos;
        for _ in 0..GRAPHEME_WINDOW_CODEPOINTS {
            if start == 0 {
                break;
            }
            let mut back = start - 1;
            while back > 0 && self.byte_at(back) & 0xC0 == 0x80 {
                back -= 1;
            }
            start = back;
        }
        let mut end = pos;
        for _ in 0..GRAPHEME_WINDOW_CODEPOINTS {
            if end >= self.size {
                break;
            }
            end += self.codepoint_len_at(end).max(1);
        }
        (start, end.min(self.size))
    }

    /// Advances past one grapheme cluster using `unicode-segmentation`'s
    /// boundary algorithm over a bounded window of codepoints around the
    /// cursor.
    pub fn char_next(&mut self) -> u8 {
        if self.pos >= self.size {
            return self.byte_get();
        }
        let (win_start, win_end) = self.codepoint_window(self.pos);
        let bytes = self.collect_range(win_start, win_end);
        let s = std::str::from_utf8(&bytes).unwrap_or("");
        let local = (self.pos - win_start) as usize;
        let mut gc = GraphemeCursor::new(local, s.len(), true);
        let boundary = gc.next_boundary(s, 0).ok().flatten().unwrap_or(s.len());
        self.seek(win_start + boundary as u64);
        self.byte_get()
    }

    /// Retreats to the start of the preceding grapheme cluster.
    pub fn char_prev(&mut self) -> u8 {
        if self.pos == 0 {
            return self.byte_get();
        }
        let (win_start, win_end) = self.codepoint_window(self.pos);
        let bytes = self.collect_range(win_start, win_end);
        let s = std::str::from_utf8(&bytes).unwrap_or("");
        let local = (self.pos - win_start) as usize;
        let mut gc = GraphemeCursor::new(local, s.len(), true);
        let boundary = gc.prev_boundary(s, 0).ok().flatten().unwrap_or(0);
        self.seek(win_start + boundary as u64);
        self.byte_get()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::buffer::Buffer;

    #[test]
    fn byte_next_crosses_piece_boundary() {
        let mut buf = Buffer::from_bytes(b"abc".to_vec());
        buf.insert(3, b"def").unwrap();
        let mut cur = buf.cursor_at(0);
        let mut out = Vec::new();
        out.push(cur.byte_get());
        for _ in 0..5 {
            out.push(cur.byte_next());
        }
        assert_eq!(out, b"abcdef");
        // one past the end reads a synthetic NUL
        assert_eq!(cur.byte_next(), 0);
    }

    #[test]
    fn char_get_normalizes_crlf() {
        let buf = Buffer::from_bytes(b"a\r\nb".to_vec());
        let cur = buf.cursor_at(1);
        assert_eq!(cur.char_get(), b'\n');
        assert_eq!(cur.byte_get(), b'\r');
    }

    #[test]
    fn codepoint_next_skips_multibyte_sequence() {
        let buf = Buffer::from_bytes("a\u{00e9}b".as_bytes().to_vec());
        let mut cur = buf.cursor_at(0);
        cur.codepoint_next();
        assert_eq!(cur.pos(), 1);
        cur.codepoint_next();
        assert_eq!(cur.pos(), 3);
    }
}

//! Line index: a lazily-extended cache of line-start byte offsets, plus
//! the newline convention detected for the buffer at load time.
//!
//! Line numbers are 1-based. `starts[i]` is the byte offset of line
//! `i + 1`'s first byte, so `starts[0]` is always `0`. The cache only
//! grows forward from `scanned_to`; an edit invalidates every cached
//! entry from its leftmost touched line onward, and the next lookup past
//! that point re-scans from there.

use crate::block::BlockStore;
use crate::iterator::Cursor;
use crate::piece::PieceArena;

/// How many leading bytes of the loaded content are inspected to guess
/// the newline convention. Bounded so a huge file with no early newline
/// does not force a full scan just to pick a default.
const DETECT_WINDOW: usize = 64 * 1024;

/// The line terminator convention detected for a buffer at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewlineType {
    Lf,
    CrLf,
}

impl NewlineType {
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            NewlineType::Lf => b"\n",
            NewlineType::CrLf => b"\r\n",
        }
    }
}

/// Scans `bytes` (assumed to be a prefix of the loaded content, capped at
/// `DETECT_WINDOW`) for the first line terminator. Defaults to LF if none
/// is found.
pub(crate) fn detect_newline(bytes: &[u8]) -> NewlineType {
    let window = &bytes[..bytes.len().min(DETECT_WINDOW)];
    for (i, &b) in window.iter().enumerate() {
        if b == b'\n' {
            return if i > 0 && window[i - 1] == b'\r' {
                NewlineType::CrLf
            } else {
                NewlineType::Lf
            };
        }
    }
    NewlineType::Lf
}

pub(crate) struct LineIndex {
    newline: NewlineType,
    starts: Vec<u64>,
    scanned_to: u64,
    scan_complete: bool,
}

impl LineIndex {
    pub(crate) fn new(newline: NewlineType) -> LineIndex {
        LineIndex {
            newline,
            starts: vec![0],
            scanned_to: 0,
            scan_complete: false,
        }
    }

    pub(crate) fn newline_type(&self) -> NewlineType {
        self.newline
    }

    /// Drops every cached line start at or after `pos`, and marks the
    /// cache incomplete again so the next lookup re-scans from there.
    pub(crate) fn invalidate_from(&mut self, pos: u64) {
        let keep = self.starts.partition_point(|&s| s < pos).max(1);
        self.starts.truncate(keep);
        self.scanned_to = *self.starts.last().unwrap();
        self.scan_complete = false;
    }

    /// Scans forward from `scanned_to` for the next `\n`, appending one
    /// new line start if found. No-op once `scan_complete`.
    fn scan_more(&mut self, arena: &PieceArena, blocks: &BlockStore, size: u64) {
        if self.scan_complete {
            return;
        }
        let mut pos = self.scanned_to;
        let mut cur = Cursor::new(arena, blocks, size, pos);
        while pos < size {
            let b = cur.byte_get();
            pos += 1;
            cur.byte_next();
            if b == b'\n' {
                self.starts.push(pos);
                self.scanned_to = pos;
                return;
            }
        }
        self.scanned_to = size;
        self.scan_complete = true;
    }

    /// Byte offset of the first byte of 1-based line `lineno`, or `None`
    /// if the buffer has fewer lines than that.
    pub(crate) fn pos_by_lineno(
        &mut self,
        lineno: u64,
        arena: &PieceArena,
        blocks: &BlockStore,
        size: u64,
    ) -> Option<u64> {
        if lineno == 0 {
            return None;
        }
        let idx = (lineno - 1) as usize;
        while self.starts.len() <= idx && !self.scan_complete {
            self.scan_more(arena, blocks, size);
        }
        self.starts.get(idx).copied()
    }

    /// 1-based line number containing byte offset `pos`.
    pub(crate) fn lineno_by_pos(
        &mut self,
        pos: u64,
        arena: &PieceArena,
        blocks: &BlockStore,
        size: u64,
    ) -> Option<u64> {
        if pos > size {
            return None;
        }
        while *self.starts.last().unwrap() <= pos && !self.scan_complete {
            self.scan_more(arena, blocks, size);
        }
        let idx = match self.starts.binary_search(&pos) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        Some((idx + 1) as u64)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn detects_lf() {
        assert_eq!(detect_newline(b"line1\nline2\n"), NewlineType::Lf);
    }

    #[test]
    fn detects_crlf() {
        assert_eq!(detect_newline(b"line1\r\nline2\r\n"), NewlineType::CrLf);
    }

    #[test]
    fn defaults_to_lf_when_absent() {
        assert_eq!(detect_newline(b"no newlines here"), NewlineType::Lf);
        assert_eq!(detect_newline(b""), NewlineType::Lf);
    }
}

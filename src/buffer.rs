//! The buffer: block store, piece arena/list, revision graph, mark
//! resolution, line index, and save engine assembled into the single
//! entry point the rest of this crate exists to provide.

use std::cell::RefCell;
use std::fs::File;
use std::io::{self, Read, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::block::{BlockRef, BlockStore};
use crate::change::Change;
use crate::error::{BufferError, Result};
use crate::iterator::{find_piece, Cursor};
use crate::line::{detect_newline, LineIndex, NewlineType};
use crate::list::PieceList;
use crate::mark::Mark;
use crate::piece::{Piece, PieceArena, PieceId, HEAD, TAIL};
use crate::revision::{RevisionGraph, RevisionId};
use crate::save::{SaveHandle, SaveMethod};

/// How much of a loaded file is scanned looking for an existing line
/// terminator before giving up and defaulting to LF; kept in sync with
/// `line::DETECT_WINDOW`'s purpose but applied to whichever prefix is
/// cheapest to read (the mmap itself, or the first bytes off a reader).
const DETECT_PREFIX: usize = 64 * 1024;

/// A persistent, piece-table-based in-memory text buffer.
pub struct Buffer {
    blocks: BlockStore,
    arena: PieceArena,
    list: PieceList,
    revisions: RevisionGraph,
    saved_revision: RevisionId,
    line_index: RefCell<LineIndex>,
    path: Option<PathBuf>,
}

impl Buffer {
    /// An empty, unbacked buffer.
    pub fn new() -> Buffer {
        let now = SystemTime::now();
        Buffer {
            blocks: BlockStore::empty(),
            arena: PieceArena::new(),
            list: PieceList::new(),
            revisions: RevisionGraph::new(now),
            saved_revision: 0,
            line_index: RefCell::new(LineIndex::new(NewlineType::Lf)),
            path: None,
        }
    }

    /// A buffer whose initial content is `data`, held in a heap block
    /// rather than mapped from a file. Useful for embedding and tests,
    /// which the distilled interface (mmap-or-empty) does not offer a
    /// constructor for.
    pub fn from_bytes(data: Vec<u8>) -> Buffer {
        let mut buf = Buffer::new();
        if !data.is_empty() {
            let newline = detect_newline(&data[..data.len().min(DETECT_PREFIX)]);
            let (block, offset, len) = buf.blocks.append(&data);
            let piece_id = buf.arena.alloc(Piece { block, offset, len });
            buf.list.splice(&mut buf.arena, 0, &[], &[piece_id]);
            buf.line_index = RefCell::new(LineIndex::new(newline));
        }
        buf
    }

    /// Reads all of `reader` into memory and installs it as the initial
    /// content, since there is no file descriptor to map.
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Buffer> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Ok(Buffer::from_bytes(data))
    }

    /// Loads `path`. A non-empty file is memory-mapped read-only and
    /// starts as one piece spanning the whole file; an absent or empty
    /// file starts the buffer empty.
    pub fn load(path: impl AsRef<Path>) -> Result<Buffer> {
        let path = path.as_ref();
        let mut buf = Buffer::new();
        buf.path = Some(path.to_path_buf());

        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(buf),
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(buf);
        }

        let blocks = BlockStore::with_mmap(&file)?;
        let mmap_len = blocks.mmap_len();
        let prefix_len = (mmap_len as usize).min(DETECT_PREFIX);
        let newline = detect_newline(blocks.bytes(BlockRef::Mmap, 0, prefix_len as u64));

        buf.blocks = blocks;
        let piece_id = buf.arena.alloc(Piece {
            block: BlockRef::Mmap,
            offset: 0,
            len: mmap_len,
        });
        buf.list.splice(&mut buf.arena, 0, &[], &[piece_id]);
        buf.line_index = RefCell::new(LineIndex::new(newline));
        log::debug!("load: mapped {} ({} bytes)", path.display(), mmap_len);
        Ok(buf)
    }

    pub fn size(&self) -> u64 {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// True whenever the current revision is not the one last saved.
    pub fn modified(&self) -> bool {
        self.revisions.modified_since(self.saved_revision)
    }

    /// Metadata of the backing file on disk, if this buffer was loaded
    /// from a path. Distinct from `size()`: the file may have changed on
    /// disk independently of this buffer's in-memory content.
    pub fn stat(&self) -> Result<Option<std::fs::Metadata>> {
        match &self.path {
            Some(p) => Ok(Some(std::fs::metadata(p)?)),
            None => Ok(None),
        }
    }

    /// Classifies `addr` as falling inside this buffer's mapped region,
    /// for a host editor's SIGBUS handler to check after a truncated
    /// backing file raises the signal. Informational only: this crate
    /// does not install a handler itself.
    pub fn sigbus(&self, addr: *const u8) -> bool {
        self.blocks.mmap_contains_addr(addr)
    }

    fn check_pos(&self, pos: u64) -> Result<()> {
        if pos > self.size() {
            Err(BufferError::BadPosition {
                pos,
                size: self.size(),
            })
        } else {
            Ok(())
        }
    }

    /// Inserts `data` at `pos`. Coalesces into the directly preceding
    /// insert's piece when it lands on a piece boundary, continues the
    /// same heap block, and the current revision is still open (not
    /// snapshotted since).
    pub fn insert(&mut self, pos: u64, data: &[u8]) -> Result<()> {
        self.check_pos(pos)?;
        if data.is_empty() {
            return Ok(());
        }

        let (covering, piece_start) = find_piece(&self.arena, pos);
        let boundary = pos == piece_start;

        if boundary {
            let predecessor = if covering == HEAD {
                HEAD
            } else {
                self.arena.prev(covering)
            };
            let coalesce_candidate = if predecessor != HEAD {
                self.revisions
                    .last_insert_tail()
                    .filter(|&tail| tail == predecessor)
            } else {
                None
            };

            if let Some(predecessor) = coalesce_candidate {
                let pred = self.arena.piece(predecessor);
                if self.blocks.is_block_tail(pred.block, pred.offset + pred.len) {
                    let (_, _, len) = self.blocks.append(data);
                    self.arena.extend(predecessor, len);
                    self.list.grow_len(len);
                    self.line_index.borrow_mut().invalidate_from(pos);
                    return Ok(());
                }
            }

            let (block, offset, len) = self.blocks.append(data);
            let new_piece = self.arena.alloc(Piece { block, offset, len });
            let change = Change {
                position: pos,
                old: Vec::new(),
                new: vec![new_piece],
            };
            self.revisions
                .record_change(&mut self.list, &mut self.arena, change, SystemTime::now());
            self.line_index.borrow_mut().invalidate_from(pos);
            return Ok(());
        }

        // Non-boundary: split the covering piece around `pos`.
        let piece = self.arena.piece(covering);
        let local_off = pos - piece_start;
        let (block, offset, len) = self.blocks.append(data);
        let new_piece = self.arena.alloc(Piece { block, offset, len });
        let left = self.arena.alloc(Piece {
            block: piece.block,
            offset: piece.offset,
            len: local_off,
        });
        let right = self.arena.alloc(Piece {
            block: piece.block,
            offset: piece.offset + local_off,
            len: piece.len - local_off,
        });
        let change = Change {
            position: piece_start,
            old: vec![covering],
            new: vec![left, new_piece, right],
        };
        self.revisions
            .record_change(&mut self.list, &mut self.arena, change, SystemTime::now());
        self.line_index.borrow_mut().invalidate_from(piece_start);
        Ok(())
    }

    /// Inserts the buffer's detected newline sequence at `pos`.
    pub fn insert_newline(&mut self, pos: u64) -> Result<()> {
        let nl = self.newline_type().as_bytes();
        self.insert(pos, nl)
    }

    /// Deletes `len` bytes starting at `pos`. A no-op when `len == 0`.
    pub fn delete(&mut self, pos: u64, len: u64) -> Result<()> {
        if len == 0 {
            self.check_pos(pos)?;
            return Ok(());
        }
        let end = pos
            .checked_add(len)
            .ok_or(BufferError::InvalidArgument("delete range overflows"))?;
        if end > self.size() {
            return Err(BufferError::BadPosition {
                pos: end,
                size: self.size(),
            });
        }

        let (first_id, first_start) = find_piece(&self.arena, pos);
        let mut old = Vec::new();
        let mut node = first_id;
        let mut node_start = first_start;
        let (last_id, last_start) = loop {
            old.push(node);
            let piece = self.arena.piece(node);
            let node_end = node_start + piece.len;
            if node_end >= end {
                break (node, node_start);
            }
            node = self.arena.next(node);
            node_start = node_end;
        };

        let first_piece = self.arena.piece(first_id);
        let first_local_off = pos - first_start;
        let last_piece = self.arena.piece(last_id);
        let last_local_off_end = end - last_start;

        let mut new = Vec::with_capacity(2);
        if first_local_off > 0 {
            new.push(self.arena.alloc(Piece {
                block: first_piece.block,
                offset: first_piece.offset,
                len: first_local_off,
            }));
        }
        if last_local_off_end < last_piece.len {
            new.push(self.arena.alloc(Piece {
                block: last_piece.block,
                offset: last_piece.offset + last_local_off_end,
                len: last_piece.len - last_local_off_end,
            }));
        }

        let change = Change {
            position: first_start,
            old,
            new,
        };
        self.revisions
            .record_change(&mut self.list, &mut self.arena, change, SystemTime::now());
        self.line_index.borrow_mut().invalidate_from(first_start);
        Ok(())
    }

    pub fn delete_range(&mut self, range: Range<u64>) -> Result<()> {
        if range.end < range.start {
            return Err(BufferError::InvalidArgument(
                "delete_range: end precedes start",
            ));
        }
        self.delete(range.start, range.end - range.start)
    }

    /// Closes the current revision (if open and non-empty) and starts a
    /// fresh empty child. No-op if there is nothing to close.
    pub fn snapshot(&mut self) {
        self.revisions.snapshot(SystemTime::now());
    }

    pub fn undo(&mut self) -> Option<u64> {
        let pos = self.revisions.undo(&mut self.list, &mut self.arena)?;
        self.line_index.borrow_mut().invalidate_from(pos);
        Some(pos)
    }

    pub fn redo(&mut self) -> Option<u64> {
        let pos = self.revisions.redo(&mut self.list, &mut self.arena)?;
        self.line_index.borrow_mut().invalidate_from(pos);
        Some(pos)
    }

    pub fn earlier(&mut self, n: usize) -> Option<u64> {
        let pos = self.revisions.earlier(&mut self.list, &mut self.arena, n)?;
        self.line_index.borrow_mut().invalidate_from(pos);
        Some(pos)
    }

    pub fn later(&mut self, n: usize) -> Option<u64> {
        let pos = self.revisions.later(&mut self.list, &mut self.arena, n)?;
        self.line_index.borrow_mut().invalidate_from(pos);
        Some(pos)
    }

    pub fn restore(&mut self, t: SystemTime) -> Option<u64> {
        let pos = self.revisions.restore(&mut self.list, &mut self.arena, t)?;
        self.line_index.borrow_mut().invalidate_from(pos);
        Some(pos)
    }

    /// The current revision's creation timestamp.
    pub fn state(&self) -> SystemTime {
        self.revisions.state()
    }

    /// Position recorded by the `i`-th most recent change in creation
    /// order across the whole revision graph, regardless of branch.
    pub fn history_get(&self, i: usize) -> Option<u64> {
        self.revisions.history_get(i)
    }

    pub fn newline_type(&self) -> NewlineType {
        self.line_index.borrow().newline_type()
    }

    /// The byte every line start is measured relative to; both LF and
    /// CRLF conventions terminate on this byte.
    pub fn newline_char(&self) -> u8 {
        b'\n'
    }

    pub fn pos_by_lineno(&self, lineno: u64) -> Option<u64> {
        self.line_index
            .borrow_mut()
            .pos_by_lineno(lineno, &self.arena, &self.blocks, self.size())
    }

    pub fn lineno_by_pos(&self, pos: u64) -> Option<u64> {
        self.line_index
            .borrow_mut()
            .lineno_by_pos(pos, &self.arena, &self.blocks, self.size())
    }

    pub fn byte_get(&self, pos: u64) -> Option<u8> {
        if pos >= self.size() {
            return None;
        }
        Some(self.cursor_at(pos).byte_get())
    }

    pub fn bytes_get(&self, range: Range<u64>) -> Option<Vec<u8>> {
        if range.end < range.start || range.end > self.size() {
            return None;
        }
        let mut out = Vec::with_capacity((range.end - range.start) as usize);
        let (mut node, mut node_start) = find_piece(&self.arena, range.start);
        let mut pos = range.start;
        while pos < range.end && node != TAIL {
            let piece = self.arena.piece(node);
            let piece_end = node_start + piece.len;
            let take_end = piece_end.min(range.end);
            let off = piece.offset + (pos - node_start);
            let len = take_end - pos;
            out.extend_from_slice(self.blocks.bytes(piece.block, off, len));
            pos = take_end;
            node_start = piece_end;
            node = self.arena.next(node);
        }
        Some(out)
    }

    pub fn cursor_at(&self, pos: u64) -> Cursor<'_> {
        Cursor::new(&self.arena, &self.blocks, self.size(), pos)
    }

    /// Sets a stable mark at `pos`.
    pub fn mark_set(&self, pos: u64) -> Result<Mark> {
        self.check_pos(pos)?;
        if self.size() == 0 {
            return Ok(Mark {
                block: BlockRef::Heap(0),
                block_pos: 0,
                after: true,
                empty: true,
            });
        }
        let after = pos == self.size();
        let lookup_pos = if after { pos - 1 } else { pos };
        let (piece_id, piece_start) = find_piece(&self.arena, lookup_pos);
        let piece = self.arena.piece(piece_id);
        let off = lookup_pos - piece_start;
        Ok(Mark {
            block: piece.block,
            block_pos: piece.offset + off,
            after,
            empty: false,
        })
    }

    /// Resolves `mark` against the current piece list, or `None` if the
    /// byte it references is no longer present in it.
    pub fn mark_get(&self, mark: &Mark) -> Option<u64> {
        if mark.empty {
            return Some(0);
        }
        let mut cum = 0u64;
        let mut node = self.arena.next(HEAD);
        while node != TAIL {
            let piece = self.arena.piece(node);
            if piece.block == mark.block
                && piece.offset <= mark.block_pos
                && mark.block_pos < piece.offset + piece.len
            {
                let mut off = mark.block_pos - piece.offset;
                if mark.after {
                    off += 1;
                }
                return Some(cum + off);
            }
            cum += piece.len;
            node = self.arena.next(node);
        }
        None
    }

    /// Writes the entire current content to `writer`.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<usize> {
        self.write_range(writer, 0..self.size())
    }

    /// Writes `range`'s bytes, in buffer order, to `writer`.
    pub fn write_range<W: Write>(&self, writer: &mut W, range: Range<u64>) -> Result<usize> {
        let bytes = self
            .bytes_get(range)
            .ok_or(BufferError::InvalidArgument("write_range: range out of bounds"))?;
        writer.write_all(&bytes)?;
        Ok(bytes.len())
    }

    fn mark_saved(&mut self) {
        self.snapshot();
        self.saved_revision = self.revisions.current();
    }

    /// Saves the entire buffer content to `path` using `method`. Takes an
    /// implicit snapshot and clears `modified` on success.
    pub fn save(&mut self, path: impl AsRef<Path>, method: SaveMethod) -> Result<()> {
        let size = self.size();
        let mut handle = self.save_begin(path, method)?;
        self.save_write_range(&mut handle, 0..size)?;
        self.save_commit(handle)
    }

    /// Saves only `ranges`, written in file order; the on-disk result is
    /// the concatenation of each range's bytes, with no gap bytes from
    /// the buffer in between.
    pub fn save_range(
        &mut self,
        path: impl AsRef<Path>,
        method: SaveMethod,
        ranges: &[Range<u64>],
    ) -> Result<()> {
        let mut handle = self.save_begin(path, method)?;
        for r in ranges {
            self.save_write_range(&mut handle, r.clone())?;
        }
        self.save_commit(handle)
    }

    pub fn save_begin(&self, path: impl AsRef<Path>, method: SaveMethod) -> Result<SaveHandle> {
        SaveHandle::begin(path.as_ref(), method)
    }

    pub fn save_write_range(&self, handle: &mut SaveHandle, range: Range<u64>) -> Result<usize> {
        if range.end > self.size() || range.end < range.start {
            return Err(BufferError::InvalidArgument(
                "save_write_range: range out of bounds",
            ));
        }
        let bytes = self.bytes_get(range.clone()).expect("range validated above");
        handle.write_range(range, &bytes)
    }

    pub fn save_commit(&mut self, handle: SaveHandle) -> Result<()> {
        handle.commit()?;
        self.mark_saved();
        Ok(())
    }

    pub fn save_cancel(&self, handle: SaveHandle) {
        handle.cancel();
    }
}

impl Default for Buffer {
    fn default() -> Buffer {
        Buffer::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Read as _;

    #[test]
    fn insert_into_empty_buffer() {
        let mut buf = Buffer::new();
        buf.insert(0, b"hello").unwrap();
        assert_eq!(buf.size(), 5);
        assert_eq!(buf.bytes_get(0..5).unwrap(), b"hello");
    }

    #[test]
    fn delete_then_undo_then_redo() {
        let mut buf = Buffer::from_bytes(b"abcdef".to_vec());
        buf.delete(2, 2).unwrap();
        assert_eq!(buf.bytes_get(0..buf.size()).unwrap(), b"abef");

        assert_eq!(buf.undo(), Some(2));
        assert_eq!(buf.bytes_get(0..buf.size()).unwrap(), b"abcdef");

        assert_eq!(buf.redo(), Some(2));
        assert_eq!(buf.bytes_get(0..buf.size()).unwrap(), b"abef");
    }

    #[test]
    fn consecutive_appends_coalesce_into_one_change() {
        let mut buf = Buffer::from_bytes(b"abc".to_vec());
        buf.insert(3, b"d").unwrap();
        buf.insert(4, b"e").unwrap();
        buf.snapshot();
        buf.insert(5, b"f").unwrap();

        assert_eq!(buf.bytes_get(0..buf.size()).unwrap(), b"abcdef");
        // Two undos: one for the coalesced "de", one for "f".
        assert_eq!(buf.undo(), Some(5));
        assert_eq!(buf.bytes_get(0..buf.size()).unwrap(), b"abcde");
        assert_eq!(buf.undo(), Some(3));
        assert_eq!(buf.bytes_get(0..buf.size()).unwrap(), b"abc");
    }

    #[test]
    fn earlier_across_an_empty_snapshotted_child_reports_no_position() {
        let mut buf = Buffer::from_bytes(b"abc".to_vec());
        buf.insert(3, b"d").unwrap();
        buf.snapshot();
        // `snapshot` left current on a fresh, empty child; stepping back
        // to its non-empty parent touched no bytes, so this must not come
        // back as `Some(EPOS)`.
        assert_ne!(buf.earlier(1), Some(u64::MAX));
        assert_eq!(buf.bytes_get(0..buf.size()).unwrap(), b"abcd");
    }

    #[test]
    fn line_index_round_trips() {
        let buf = Buffer::from_bytes(b"line1\nline2\n".to_vec());
        assert_eq!(buf.pos_by_lineno(2), Some(6));
        assert_eq!(buf.lineno_by_pos(7), Some(2));
        for n in 1..=2u64 {
            let p = buf.pos_by_lineno(n).unwrap();
            assert_eq!(buf.lineno_by_pos(p), Some(n));
        }
    }

    #[test]
    fn mark_survives_edits_before_it_and_invalidates_on_overlapping_delete() {
        let mut buf = Buffer::from_bytes(b"abcdef".to_vec());
        let mark = buf.mark_set(3).unwrap();

        buf.insert(0, b"XX").unwrap();
        assert_eq!(buf.mark_get(&mark), Some(5));

        buf.delete(0, 6).unwrap();
        assert_eq!(buf.mark_get(&mark), None);

        buf.undo().unwrap();
        assert_eq!(buf.mark_get(&mark), Some(5));
    }

    #[test]
    fn mark_survives_a_split_of_its_piece() {
        let mut buf = Buffer::from_bytes(b"abcdef".to_vec());
        let mark = buf.mark_set(4).unwrap(); // 'e'
        // Insert inside the same piece, before the mark: splits the
        // piece the mark's block position lives in.
        buf.insert(2, b"XX").unwrap();
        assert_eq!(buf.bytes_get(0..buf.size()).unwrap(), b"abXXcdef");
        assert_eq!(buf.mark_get(&mark), Some(6));
    }

    #[test]
    fn save_and_reload_roundtrips_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.txt");
        let mut buf = Buffer::from_bytes(b"hello world".to_vec());
        buf.save(&path, SaveMethod::Atomic).unwrap();
        assert!(!buf.modified());

        let mut content = String::new();
        File::open(&path).unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "hello world");
    }

    #[test]
    fn save_range_writes_only_selected_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let mut buf = Buffer::from_bytes(b"ABCDEFG".to_vec());
        buf.save_range(&path, SaveMethod::Atomic, &[0..2, 4..6])
            .unwrap();

        let mut content = String::new();
        File::open(&path).unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "ABEF");
    }

    #[test]
    fn modified_flag_tracks_saved_revision() {
        let mut buf = Buffer::from_bytes(b"abc".to_vec());
        assert!(!buf.modified());
        buf.insert(3, b"d").unwrap();
        assert!(buf.modified());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.txt");
        buf.save(&path, SaveMethod::Atomic).unwrap();
        assert!(!buf.modified());
    }
}

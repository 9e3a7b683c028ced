//! Owns the raw byte buffers that back pieces: one optional read-only mmap
//! block for the loaded file, plus a growable list of append-only heap
//! blocks for inserted content.

use std::fs::File;
use std::io;

use memmap2::Mmap;

/// Identifies which block a piece's bytes live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockRef {
    Mmap,
    Heap(u32),
}

const INITIAL_HEAP_CAPACITY: usize = 4 * 1024;
const MAX_HEAP_CAPACITY: usize = 1024 * 1024;

struct HeapBlock {
    data: Vec<u8>,
}

impl HeapBlock {
    fn with_capacity(cap: usize) -> HeapBlock {
        HeapBlock {
            data: Vec::with_capacity(cap),
        }
    }

    fn free_capacity(&self) -> usize {
        self.data.capacity() - self.data.len()
    }
}

pub(crate) struct BlockStore {
    mmap: Option<Mmap>,
    heap: Vec<HeapBlock>,
}

impl BlockStore {
    pub(crate) fn empty() -> BlockStore {
        BlockStore {
            mmap: None,
            heap: Vec::new(),
        }
    }

    /// Maps `file` read-only. The caller has already checked the file is
    /// non-empty; an empty file is treated as no original block at all.
    pub(crate) fn with_mmap(file: &File) -> io::Result<BlockStore> {
        let mmap = unsafe { Mmap::map(file)? };
        Ok(BlockStore {
            mmap: Some(mmap),
            heap: Vec::new(),
        })
    }

    pub(crate) fn mmap_len(&self) -> u64 {
        self.mmap.as_ref().map(|m| m.len() as u64).unwrap_or(0)
    }

    pub(crate) fn is_file_backed(&self) -> bool {
        self.mmap.is_some()
    }

    /// True if `addr` falls inside the mapped region, for SIGBUS classification.
    pub(crate) fn mmap_contains_addr(&self, addr: *const u8) -> bool {
        match &self.mmap {
            Some(m) => {
                let start = m.as_ptr() as usize;
                let end = start + m.len();
                let addr = addr as usize;
                addr >= start && addr < end
            }
            None => false,
        }
    }

    /// Appends `bytes`, reusing the most recent heap block if it has free
    /// capacity, otherwise allocating a new one with geometric growth
    /// (clamped to `MAX_HEAP_CAPACITY`, or sized exactly to `bytes` if the
    /// write itself is larger than that cap).
    pub(crate) fn append(&mut self, bytes: &[u8]) -> (BlockRef, u64, u64) {
        if let Some(last) = self.heap.last_mut() {
            if last.free_capacity() >= bytes.len() {
                let offset = last.data.len() as u64;
                last.data.extend_from_slice(bytes);
                let idx = (self.heap.len() - 1) as u32;
                return (BlockRef::Heap(idx), offset, bytes.len() as u64);
            }
        }

        let next_cap = self
            .heap
            .last()
            .map(|b| (b.data.capacity() * 2).min(MAX_HEAP_CAPACITY))
            .unwrap_or(INITIAL_HEAP_CAPACITY)
            .max(bytes.len());
        let mut block = HeapBlock::with_capacity(next_cap);
        block.data.extend_from_slice(bytes);
        self.heap.push(block);
        let idx = (self.heap.len() - 1) as u32;
        (BlockRef::Heap(idx), 0, bytes.len() as u64)
    }

    /// True if the last append landed at `(block, end_offset)`, i.e. the next
    /// append to that same spot would be contiguous in the same block. Used
    /// by the coalescing check in `Buffer::insert`.
    pub(crate) fn is_block_tail(&self, block: BlockRef, end_offset: u64) -> bool {
        match block {
            BlockRef::Heap(idx) => match self.heap.get(idx as usize) {
                Some(b) => b.data.len() as u64 == end_offset,
                None => false,
            },
            BlockRef::Mmap => false,
        }
    }

    pub(crate) fn bytes(&self, block: BlockRef, offset: u64, len: u64) -> &[u8] {
        let (start, end) = (offset as usize, (offset + len) as usize);
        match block {
            BlockRef::Mmap => {
                let mmap = self.mmap.as_ref().expect("mmap block referenced but absent");
                &mmap[start..end]
            }
            BlockRef::Heap(idx) => {
                let block = &self.heap[idx as usize];
                &block.data[start..end]
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn append_reuses_block_while_capacity_remains() {
        let mut store = BlockStore::empty();
        let (b1, off1, len1) = store.append(b"hello");
        let (b2, off2, _len2) = store.append(b" world");
        assert_eq!(b1, b2);
        assert_eq!(off2, off1 + len1);
        assert!(store.is_block_tail(b2, off2 + 6));
    }

    #[test]
    fn append_grows_new_block_past_capacity() {
        let mut store = BlockStore::empty();
        let big = vec![b'x'; INITIAL_HEAP_CAPACITY];
        let (b1, _, _) = store.append(&big);
        let (b2, off2, _) = store.append(b"y");
        assert_ne!(b1, b2);
        assert_eq!(off2, 0);
    }
}

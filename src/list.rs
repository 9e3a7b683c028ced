//! The doubly-linked piece list: the ordered sequence of pieces whose
//! concatenated content is the buffer's current text.
//!
//! Positions are located by walking the list from the head (or from a
//! cached last-touched position, for locality on sequential edits). This is
//! O(piece count) rather than O(log n); see the design note on this
//! tradeoff in SPEC_FULL.md.

use crate::piece::{PieceArena, PieceId, HEAD, TAIL};

pub(crate) struct PieceList {
    len: u64,
    // Last (position, node) pair seen by `locate`, used as a starting point
    // for the next walk instead of always restarting from the head.
    cache_pos: u64,
    cache_node: PieceId,
}

impl PieceList {
    pub(crate) fn new() -> PieceList {
        PieceList {
            len: 0,
            cache_pos: 0,
            cache_node: HEAD,
        }
    }

    pub(crate) fn len(&self) -> u64 {
        self.len
    }

    /// Grows the list's total length without a splice, used by the insert
    /// coalescing fast path where an existing piece is extended in place
    /// rather than replaced.
    pub(crate) fn grow_len(&mut self, extra: u64) {
        self.len += extra;
        self.invalidate_cache();
    }

    fn invalidate_cache(&mut self) {
        self.cache_pos = 0;
        self.cache_node = HEAD;
    }

    /// Returns the node immediately before `pos` in list order, i.e. the
    /// node `N` such that the sum of lengths of all nodes from the head up
    /// to and including `N` equals `pos`. `pos` must land exactly on a
    /// piece boundary, which every caller in this crate guarantees.
    pub(crate) fn locate(&mut self, arena: &PieceArena, pos: u64) -> PieceId {
        let (mut node, mut cum) = if self.cache_pos <= pos {
            (self.cache_node, self.cache_pos)
        } else {
            (HEAD, 0)
        };
        loop {
            if cum == pos {
                break;
            }
            let next = arena.next(node);
            debug_assert_ne!(next, TAIL, "locate: position past end of list");
            let next_len = arena.len_of(next);
            cum += next_len;
            node = next;
        }
        self.cache_pos = cum;
        self.cache_node = node;
        node
    }

    /// Links `pred -> ids[0] -> .. -> ids[n-1] -> succ`, or `pred -> succ`
    /// directly if `ids` is empty.
    fn relink(&mut self, arena: &mut PieceArena, pred: PieceId, succ: PieceId, ids: &[PieceId]) {
        let mut cur = pred;
        for &id in ids {
            arena.link(cur, id);
            cur = id;
        }
        arena.link(cur, succ);
    }

    /// Replaces the `remove` run (a contiguous, currently-linked sequence
    /// of whole pieces starting at `position`) with `insert`. Used both to
    /// perform an edit for the first time and, identically, to replay a
    /// recorded change forward (`remove = old`, `insert = new`) or inverse
    /// (`remove = new`, `insert = old`).
    pub(crate) fn splice(
        &mut self,
        arena: &mut PieceArena,
        position: u64,
        remove: &[PieceId],
        insert: &[PieceId],
    ) {
        let pred = self.locate(arena, position);
        let succ = match remove.last() {
            Some(&id) => arena.next(id),
            None => arena.next(pred),
        };
        self.relink(arena, pred, succ, insert);

        let removed_len: u64 = remove.iter().map(|&id| arena.len_of(id)).sum();
        let inserted_len: u64 = insert.iter().map(|&id| arena.len_of(id)).sum();
        self.len = self.len - removed_len + inserted_len;
        self.invalidate_cache();
    }

    /// Whole-buffer byte iterator in list order, used by line indexing,
    /// save, and `write_to`.
    pub(crate) fn iter_pieces<'a>(&self, arena: &'a PieceArena) -> PieceListIter<'a> {
        PieceListIter { arena, node: HEAD }
    }
}

pub(crate) struct PieceListIter<'a> {
    arena: &'a PieceArena,
    node: PieceId,
}

impl<'a> Iterator for PieceListIter<'a> {
    type Item = PieceId;

    fn next(&mut self) -> Option<PieceId> {
        let next = self.arena.next(self.node);
        if next == TAIL {
            None
        } else {
            self.node = next;
            Some(next)
        }
    }
}

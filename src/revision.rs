//! The revision graph: a tree of immutable snapshots of the piece list.
//!
//! Revision ids are assigned in creation order and double as the `seq`
//! field the distilled spec calls for, since nothing ever reorders or
//! removes a revision once created.

use std::time::SystemTime;

use crate::change::Change;
use crate::list::PieceList;
use crate::piece::{PieceArena, PieceId};

pub(crate) type RevisionId = u32;

const ROOT: RevisionId = 0;

struct Revision {
    parent: Option<RevisionId>,
    first_child: Option<RevisionId>,
    next_sibling: Option<RevisionId>,
    active_child: Option<RevisionId>,
    changes: Vec<Change>,
    // How many of `changes`, counted from the front, are currently live in
    // the piece list. Equal to `changes.len()` for every revision except
    // possibly the current one, which can sit mid-revision after a few
    // `undo`/`redo` calls land short of a full revision boundary.
    applied: usize,
    timestamp: SystemTime,
    closed: bool,
}

/// One entry in the flat, whole-graph chronological change log backing
/// `history_get`.
struct HistoryEntry {
    position: u64,
}

pub(crate) struct RevisionGraph {
    revisions: Vec<Revision>,
    current: RevisionId,
    history: Vec<HistoryEntry>,
}

impl RevisionGraph {
    pub(crate) fn new(load_time: SystemTime) -> RevisionGraph {
        RevisionGraph {
            // The root starts closed so it never accumulates changes of
            // its own: it represents the state immediately after load,
            // full stop. The first edit forks an open child off it, same
            // as any other edit onto a closed current revision.
            revisions: vec![Revision {
                parent: None,
                first_child: None,
                next_sibling: None,
                active_child: None,
                changes: Vec::new(),
                applied: 0,
                timestamp: load_time,
                closed: true,
            }],
            current: ROOT,
            history: Vec::new(),
        }
    }

    pub(crate) fn current(&self) -> RevisionId {
        self.current
    }

    pub(crate) fn state(&self) -> SystemTime {
        self.revisions[self.current as usize].timestamp
    }

    /// Whether the current revision differs from `saved`, i.e. the buffer
    /// has unsaved modifications.
    pub(crate) fn modified_since(&self, saved: RevisionId) -> bool {
        self.current != saved
    }

    fn new_child(&mut self, parent: RevisionId, now: SystemTime) -> RevisionId {
        let id = self.revisions.len() as RevisionId;
        self.revisions.push(Revision {
            parent: Some(parent),
            first_child: None,
            next_sibling: None,
            active_child: None,
            changes: Vec::new(),
            applied: 0,
            timestamp: now,
            closed: false,
        });
        match self.revisions[parent as usize].first_child {
            None => self.revisions[parent as usize].first_child = Some(id),
            Some(first) => {
                let mut last = first;
                while let Some(next) = self.revisions[last as usize].next_sibling {
                    last = next;
                }
                self.revisions[last as usize].next_sibling = Some(id);
            }
        }
        id
    }

    /// The piece id appended by the most recent change recorded on the
    /// current revision, if the current revision is still open and has at
    /// least one change. Used by `Buffer::insert`'s coalescing fast path;
    /// a closed current revision (just snapshotted, or navigated to)
    /// always reports `None`, which is what defeats coalescing across a
    /// snapshot.
    pub(crate) fn last_insert_tail(&self) -> Option<PieceId> {
        let cur = &self.revisions[self.current as usize];
        if cur.closed || cur.applied != cur.changes.len() {
            return None;
        }
        let change = cur.changes.last()?;
        change.new.last().copied()
    }

    /// Records `change` on the current revision, forking a new child first
    /// if the current revision was already closed (i.e. we are editing
    /// after having navigated to, or redone onto, a frozen revision).
    ///
    /// If the current revision is open but sits mid-revision (some of its
    /// changes were undone and never redone), the stale undone tail is
    /// discarded before the new change is appended, same as a classic
    /// linear undo stack: typing past an undo abandons that particular
    /// redo, while branching proper only happens across a `snapshot`-ed
    /// revision boundary.
    pub(crate) fn record_change(
        &mut self,
        list: &mut PieceList,
        arena: &mut PieceArena,
        change: Change,
        now: SystemTime,
    ) {
        if self.revisions[self.current as usize].closed {
            let parent = self.current;
            let child = self.new_child(parent, now);
            self.revisions[parent as usize].active_child = Some(child);
            self.current = child;
        } else {
            let applied = self.revisions[self.current as usize].applied;
            self.revisions[self.current as usize].changes.truncate(applied);
        }
        list.splice(arena, change.position, &change.old, &change.new);
        self.history.push(HistoryEntry {
            position: change.position,
        });
        self.revisions[self.current as usize].changes.push(change);
        self.revisions[self.current as usize].applied += 1;
    }

    /// `snapshot`: closes the current revision (if open and non-empty) and
    /// makes a fresh empty child current. No-op if there is nothing to
    /// close.
    pub(crate) fn snapshot(&mut self, now: SystemTime) {
        let cur = self.current;
        if self.revisions[cur as usize].closed || self.revisions[cur as usize].applied == 0 {
            return;
        }
        self.revisions[cur as usize]
            .changes
            .truncate(self.revisions[cur as usize].applied);
        self.revisions[cur as usize].closed = true;
        let child = self.new_child(cur, now);
        self.revisions[cur as usize].active_child = Some(child);
        self.current = child;
    }

    /// Applies whatever changes of `rev` are not yet live (the
    /// `[applied, len)` tail), forward, and marks it fully applied.
    /// Returns `None` if `rev` had nothing left to apply.
    fn apply_forward(&mut self, list: &mut PieceList, arena: &mut PieceArena, rev: RevisionId) -> Option<u64> {
        let mut leftmost = None;
        let applied = self.revisions[rev as usize].applied;
        let len = self.revisions[rev as usize].changes.len();
        for i in applied..len {
            let change = self.revisions[rev as usize].changes[i].clone();
            leftmost = Some(leftmost.map_or(change.position, |l: u64| l.min(change.position)));
            list.splice(arena, change.position, &change.old, &change.new);
        }
        self.revisions[rev as usize].applied = len;
        leftmost
    }

    /// Inverts whatever changes of `rev` are currently live (the
    /// `[0, applied)` prefix), in reverse order, and marks it fully
    /// unapplied. Returns `None` if `rev` had nothing live to invert.
    fn apply_inverse(&mut self, list: &mut PieceList, arena: &mut PieceArena, rev: RevisionId) -> Option<u64> {
        let mut leftmost = None;
        let applied = self.revisions[rev as usize].applied;
        for i in (0..applied).rev() {
            let change = self.revisions[rev as usize].changes[i].clone();
            leftmost = Some(leftmost.map_or(change.position, |l: u64| l.min(change.position)));
            list.splice(arena, change.position, &change.new, &change.old);
        }
        self.revisions[rev as usize].applied = 0;
        leftmost
    }

    fn ancestors(&self, mut rev: RevisionId) -> Vec<RevisionId> {
        let mut path = vec![rev];
        while let Some(parent) = self.revisions[rev as usize].parent {
            path.push(parent);
            rev = parent;
        }
        path
    }

    /// Moves `current` to `target`, replaying changes along the unique
    /// path `current -> lca -> target`. Returns the leftmost position
    /// touched by any applied/inverted change, or `None` if `target` is
    /// already current or if every revision crossed along the way turned
    /// out to have no changes to (un)apply (e.g. hopping over an empty
    /// revision just opened by `snapshot`).
    pub(crate) fn goto(
        &mut self,
        list: &mut PieceList,
        arena: &mut PieceArena,
        target: RevisionId,
    ) -> Option<u64> {
        if target == self.current {
            return None;
        }
        let from_ancestors = self.ancestors(self.current);
        let to_ancestors = self.ancestors(target);
        let lca = to_ancestors
            .iter()
            .find(|r| from_ancestors.contains(r))
            .copied()
            .expect("revision tree is rooted, a common ancestor always exists");

        let mut leftmost: Option<u64> = None;
        let mut cur = self.current;
        while cur != lca {
            if let Some(p) = self.apply_inverse(list, arena, cur) {
                leftmost = Some(leftmost.map_or(p, |l| l.min(p)));
            }
            cur = self.revisions[cur as usize]
                .parent
                .expect("walked past root before reaching lca");
        }

        let mut down = Vec::new();
        let mut node = target;
        while node != lca {
            down.push(node);
            node = self.revisions[node as usize]
                .parent
                .expect("walked past root before reaching lca");
        }
        down.reverse();
        for r in down {
            if let Some(p) = self.apply_forward(list, arena, r) {
                leftmost = Some(leftmost.map_or(p, |l| l.min(p)));
            }
            let parent = self.revisions[r as usize].parent.unwrap();
            self.revisions[parent as usize].active_child = Some(r);
        }

        self.current = target;
        leftmost
    }

    /// Inverts the single most recently applied change of the current
    /// revision, leaving any earlier changes of the same (still open)
    /// revision live. Once the current revision has nothing left applied,
    /// closes it in place and steps to its parent, recursing there.
    ///
    /// Operating one change at a time, rather than unwinding a whole
    /// revision per call, is what lets a delete that was never
    /// `snapshot`-ed away from an earlier, unrelated insert be undone on
    /// its own: a single `undo` call only reverts the last thing that
    /// happened, not everything pending since the last snapshot.
    pub(crate) fn undo(&mut self, list: &mut PieceList, arena: &mut PieceArena) -> Option<u64> {
        let cur = self.current;
        if self.revisions[cur as usize].applied == 0 {
            let parent = self.revisions[cur as usize].parent?;
            self.revisions[cur as usize].closed = true;
            self.revisions[parent as usize].active_child = Some(cur);
            self.current = parent;
            return self.undo(list, arena);
        }
        let idx = self.revisions[cur as usize].applied - 1;
        let change = self.revisions[cur as usize].changes[idx].clone();
        list.splice(arena, change.position, &change.new, &change.old);
        self.revisions[cur as usize].applied = idx;
        Some(change.position)
    }

    /// Reapplies the next change of the current revision that was undone
    /// but not yet redone. Once the current revision is fully applied,
    /// steps down into its most recently active child (or its first
    /// child, if none has been visited yet), applying that child's
    /// changes in full — crossing a revision boundary is all-or-nothing,
    /// matching how a fresh child always starts from its parent's
    /// completed state.
    pub(crate) fn redo(&mut self, list: &mut PieceList, arena: &mut PieceArena) -> Option<u64> {
        let cur = self.current;
        let applied = self.revisions[cur as usize].applied;
        let len = self.revisions[cur as usize].changes.len();
        if applied < len {
            let change = self.revisions[cur as usize].changes[applied].clone();
            list.splice(arena, change.position, &change.old, &change.new);
            self.revisions[cur as usize].applied = applied + 1;
            return Some(change.position);
        }
        let node = &self.revisions[cur as usize];
        let child = node.active_child.or(node.first_child)?;
        let leftmost = self.apply_forward(list, arena, child);
        self.revisions[cur as usize].active_child = Some(child);
        self.current = child;
        leftmost
    }

    pub(crate) fn earlier(
        &mut self,
        list: &mut PieceList,
        arena: &mut PieceArena,
        n: usize,
    ) -> Option<u64> {
        let target = (self.current as i64 - n as i64).max(0) as RevisionId;
        self.goto(list, arena, target)
    }

    pub(crate) fn later(
        &mut self,
        list: &mut PieceList,
        arena: &mut PieceArena,
        n: usize,
    ) -> Option<u64> {
        let max = (self.revisions.len() - 1) as RevisionId;
        let target = ((self.current as i64 + n as i64).min(max as i64)) as RevisionId;
        self.goto(list, arena, target)
    }

    pub(crate) fn restore(
        &mut self,
        list: &mut PieceList,
        arena: &mut PieceArena,
        t: SystemTime,
    ) -> Option<u64> {
        let mut best: Option<RevisionId> = None;
        for (idx, rev) in self.revisions.iter().enumerate() {
            let id = idx as RevisionId;
            if rev.timestamp <= t {
                if best.is_none() || rev.timestamp > self.revisions[best.unwrap() as usize].timestamp {
                    best = Some(id);
                }
            }
        }
        let target = best.unwrap_or_else(|| {
            // No revision at or before `t`: fall back to the one with the
            // smallest timestamp.
            (0..self.revisions.len() as RevisionId)
                .min_by_key(|&id| self.revisions[id as usize].timestamp)
                .unwrap_or(ROOT)
        });
        self.goto(list, arena, target)
    }

    pub(crate) fn history_get(&self, index: usize) -> Option<u64> {
        let len = self.history.len();
        if index >= len {
            return None;
        }
        Some(self.history[len - 1 - index].position)
    }
}

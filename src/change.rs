use crate::piece::PieceId;

/// A single reversible piece-list splice: `old` occupied
/// `[position, position + old_len)` before the edit, `new` occupies that
/// span (resized) after it. Applying `(old, new)` performs the edit;
/// applying `(new, old)` undoes it.
#[derive(Debug, Clone)]
pub(crate) struct Change {
    pub(crate) position: u64,
    pub(crate) old: Vec<PieceId>,
    pub(crate) new: Vec<PieceId>,
}

mod block;
mod change;
mod error;
mod iterator;
mod line;
mod list;
mod mark;
mod piece;
mod revision;
mod save;

mod buffer;

pub use buffer::Buffer;
pub use error::{BufferError, Result};
pub use iterator::Cursor;
pub use line::NewlineType;
pub use mark::Mark;
pub use save::{SaveHandle, SaveMethod};

/// Never a valid mark. Kept for parity with the distilled interface this
/// crate implements; the idiomatic surface expresses "no such mark" as
/// `Option::None` (see [`Buffer::mark_get`]) rather than ever producing
/// this value.
pub const EMARK: u64 = 0;

/// Never a valid buffer position. Kept for the same reason as [`EMARK`];
/// the idiomatic surface uses `Option::None` (see [`Buffer::undo`],
/// [`Buffer::mark_get`], and friends).
pub const EPOS: u64 = u64::MAX;

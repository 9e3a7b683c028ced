use std::io;

/// Error kinds produced by buffer operations.
///
/// Mutating operations return `Result<(), BufferError>` and leave the buffer
/// unchanged on failure: a failing `insert`/`delete` never leaves the piece
/// list partially spliced, since the splice is validated before any arena or
/// list mutation happens.
#[derive(thiserror::Error, Debug)]
pub enum BufferError {
    #[error("position {pos} out of bounds (buffer size is {size})")]
    BadPosition { pos: u64, size: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("allocation failed")]
    AllocError,

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("unsupported: {0}")]
    Unsupported(&'static str),
}

pub type Result<T> = std::result::Result<T, BufferError>;

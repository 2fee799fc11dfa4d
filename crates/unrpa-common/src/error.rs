//! Error types for unrpa-common.

use thiserror::Error;

/// Common error type for unrpa operations.
#[derive(Debug, Error)]
pub enum Error {
    /// End of buffer reached while reading.
    #[error("unexpected end of buffer: needed {needed} bytes but only {available} available")]
    UnexpectedEof { needed: usize, available: usize },

    /// UTF-8 decoding error.
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// A line was not terminated before the end of the buffer.
    #[error("line missing newline terminator")]
    MissingNewline,
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;

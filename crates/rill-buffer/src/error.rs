//! Buffer pool errors.

use rill_common::RillError;
use thiserror::Error;

/// Result type for buffer pool operations.
pub type BufferResult<T> = Result<T, BufferError>;

/// Errors raised while constructing or feeding a pool.
///
/// Exhaustion is deliberately absent: it is reported as `None` from
/// `allocate`.
#[derive(Debug, Error)]
#[allow(missing_docs)] // Fields are documented by variant docs
pub enum BufferError {
    /// Invalid pool geometry.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// A block of the wrong size was handed to a pool.
    #[error("block of {actual} bytes does not belong to a pool of {expected}-byte blocks")]
    ForeignBlock { expected: usize, actual: usize },
}

impl BufferError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

impl From<BufferError> for RillError {
    fn from(err: BufferError) -> Self {
        match err {
            BufferError::Config { message } => RillError::invalid_config(message),
            other => RillError::internal(other.to_string()),
        }
    }
}

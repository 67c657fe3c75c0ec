//! Core error model.

use thiserror::Error;

/// Result type used across the value layer.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while constructing or parsing core values.
///
/// Both variants are detected synchronously, before any storage I/O, and are
/// never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A required input was missing or malformed (empty stream name, bad
    /// selector pattern, invalid property name).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A cursor token could not be parsed.
    ///
    /// Callers decide whether this means "start from the beginning" or a
    /// rejected request.
    #[error("invalid position: {0}")]
    InvalidPosition(String),
}

impl CoreError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn invalid_position(msg: impl Into<String>) -> Self {
        Self::InvalidPosition(msg.into())
    }
}

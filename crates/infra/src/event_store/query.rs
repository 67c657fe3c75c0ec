//! Error taxonomy and outcomes shared by the query engines.

use thiserror::Error;

use commitlog_core::{CoreError, Cursor};

use super::r#trait::StoreError;

/// Default number of commits fetched per storage round trip.
pub const DEFAULT_PAGE_SIZE: usize = 256;

/// Query failure.
///
/// ## Error Categories
///
/// - **InvalidArgument**: missing/empty required input, rejected before any I/O
/// - **InvalidPosition**: malformed cursor token; the caller decides whether to
///   restart from the beginning or reject the request
/// - **StorageUnavailable / StorageTimeout**: propagated unchanged from the log,
///   never retried here
/// - **CallbackFailure**: the consumer's callback failed; the scan stopped and
///   events delivered before the failure stay delivered
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid position: {0}")]
    InvalidPosition(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("storage timeout: {0}")]
    StorageTimeout(String),

    #[error("callback failed: {0:#}")]
    CallbackFailure(anyhow::Error),
}

impl QueryError {
    /// Storage failures are worth retrying from the last acknowledged cursor.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_) | Self::StorageTimeout(_))
    }
}

impl From<CoreError> for QueryError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidArgument(msg) => Self::InvalidArgument(msg),
            CoreError::InvalidPosition(msg) => Self::InvalidPosition(msg),
        }
    }
}

impl From<StoreError> for QueryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Timeout(msg) => Self::StorageTimeout(msg),
            StoreError::InvalidCommit(msg) | StoreError::InvalidArgument(msg) => {
                Self::InvalidArgument(msg)
            }
            StoreError::Unavailable(msg) => Self::StorageUnavailable(msg),
            StoreError::Corrupt(msg) => {
                Self::StorageUnavailable(format!("corrupt commit record: {msg}"))
            }
        }
    }
}

/// How a continuous scan ended.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Every matching commit was read.
    Exhausted { last: Option<Cursor>, delivered: u64 },

    /// The cancellation signal fired; no callback was issued after it was observed.
    Cancelled { last: Option<Cursor>, delivered: u64 },
}

impl ScanOutcome {
    /// Cursor of the last event whose callback completed, if any.
    pub fn last(&self) -> Option<Cursor> {
        match self {
            Self::Exhausted { last, .. } | Self::Cancelled { last, .. } => *last,
        }
    }

    pub fn delivered(&self) -> u64 {
        match self {
            Self::Exhausted { delivered, .. } | Self::Cancelled { delivered, .. } => *delivered,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

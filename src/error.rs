//! Error types for event streaming.

use crate::types::Index;
use thiserror::Error;

/// Error returned by a snapshot function.
pub type SnapshotError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for buffer reads and subscriptions.
///
/// Errors are `Clone` because a terminal error stored in a buffer is handed
/// to every reader that reaches it.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("context cancelled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("snapshot failed: {0}")]
    SnapshotFailed(String),

    #[error("index went backwards: {got} after {previous}")]
    IndexRegression { previous: Index, got: Index },

    #[error("snapshot event index {got} is past snapshot index {snapshot}")]
    IndexAfterSnapshot { snapshot: Index, got: Index },
}

impl StreamError {
    /// Whether the caller may retry the same read with a fresh context.
    pub fn is_retriable(&self) -> bool {
        matches!(self, StreamError::Cancelled | StreamError::DeadlineExceeded)
    }
}

/// Result type for streaming operations.
pub type Result<T> = std::result::Result<T, StreamError>;

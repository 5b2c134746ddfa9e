//! Store error types.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur talking to the coordination store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The path is not a valid absolute store path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The backend cannot be reached. Retrying may help.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// A held lock was lost.
    #[error("lock lost: {0}")]
    LockLost(String),

    /// A watch stopped delivering snapshots.
    #[error("watch closed: {0}")]
    WatchClosed(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to execute a query.
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),
}

impl StoreError {
    /// Returns true if the error is a connectivity problem worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
            other => StoreError::Query(other),
        }
    }
}

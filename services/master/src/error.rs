//! Master error types.

use serde::Serialize;
use thiserror::Error;
use treadmill_id::IdError;
use treadmill_store::StoreError;

/// Details of a refused instance creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaExceeded {
    /// `total` or `proid:<proid>`.
    pub dimension: String,
    pub limit: u64,
    pub current_usage: u64,
    pub requested_delta: u64,
}

/// Errors raised by the master loop and the master API.
#[derive(Debug, Error)]
pub enum MasterError {
    /// The store failed. Fatal for the loop.
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("not found: {0}")]
    NotFound(String),

    /// Rejected before any write.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error(
        "quota exceeded for {}: limit {}, current {}, requested {}",
        .0.dimension, .0.limit, .0.current_usage, .0.requested_delta
    )]
    QuotaExceeded(QuotaExceeded),

    #[error("leader lock lost")]
    LockLost,

    #[error("watch closed: {0}")]
    WatchClosed(String),

    #[error("codec error: {0}")]
    Codec(String),
}

impl MasterError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<IdError> for MasterError {
    fn from(err: IdError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<serde_json::Error> for MasterError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

impl From<std::io::Error> for MasterError {
    fn from(err: std::io::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

pub type MasterResult<T> = Result<T, MasterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_message() {
        let err = MasterError::QuotaExceeded(QuotaExceeded {
            dimension: "total".to_string(),
            limit: 50_000,
            current_usage: 49_950,
            requested_delta: 100,
        });
        assert!(err.is_quota_exceeded());
        assert_eq!(
            err.to_string(),
            "quota exceeded for total: limit 50000, current 49950, requested 100"
        );
    }

    #[test]
    fn test_id_errors_are_validation() {
        let err: MasterError = IdError::Empty.into();
        assert!(err.is_validation());
    }
}

//! Error types for name parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating names.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The name string is empty.
    #[error("name cannot be empty")]
    Empty,

    /// A required separator is missing.
    #[error("name missing '{expected}' separator: '{actual}'")]
    MissingSeparator { expected: char, actual: String },

    /// The sequence suffix is not a decimal number.
    #[error("invalid sequence: '{0}'")]
    InvalidSequence(String),

    /// The priority is not a number in `0..=100`.
    #[error("invalid priority: '{0}'")]
    InvalidPriority(String),

    /// The name format is invalid.
    #[error("invalid name format: {message}")]
    InvalidFormat { message: String },
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty)
    }

    /// Returns true if this error is about a numeric suffix or prefix.
    pub fn is_numeric_error(&self) -> bool {
        matches!(self, IdError::InvalidSequence(_) | IdError::InvalidPriority(_))
    }
}

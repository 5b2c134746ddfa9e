//! Error types for trace event handling.

use thiserror::Error;

/// Errors that can occur when encoding or decoding trace events.
#[derive(Debug, Error, Clone)]
pub enum EventError {
    /// The event type is unknown.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// The event data does not match the event type.
    #[error("invalid event data for {event_type}: '{data}'")]
    InvalidData { event_type: String, data: String },

    /// The trace node name is malformed.
    #[error("invalid trace record name: {0}")]
    InvalidRecordName(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        EventError::Serialization(err.to_string())
    }
}

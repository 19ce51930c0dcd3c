//! Error types for event handling.

use thiserror::Error;

/// Errors that can occur when normalizing events.
#[derive(Debug, Error, Clone)]
pub enum EventError {
    /// The envelope shape or event type is unknown.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// A required field is missing from the envelope or payload.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// The event payload is invalid.
    #[error("invalid event payload: {0}")]
    InvalidPayload(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        EventError::Serialization(err.to_string())
    }
}

impl From<cdp_id::IdError> for EventError {
    fn from(err: cdp_id::IdError) -> Self {
        EventError::InvalidPayload(err.to_string())
    }
}

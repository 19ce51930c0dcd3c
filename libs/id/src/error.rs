//! Error types for ID parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating IDs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The ID string is empty.
    #[error("{kind} cannot be empty")]
    Empty { kind: &'static str },

    /// The ID has leading or trailing whitespace.
    #[error("{kind} has surrounding whitespace: '{actual}'")]
    Whitespace { kind: &'static str, actual: String },

    /// The ID exceeds the maximum accepted length.
    #[error("{kind} exceeds {max} characters")]
    TooLong { kind: &'static str, max: usize },
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty { .. })
    }
}

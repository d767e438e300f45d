//! Error types for entity validation and label parsing.

use thiserror::Error;

/// Errors raised while validating entities or parsing label queries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// An entity was submitted without an ID.
    #[error("{kind} ID is unspecified")]
    MissingId { kind: &'static str },

    /// A label query term is not of the form `key=value`.
    #[error("invalid label query term '{term}': expected key=value")]
    InvalidLabelQuery { term: String },
}

impl ApiError {
    /// Returns true if this error indicates a missing entity ID.
    pub fn is_missing_id(&self) -> bool {
        matches!(self, ApiError::MissingId { .. })
    }
}

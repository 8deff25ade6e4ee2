//! Error types for the tidesync engine.

use crate::{RecordId, RecordType, Seq, Version};
use thiserror::Error;

/// All possible errors from the tidesync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Validation errors
    #[error("unknown record type: {0}")]
    UnknownRecordType(RecordType),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    // Change log errors
    #[error("no pending change with sequence number {0}")]
    UnknownSequence(Seq),

    // Record errors
    #[error("version regression for '{id}': current {current}, attempted {attempted}")]
    VersionRegression {
        id: RecordId,
        current: Version,
        attempted: Version,
    },

    #[error("record identifier mismatch: expected '{expected}', got '{actual}'")]
    IdentifierMismatch { expected: RecordId, actual: RecordId },

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

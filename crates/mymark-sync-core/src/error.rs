//! Error types for mymark-sync core primitives.

use thiserror::Error;

/// Errors raised while constructing or decoding core primitives.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("storage key must have at least one segment")]
    EmptyKey,

    #[error("user id must not be empty")]
    EmptyUserId,

    #[error("malformed key encoding at byte {offset}: {reason}")]
    MalformedKey { offset: usize, reason: &'static str },

    #[error("key segment is not valid UTF-8")]
    InvalidSegment(#[from] std::string::FromUtf8Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

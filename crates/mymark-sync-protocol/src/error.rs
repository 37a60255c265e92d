//! Error types for the protocol module.

use thiserror::Error;

/// Errors that can occur while encoding, decoding or moving frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame is not a well-formed protocol message.
    #[error("decode error: {0}")]
    Decode(String),

    /// Message could not be serialized.
    #[error("encode error: {0}")]
    Encode(String),

    /// A well-formed message arrived where the protocol does not allow it.
    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),

    /// The underlying connection is closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Transport-level error.
    #[error("connection error: {0}")]
    Connection(String),
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

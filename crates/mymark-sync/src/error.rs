//! Error types for the sync domain layer.

use mymark_sync_core::UserId;
use mymark_sync_protocol::ProtocolError;
use mymark_sync_store::StoreError;
use thiserror::Error;

/// Errors that can occur while managing domains and connections.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Scoping or using the chunk store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Wire-level failure.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The engine rejected an event or failed to construct.
    #[error("engine error: {0}")]
    Engine(String),

    /// The domain's engine task has stopped.
    #[error("engine for {0} is not running")]
    EngineUnavailable(UserId),

    /// A second domain was about to be registered for the same user.
    #[error("domain for {0} already exists")]
    DuplicateDomain(UserId),

    /// The domain was evicted while a connection was being attached.
    #[error("domain for {0} has been retired")]
    DomainRetired(UserId),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

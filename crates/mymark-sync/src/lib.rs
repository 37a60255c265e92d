//! # mymark-sync
//!
//! Per-user sync domains for the mymark sync server.
//!
//! ## Overview
//!
//! Each authenticated user gets one [`UserSyncDomain`]: a replication engine
//! (supplied through [`EngineFactory`]), a [`ChunkStore`] scoped to that
//! user, and the set of connections currently open for them. The
//! [`DomainManager`] creates domains lazily and routes connections to them.
//!
//! ## Data Flow
//!
//! ```text
//! socket --bytes--> AdapterHandle::receive --Forward--> engine task
//!                         |                                  |
//!                     Reply/Close                     TransportHandle::send
//!                         v                                  v
//!                    outbound queue  ---- writer task ----> socket
//! ```
//!
//! Engine callbacks run on one task per domain, so an engine never sees
//! concurrent calls. Outbound traffic from the engine never blocks: when a
//! connection's queue is full the message is dropped.
//!
//! [`ChunkStore`]: mymark_sync_store::ChunkStore

pub mod config;
pub mod connection;
pub mod domain;
pub mod engine;
pub mod error;
pub mod manager;
pub mod relay;

pub use config::SyncConfig;
pub use connection::AdapterHandle;
pub use domain::UserSyncDomain;
pub use engine::{EngineEvent, EngineFactory, SendOutcome, SyncEngine, TransportHandle};
pub use error::{Result, SyncError};
pub use manager::DomainManager;
pub use relay::{RelayEngine, RelayEngineFactory};

//! # mymark-sync Store
//!
//! Durable, user-scoped, key-addressable binary storage for sync engines.
//!
//! ## Overview
//!
//! Engines persist document state as opaque chunks addressed by hierarchical
//! [`StorageKey`](mymark_sync_core::StorageKey)s. The [`ChunkStore`] trait is
//! the four-operation interface an engine needs (`load`, `save`, `remove`,
//! plus prefix-range `load_range`/`remove_range`), always bound to a single
//! user. Backends hand out scoped stores through [`ChunkStoreProvider`].
//!
//! ## Key Types
//!
//! - [`ChunkStore`] - The async trait for chunk persistence
//! - [`SqliteDatabase`] / [`SqliteChunkStore`] - SQLite-backed storage
//! - [`MemoryDatabase`] / [`MemoryChunkStore`] - In-memory storage for tests
//! - [`DocumentRootStore`] - Per-user workspace root document records
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mymark_sync_core::{KeyPrefix, StorageKey, UserId};
//! use mymark_sync_store::{ChunkStore, SqliteDatabase};
//!
//! async fn example() {
//!     let db = SqliteDatabase::open("sync.db").unwrap();
//!     let store = db.chunk_store(UserId::new("alice").unwrap());
//!
//!     let key = StorageKey::new(["doc1", "snapshot", "abc"]).unwrap();
//!     store.save(&key, b"chunk bytes").await.unwrap();
//!
//!     let chunks = store.load_range(&KeyPrefix::new(["doc1"])).await.unwrap();
//!     assert_eq!(chunks.len(), 1);
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Upsert**: saving an existing key overwrites its data; last writer wins
//! - **Scoping**: every row carries its `user_id`; stores never see other users
//! - **Ranges**: prefix queries compare order-preserving key encodings

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::{MemoryChunkStore, MemoryDatabase};
pub use sqlite::{SqliteChunkStore, SqliteDatabase};
pub use traits::{Chunk, ChunkStore, ChunkStoreProvider, DocumentRootStore};

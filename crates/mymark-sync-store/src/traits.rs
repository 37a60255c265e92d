//! Store traits: the abstract interface for chunk persistence.
//!
//! These traits keep the sync layer storage-agnostic. Implementations
//! include SQLite (primary) and in-memory (for tests).

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use mymark_sync_core::{KeyPrefix, StorageKey, UserId};

use crate::error::Result;

/// A stored `(key, bytes)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub key: StorageKey,
    pub data: Bytes,
}

/// User-scoped chunk storage.
///
/// Every operation is implicitly scoped to [`ChunkStore::user_id`].
///
/// # Design Notes
///
/// - **Upsert**: `save` inserts or overwrites; concurrent writers to the same
///   key resolve as last-writer-wins.
/// - **Independent atomicity**: each `save`/`remove` is atomic on its own;
///   `load_range` may observe a partial snapshot under concurrent writes.
/// - **Prefix ranges**: `load_range` and `remove_range` match exactly the keys
///   whose segment sequence starts with the prefix. The empty prefix matches
///   everything.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// The user this store is bound to.
    fn user_id(&self) -> &UserId;

    /// Exact-key fetch.
    async fn load(&self, key: &StorageKey) -> Result<Option<Bytes>>;

    /// Insert or overwrite the chunk at `key`.
    async fn save(&self, key: &StorageKey, data: &[u8]) -> Result<()>;

    /// Delete the chunk at `key`. Absent keys are not an error.
    async fn remove(&self, key: &StorageKey) -> Result<()>;

    /// All chunks whose key starts with `prefix`.
    async fn load_range(&self, prefix: &KeyPrefix) -> Result<Vec<Chunk>>;

    /// Delete all chunks whose key starts with `prefix`.
    async fn remove_range(&self, prefix: &KeyPrefix) -> Result<()>;
}

/// Hands out [`ChunkStore`]s bound to a single user.
pub trait ChunkStoreProvider: Send + Sync {
    fn scoped(&self, user_id: &UserId) -> Result<Arc<dyn ChunkStore>>;
}

/// Records which document is the root of each user's workspace.
#[async_trait]
pub trait DocumentRootStore: Send + Sync {
    async fn get_root_url(&self, user_id: &UserId) -> Result<Option<String>>;

    /// Store the root URL. Fails with
    /// [`StoreError::RootAlreadyExists`](crate::StoreError::RootAlreadyExists)
    /// if the user already has one.
    async fn store_root_url(&self, user_id: &UserId, root_url: &str) -> Result<()>;
}

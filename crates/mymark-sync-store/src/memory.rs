//! In-memory implementation of the store traits.
//!
//! Primarily for testing. Same semantics as SQLite, no persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use bytes::Bytes;

use mymark_sync_core::{KeyPrefix, StorageKey, UserId};

use crate::error::{Result, StoreError};
use crate::traits::{Chunk, ChunkStore, ChunkStoreProvider, DocumentRootStore};

/// Shared in-memory database. Cloning shares the same data.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    inner: Arc<RwLock<MemoryDatabaseInner>>,
}

#[derive(Default)]
struct MemoryDatabaseInner {
    /// Chunks per user, ordered by key.
    chunks: HashMap<UserId, BTreeMap<StorageKey, Bytes>>,

    /// Workspace root per user.
    roots: HashMap<UserId, String>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunk_store(&self, user_id: UserId) -> MemoryChunkStore {
        MemoryChunkStore {
            db: self.clone(),
            user_id,
        }
    }

    /// Total chunks across all users.
    pub fn total_chunks(&self) -> usize {
        self.read()
            .map(|inner| inner.chunks.values().map(BTreeMap::len).sum())
            .unwrap_or_default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryDatabaseInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryDatabaseInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }
}

impl ChunkStoreProvider for MemoryDatabase {
    fn scoped(&self, user_id: &UserId) -> Result<Arc<dyn ChunkStore>> {
        Ok(Arc::new(self.chunk_store(user_id.clone())))
    }
}

#[async_trait]
impl DocumentRootStore for MemoryDatabase {
    async fn get_root_url(&self, user_id: &UserId) -> Result<Option<String>> {
        Ok(self.read()?.roots.get(user_id).cloned())
    }

    async fn store_root_url(&self, user_id: &UserId, root_url: &str) -> Result<()> {
        let mut inner = self.write()?;
        if inner.roots.contains_key(user_id) {
            return Err(StoreError::RootAlreadyExists(user_id.to_string()));
        }
        inner.roots.insert(user_id.clone(), root_url.to_owned());
        Ok(())
    }
}

/// In-memory [`ChunkStore`] bound to one user.
#[derive(Clone)]
pub struct MemoryChunkStore {
    db: MemoryDatabase,
    user_id: UserId,
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    fn user_id(&self) -> &UserId {
        &self.user_id
    }

    async fn load(&self, key: &StorageKey) -> Result<Option<Bytes>> {
        let inner = self.db.read()?;
        Ok(inner
            .chunks
            .get(&self.user_id)
            .and_then(|chunks| chunks.get(key))
            .cloned())
    }

    async fn save(&self, key: &StorageKey, data: &[u8]) -> Result<()> {
        let mut inner = self.db.write()?;
        inner
            .chunks
            .entry(self.user_id.clone())
            .or_default()
            .insert(key.clone(), Bytes::copy_from_slice(data));
        Ok(())
    }

    async fn remove(&self, key: &StorageKey) -> Result<()> {
        let mut inner = self.db.write()?;
        if let Some(chunks) = inner.chunks.get_mut(&self.user_id) {
            chunks.remove(key);
        }
        Ok(())
    }

    async fn load_range(&self, prefix: &KeyPrefix) -> Result<Vec<Chunk>> {
        let inner = self.db.read()?;
        let Some(chunks) = inner.chunks.get(&self.user_id) else {
            return Ok(Vec::new());
        };

        Ok(chunks
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, data)| Chunk {
                key: key.clone(),
                data: data.clone(),
            })
            .collect())
    }

    async fn remove_range(&self, prefix: &KeyPrefix) -> Result<()> {
        let mut inner = self.db.write()?;
        if let Some(chunks) = inner.chunks.get_mut(&self.user_id) {
            chunks.retain(|key, _| !key.starts_with(prefix));
        }
        Ok(())
    }
}

//! SQLite implementation of the store traits.
//!
//! This is the primary storage backend. It uses rusqlite with bundled SQLite,
//! wrapped in async via `tokio::task::spawn_blocking`. Keys are stored in a
//! single `BLOB` column using the order-preserving encoding from
//! [`mymark_sync_core::key`], so prefix ranges become plain `>=`/`<` scans.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};

use mymark_sync_core::{KeyPrefix, StorageKey, UserId};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{Chunk, ChunkStore, ChunkStoreProvider, DocumentRootStore};

/// A shared SQLite database holding every user's chunks.
///
/// Thread-safe via internal Mutex. Cloning shares the same connection.
#[derive(Clone)]
pub struct SqliteDatabase {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDatabase {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// A chunk store bound to `user_id`.
    pub fn chunk_store(&self, user_id: UserId) -> SqliteChunkStore {
        SqliteChunkStore {
            db: self.clone(),
            user_id,
        }
    }

    /// Run a blocking closure against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StoreError::Poisoned(e.to_string()))?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

impl ChunkStoreProvider for SqliteDatabase {
    fn scoped(&self, user_id: &UserId) -> Result<Arc<dyn ChunkStore>> {
        Ok(Arc::new(self.chunk_store(user_id.clone())))
    }
}

#[async_trait]
impl DocumentRootStore for SqliteDatabase {
    async fn get_root_url(&self, user_id: &UserId) -> Result<Option<String>> {
        let user = user_id.as_str().to_owned();

        self.run(move |conn| {
            let url = conn
                .query_row(
                    "SELECT root_url FROM document_roots WHERE user_id = ?1",
                    params![user],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(url)
        })
        .await
    }

    async fn store_root_url(&self, user_id: &UserId, root_url: &str) -> Result<()> {
        let user = user_id.as_str().to_owned();
        let root_url = root_url.to_owned();

        self.run(move |conn| {
            let now = now_millis();
            let inserted = conn.execute(
                "INSERT INTO document_roots (user_id, root_url, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(user_id) DO NOTHING",
                params![user, root_url, now],
            )?;
            if inserted == 0 {
                return Err(StoreError::RootAlreadyExists(user));
            }
            Ok(())
        })
        .await
    }
}

/// SQLite-backed [`ChunkStore`] bound to one user.
#[derive(Clone)]
pub struct SqliteChunkStore {
    db: SqliteDatabase,
    user_id: UserId,
}

impl SqliteChunkStore {
    /// Number of rows this user owns. Mostly useful to tests.
    pub async fn row_count(&self) -> Result<u64> {
        let user = self.user_id.as_str().to_owned();

        self.db
            .run(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM chunks WHERE user_id = ?1",
                    params![user],
                    |row| row.get(0),
                )?;
                Ok(count as u64)
            })
            .await
    }
}

#[async_trait]
impl ChunkStore for SqliteChunkStore {
    fn user_id(&self) -> &UserId {
        &self.user_id
    }

    async fn load(&self, key: &StorageKey) -> Result<Option<Bytes>> {
        let user = self.user_id.as_str().to_owned();
        let key = key.encode();

        self.db
            .run(move |conn| {
                let data: Option<Vec<u8>> = conn
                    .query_row(
                        "SELECT data FROM chunks WHERE user_id = ?1 AND key = ?2",
                        params![user, key],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(data.map(Bytes::from))
            })
            .await
    }

    async fn save(&self, key: &StorageKey, data: &[u8]) -> Result<()> {
        let user = self.user_id.as_str().to_owned();
        let key = key.encode();
        let data = data.to_vec();

        self.db
            .run(move |conn| {
                conn.execute(
                    "INSERT INTO chunks (user_id, key, data, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?4)
                     ON CONFLICT(user_id, key) DO UPDATE SET
                        data = excluded.data,
                        updated_at = excluded.updated_at",
                    params![user, key, data, now_millis()],
                )?;
                Ok(())
            })
            .await
    }

    async fn remove(&self, key: &StorageKey) -> Result<()> {
        let user = self.user_id.as_str().to_owned();
        let key = key.encode();

        self.db
            .run(move |conn| {
                conn.execute(
                    "DELETE FROM chunks WHERE user_id = ?1 AND key = ?2",
                    params![user, key],
                )?;
                Ok(())
            })
            .await
    }

    async fn load_range(&self, prefix: &KeyPrefix) -> Result<Vec<Chunk>> {
        let user = self.user_id.as_str().to_owned();
        let range = prefix.range();

        self.db
            .run(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT key, data FROM chunks
                     WHERE user_id = ?1 AND key >= ?2 AND (?3 IS NULL OR key < ?3)
                     ORDER BY key",
                )?;

                let rows = stmt
                    .query_map(params![user, range.lower, range.upper], |row| {
                        let key: Vec<u8> = row.get(0)?;
                        let data: Vec<u8> = row.get(1)?;
                        Ok((key, data))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                rows.into_iter()
                    .map(|(key, data)| {
                        Ok(Chunk {
                            key: StorageKey::decode(&key)?,
                            data: Bytes::from(data),
                        })
                    })
                    .collect()
            })
            .await
    }

    async fn remove_range(&self, prefix: &KeyPrefix) -> Result<()> {
        let user = self.user_id.as_str().to_owned();
        let range = prefix.range();

        self.db
            .run(move |conn| {
                let removed = conn.execute(
                    "DELETE FROM chunks
                     WHERE user_id = ?1 AND key >= ?2 AND (?3 IS NULL OR key < ?3)",
                    params![user, range.lower, range.upper],
                )?;
                tracing::trace!(removed, "removed chunk range");
                Ok(())
            })
            .await
    }
}

/// Get current time in milliseconds.
pub(crate) fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(segments: &[&str]) -> StorageKey {
        StorageKey::new(segments.iter().copied()).unwrap()
    }

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let db = SqliteDatabase::open_memory().unwrap();
        let store = db.chunk_store(user("alice"));

        store.save(&key(&["doc1", "snapshot"]), b"hello").await.unwrap();

        let loaded = store.load(&key(&["doc1", "snapshot"])).await.unwrap();
        assert_eq!(loaded.as_deref(), Some(&b"hello"[..]));
        assert!(store.load(&key(&["doc1"])).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_keeps_single_row() {
        let db = SqliteDatabase::open_memory().unwrap();
        let store = db.chunk_store(user("alice"));
        let k = key(&["doc1", "incremental", "h1"]);

        store.save(&k, b"first").await.unwrap();
        store.save(&k, b"second").await.unwrap();

        assert_eq!(store.load(&k).await.unwrap().as_deref(), Some(&b"second"[..]));
        assert_eq!(store.row_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upsert_bumps_updated_at() {
        let db = SqliteDatabase::open_memory().unwrap();
        let store = db.chunk_store(user("alice"));
        let k = key(&["doc1"]);

        store.save(&k, b"a").await.unwrap();
        db.run(|conn| {
            conn.execute("UPDATE chunks SET updated_at = 0, created_at = 0", [])?;
            Ok(())
        })
        .await
        .unwrap();
        store.save(&k, b"b").await.unwrap();

        let (created, updated): (i64, i64) = db
            .run(|conn| {
                Ok(conn.query_row("SELECT created_at, updated_at FROM chunks", [], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?)
            })
            .await
            .unwrap();
        assert_eq!(created, 0);
        assert!(updated > 0);
    }

    #[tokio::test]
    async fn test_remove_absent_is_ok() {
        let db = SqliteDatabase::open_memory().unwrap();
        let store = db.chunk_store(user("alice"));

        store.remove(&key(&["missing"])).await.unwrap();

        store.save(&key(&["doc1"]), b"x").await.unwrap();
        store.remove(&key(&["doc1"])).await.unwrap();
        assert!(store.load(&key(&["doc1"])).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_range_by_prefix() {
        let db = SqliteDatabase::open_memory().unwrap();
        let store = db.chunk_store(user("alice"));

        store.save(&key(&["doc1", "a"]), b"1a").await.unwrap();
        store.save(&key(&["doc1", "b"]), b"1b").await.unwrap();
        store.save(&key(&["doc2", "a"]), b"2a").await.unwrap();
        store.save(&key(&["doc10", "a"]), b"10a").await.unwrap();

        let chunks = store.load_range(&KeyPrefix::new(["doc1"])).await.unwrap();
        let keys: Vec<_> = chunks.iter().map(|c| c.key.clone()).collect();
        assert_eq!(keys, vec![key(&["doc1", "a"]), key(&["doc1", "b"])]);

        let all = store.load_range(&KeyPrefix::all()).await.unwrap();
        assert_eq!(all.len(), 4);
    }

    #[tokio::test]
    async fn test_full_key_prefix_includes_extensions_not_siblings() {
        let db = SqliteDatabase::open_memory().unwrap();
        let store = db.chunk_store(user("alice"));

        store.save(&key(&["doc1", "a"]), b"exact").await.unwrap();
        store.save(&key(&["doc1", "a", "x"]), b"child").await.unwrap();
        store.save(&key(&["doc1", "ab"]), b"sibling").await.unwrap();

        let chunks = store
            .load_range(&KeyPrefix::from(key(&["doc1", "a"])))
            .await
            .unwrap();
        let data: Vec<_> = chunks.iter().map(|c| c.data.clone()).collect();
        assert_eq!(data, vec![Bytes::from_static(b"exact"), Bytes::from_static(b"child")]);
    }

    #[tokio::test]
    async fn test_remove_range_leaves_other_keys() {
        let db = SqliteDatabase::open_memory().unwrap();
        let store = db.chunk_store(user("alice"));

        store.save(&key(&["doc1", "a"]), b"1").await.unwrap();
        store.save(&key(&["doc1", "b"]), b"2").await.unwrap();
        store.save(&key(&["doc2", "a"]), b"3").await.unwrap();

        store.remove_range(&KeyPrefix::new(["doc1"])).await.unwrap();

        assert!(store.load_range(&KeyPrefix::new(["doc1"])).await.unwrap().is_empty());
        assert!(store.load(&key(&["doc2", "a"])).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_users_are_isolated() {
        let db = SqliteDatabase::open_memory().unwrap();
        let alice = db.chunk_store(user("alice"));
        let bob = db.chunk_store(user("bob"));
        let k = key(&["doc1"]);

        alice.save(&k, b"alice").await.unwrap();
        bob.save(&k, b"bob").await.unwrap();
        alice.remove_range(&KeyPrefix::all()).await.unwrap();

        assert!(alice.load(&k).await.unwrap().is_none());
        assert_eq!(bob.load(&k).await.unwrap().as_deref(), Some(&b"bob"[..]));
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.db");
        let k = key(&["doc1", "snapshot"]);

        {
            let db = SqliteDatabase::open(&path).unwrap();
            db.chunk_store(user("alice")).save(&k, b"durable").await.unwrap();
        }

        let db = SqliteDatabase::open(&path).unwrap();
        let loaded = db.chunk_store(user("alice")).load(&k).await.unwrap();
        assert_eq!(loaded.as_deref(), Some(&b"durable"[..]));
    }

    #[tokio::test]
    async fn test_document_root_stored_once() {
        let db = SqliteDatabase::open_memory().unwrap();
        let alice = user("alice");

        assert!(db.get_root_url(&alice).await.unwrap().is_none());
        db.store_root_url(&alice, "automerge:abc").await.unwrap();
        assert_eq!(
            db.get_root_url(&alice).await.unwrap().as_deref(),
            Some("automerge:abc")
        );

        let err = db.store_root_url(&alice, "automerge:def").await.unwrap_err();
        assert!(matches!(err, StoreError::RootAlreadyExists(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_saves_keep_one_row() {
        let db = SqliteDatabase::open_memory().unwrap();
        let store = Arc::new(db.chunk_store(user("alice")));
        let k = key(&["doc1", "snapshot"]);

        let mut tasks = Vec::new();
        for i in 0..16u8 {
            let store = Arc::clone(&store);
            let k = k.clone();
            tasks.push(tokio::spawn(async move {
                store.save(&k, &[i; 4]).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(store.row_count().await.unwrap(), 1);
        let loaded = store.load(&k).await.unwrap().unwrap();
        assert!((0..16u8).any(|i| loaded[..] == [i; 4]));
    }

    #[tokio::test]
    async fn test_poisoned_connection_reports_poisoned() {
        let db = SqliteDatabase::open_memory().unwrap();
        let conn = Arc::clone(&db.conn);
        let _ = std::thread::spawn(move || {
            let _guard = conn.lock().unwrap();
            panic!("poison the connection");
        })
        .join();

        let err = db
            .chunk_store(user("alice"))
            .load(&key(&["doc1"]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Poisoned(_)));
    }
}

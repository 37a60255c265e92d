//! Chunk store properties, checked against a reference model for both
//! backends.

use std::collections::BTreeMap;
use std::sync::Arc;

use proptest::prelude::*;

use mymark_sync_core::{KeyPrefix, StorageKey, UserId};
use mymark_sync_store::{ChunkStore, ChunkStoreProvider, MemoryDatabase, SqliteDatabase};
use mymark_sync_testkit::generators::{chunk_set, key_prefix};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn backends(user: &UserId) -> Vec<(&'static str, Arc<dyn ChunkStore>)> {
    let sqlite = SqliteDatabase::open_memory().unwrap();
    vec![
        ("memory", MemoryDatabase::new().scoped(user).unwrap()),
        ("sqlite", sqlite.scoped(user).unwrap()),
    ]
}

/// Last write per key wins, like the stores.
fn model(chunks: &[(StorageKey, Vec<u8>)]) -> BTreeMap<StorageKey, Vec<u8>> {
    chunks.iter().cloned().collect()
}

async fn seed(store: &dyn ChunkStore, chunks: &[(StorageKey, Vec<u8>)]) {
    for (key, data) in chunks {
        store.save(key, data).await.unwrap();
    }
}

async fn snapshot(store: &dyn ChunkStore) -> BTreeMap<StorageKey, Vec<u8>> {
    store
        .load_range(&KeyPrefix::all())
        .await
        .unwrap()
        .into_iter()
        .map(|chunk| (chunk.key, chunk.data.to_vec()))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_load_range_matches_model(chunks in chunk_set(24), prefix in key_prefix()) {
        let rt = runtime();
        let alice = UserId::new("alice").unwrap();
        let expected: BTreeMap<_, _> = model(&chunks)
            .into_iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .collect();

        for (name, store) in backends(&alice) {
            let loaded = rt.block_on(async {
                seed(store.as_ref(), &chunks).await;
                store.load_range(&prefix).await.unwrap()
            });
            let loaded: BTreeMap<_, _> = loaded
                .into_iter()
                .map(|chunk| (chunk.key, chunk.data.to_vec()))
                .collect();
            prop_assert_eq!(&loaded, &expected, "backend {}", name);
        }
    }

    #[test]
    fn test_remove_range_keeps_the_complement(chunks in chunk_set(24), prefix in key_prefix()) {
        let rt = runtime();
        let alice = UserId::new("alice").unwrap();
        let expected: BTreeMap<_, _> = model(&chunks)
            .into_iter()
            .filter(|(key, _)| !key.starts_with(&prefix))
            .collect();

        for (name, store) in backends(&alice) {
            let remaining = rt.block_on(async {
                seed(store.as_ref(), &chunks).await;
                store.remove_range(&prefix).await.unwrap();
                snapshot(store.as_ref()).await
            });
            prop_assert_eq!(&remaining, &expected, "backend {}", name);
        }
    }

    #[test]
    fn test_exact_load_sees_last_write(chunks in chunk_set(16)) {
        let rt = runtime();
        let alice = UserId::new("alice").unwrap();
        let expected = model(&chunks);

        for (name, store) in backends(&alice) {
            rt.block_on(seed(store.as_ref(), &chunks));
            for (key, data) in &expected {
                let loaded = rt.block_on(store.load(key)).unwrap();
                prop_assert_eq!(loaded.as_deref(), Some(data.as_slice()), "backend {}", name);
            }
        }
    }
}

#[tokio::test]
async fn test_users_never_see_each_other() {
    let key = StorageKey::new(["doc1", "snapshot"]).unwrap();
    let alice = UserId::new("alice").unwrap();
    let bob = UserId::new("bob").unwrap();

    let sqlite = SqliteDatabase::open_memory().unwrap();
    let memory = MemoryDatabase::new();
    let providers: Vec<(&str, Arc<dyn ChunkStoreProvider>)> =
        vec![("memory", Arc::new(memory)), ("sqlite", Arc::new(sqlite))];

    for (name, provider) in providers {
        let a = provider.scoped(&alice).unwrap();
        let b = provider.scoped(&bob).unwrap();

        a.save(&key, b"alice").await.unwrap();
        assert_eq!(b.load(&key).await.unwrap(), None, "backend {}", name);
        assert!(b.load_range(&KeyPrefix::all()).await.unwrap().is_empty());

        b.remove_range(&KeyPrefix::all()).await.unwrap();
        assert_eq!(
            a.load(&key).await.unwrap().as_deref(),
            Some(&b"alice"[..]),
            "backend {}",
            name
        );
    }
}

#[tokio::test]
async fn test_sqlite_chunks_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sync.db");
    let alice = UserId::new("alice").unwrap();
    let key = StorageKey::new(["doc1", "incremental", "laptop"]).unwrap();

    {
        let db = SqliteDatabase::open(&path).unwrap();
        let store = db.chunk_store(alice.clone());
        store.save(&key, b"first").await.unwrap();
        store.save(&key, b"second").await.unwrap();
    }

    let db = SqliteDatabase::open(&path).unwrap();
    let store = db.chunk_store(alice);
    assert_eq!(store.load(&key).await.unwrap().as_deref(), Some(&b"second"[..]));
    assert_eq!(store.row_count().await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_saves_to_one_key_keep_one_chunk() {
    let alice = UserId::new("alice").unwrap();
    let key = StorageKey::new(["doc1", "snapshot"]).unwrap();
    let writes: Vec<Vec<u8>> = (0..16u8).map(|i| vec![i; 8]).collect();

    for (name, store) in backends(&alice) {
        let mut tasks = Vec::new();
        for data in writes.clone() {
            let store = Arc::clone(&store);
            let key = key.clone();
            tasks.push(tokio::spawn(async move {
                store.save(&key, &data).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let chunks = store.load_range(&KeyPrefix::all()).await.unwrap();
        assert_eq!(chunks.len(), 1, "backend {}", name);
        let loaded = store.load(&key).await.unwrap().unwrap();
        assert!(
            writes.iter().any(|w| loaded[..] == w[..]),
            "backend {} kept a value nobody wrote",
            name
        );
    }
}

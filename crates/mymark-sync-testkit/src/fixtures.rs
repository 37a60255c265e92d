//! Test fixtures and helpers.
//!
//! Engine doubles that record what the domain layer tells them, and builders
//! for the frames a client would send.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use mymark_sync::{
    DomainManager, EngineFactory, Result, SyncConfig, SyncEngine, SyncError, TransportHandle,
};
use mymark_sync_core::{DocumentId, PeerId, PeerMetadata, StorageKey, TransportId, UserId};
use mymark_sync_protocol::{JoinMessage, LeaveMessage, RepoMessage, WireMessage};
use mymark_sync_store::{ChunkStore, MemoryDatabase};

/// One callback observed by a [`RecordingEngine`].
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Attached(TransportId),
    Detached(TransportId),
    PeerCandidate(TransportId, PeerId),
    PeerDisconnected(TransportId, PeerId),
    Inbound(TransportId, RepoMessage),
    Shutdown,
}

/// Shared, append-only record of engine callbacks for one user.
#[derive(Debug, Clone, Default)]
pub struct EngineLog {
    events: Arc<Mutex<Vec<Recorded>>>,
    transports: Arc<Mutex<HashMap<TransportId, TransportHandle>>>,
}

impl EngineLog {
    pub fn events(&self) -> Vec<Recorded> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The handle the engine was given for `id`, while attached.
    pub fn transport(&self, id: TransportId) -> Option<TransportHandle> {
        self.transports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn count(&self, pred: impl Fn(&Recorded) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }

    /// Poll until `pred` holds for the log or `timeout` passes.
    pub async fn wait_for(&self, timeout: Duration, pred: impl Fn(&[Recorded]) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if pred(&self.events()) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn push(&self, event: Recorded) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// Engine double.
///
/// Records every callback. Inbound repo messages that carry a document id
/// and a `data` payload are saved to storage under
/// `[document_id, "incremental", sender_id]`.
pub struct RecordingEngine {
    log: EngineLog,
    storage: Arc<dyn ChunkStore>,
}

impl RecordingEngine {
    pub fn new(log: EngineLog, storage: Arc<dyn ChunkStore>) -> Self {
        Self { log, storage }
    }
}

#[async_trait]
impl SyncEngine for RecordingEngine {
    async fn attach_transport(&mut self, transport: TransportHandle) -> Result<()> {
        let id = transport.id();
        self.log
            .transports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, transport);
        self.log.push(Recorded::Attached(id));
        Ok(())
    }

    async fn detach_transport(&mut self, transport_id: TransportId) -> Result<()> {
        self.log
            .transports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&transport_id);
        self.log.push(Recorded::Detached(transport_id));
        Ok(())
    }

    async fn peer_candidate(
        &mut self,
        transport_id: TransportId,
        peer_id: PeerId,
        _metadata: PeerMetadata,
    ) -> Result<()> {
        self.log.push(Recorded::PeerCandidate(transport_id, peer_id));
        Ok(())
    }

    async fn peer_disconnected(&mut self, transport_id: TransportId, peer_id: PeerId) -> Result<()> {
        self.log.push(Recorded::PeerDisconnected(transport_id, peer_id));
        Ok(())
    }

    async fn inbound_message(&mut self, transport_id: TransportId, message: RepoMessage) -> Result<()> {
        if let (Some(document_id), Some(data)) = (message.document_id(), message.data()) {
            let key = StorageKey::new([
                document_id.as_str(),
                "incremental",
                message.sender_id().as_str(),
            ])
            .map_err(|e| SyncError::Engine(e.to_string()))?;
            self.storage.save(&key, data).await?;
        }
        self.log.push(Recorded::Inbound(transport_id, message));
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.log.push(Recorded::Shutdown);
        Ok(())
    }
}

/// Builds [`RecordingEngine`]s and keeps each user's log reachable.
#[derive(Debug, Clone, Default)]
pub struct RecordingEngineFactory {
    logs: Arc<Mutex<HashMap<UserId, EngineLog>>>,
    created: Arc<AtomicUsize>,
}

impl RecordingEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The log for `user_id`, shared with its engine once built.
    pub fn log(&self, user_id: &UserId) -> EngineLog {
        self.logs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(user_id.clone())
            .or_default()
            .clone()
    }

    /// How many engines were constructed.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineFactory for RecordingEngineFactory {
    type Engine = RecordingEngine;

    async fn create(
        &self,
        user_id: &UserId,
        _peer_id: &PeerId,
        storage: Arc<dyn ChunkStore>,
    ) -> Result<RecordingEngine> {
        // Widen the window for racing constructions.
        tokio::task::yield_now().await;
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(RecordingEngine::new(self.log(user_id), storage))
    }
}

/// Always fails to construct an engine.
#[derive(Debug, Clone, Default)]
pub struct FailingEngineFactory;

#[async_trait]
impl EngineFactory for FailingEngineFactory {
    type Engine = RecordingEngine;

    async fn create(
        &self,
        user_id: &UserId,
        _peer_id: &PeerId,
        _storage: Arc<dyn ChunkStore>,
    ) -> Result<RecordingEngine> {
        Err(SyncError::Engine(format!("no engine for {}", user_id)))
    }
}

/// A manager over in-memory storage with a recording factory.
pub struct TestDomains {
    pub manager: Arc<DomainManager<RecordingEngineFactory>>,
    pub factory: RecordingEngineFactory,
    pub db: MemoryDatabase,
}

impl TestDomains {
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    pub fn with_config(config: SyncConfig) -> Self {
        let factory = RecordingEngineFactory::new();
        let db = MemoryDatabase::new();
        let manager = Arc::new(DomainManager::new(
            factory.clone(),
            Arc::new(db.clone()),
            config,
        ));
        Self {
            manager,
            factory,
            db,
        }
    }
}

impl Default for TestDomains {
    fn default() -> Self {
        Self::new()
    }
}

pub fn user(id: &str) -> UserId {
    UserId::new(id).unwrap()
}

/// A `join` from `sender` advertising protocol `"1"`.
pub fn join_frame(sender: &str) -> Bytes {
    join_frame_with_versions(sender, Some(vec!["1".to_string()]))
}

pub fn join_frame_with_versions(sender: &str, versions: Option<Vec<String>>) -> Bytes {
    WireMessage::Join(JoinMessage {
        sender_id: PeerId::new(sender),
        peer_metadata: Some(PeerMetadata::new().with("isEphemeral", false)),
        supported_protocol_versions: versions,
    })
    .encode()
    .unwrap()
}

pub fn leave_frame(sender: &str) -> Bytes {
    WireMessage::Leave(LeaveMessage {
        sender_id: PeerId::new(sender),
    })
    .encode()
    .unwrap()
}

/// A `sync` message from `sender` to `target` about `document`.
pub fn sync_message(sender: &str, target: &str, document: &str, data: &[u8]) -> RepoMessage {
    RepoMessage::new(
        "sync",
        PeerId::new(sender),
        PeerId::new(target),
        Some(DocumentId::new(document)),
        data.to_vec(),
    )
    .unwrap()
}

pub fn sync_frame(sender: &str, target: &str, document: &str, data: &[u8]) -> Bytes {
    sync_message(sender, target, document, data).as_bytes().clone()
}

/// Bytes that never decode: a lone CBOR break code.
pub fn garbage_frame() -> Bytes {
    Bytes::from_static(&[0xff, 0x01, 0x02])
}

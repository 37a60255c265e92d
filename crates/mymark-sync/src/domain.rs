//! One user's sync domain: engine task, scoped storage and live adapters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use mymark_sync_core::{PeerId, TransportId, UserId};
use mymark_sync_protocol::{Connection, LocalPeer};
use mymark_sync_store::ChunkStore;

use crate::config::SyncConfig;
use crate::connection::AdapterHandle;
use crate::engine::{run_engine, EngineEvent, SyncEngine};
use crate::error::{Result, SyncError};

/// A user's engine together with its storage and attached connections.
///
/// Constructed once per user by the
/// [`DomainManager`](crate::DomainManager); the engine runs on its own task
/// and is never shared with another user.
pub struct UserSyncDomain {
    user_id: UserId,
    peer_id: PeerId,
    storage: Arc<dyn ChunkStore>,
    engine_tx: mpsc::Sender<EngineEvent>,
    engine_task: Mutex<Option<JoinHandle<()>>>,
    adapters: Mutex<HashMap<TransportId, AdapterHandle>>,
    retired: AtomicBool,
}

impl std::fmt::Debug for UserSyncDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserSyncDomain")
            .field("user_id", &self.user_id)
            .field("peer_id", &self.peer_id)
            .field("connections", &self.connection_count())
            .field("retired", &self.is_retired())
            .finish()
    }
}

impl UserSyncDomain {
    /// Start the engine task and wrap it in a domain.
    pub(crate) fn start<E: SyncEngine>(
        user_id: UserId,
        peer_id: PeerId,
        storage: Arc<dyn ChunkStore>,
        engine: E,
        engine_queue_capacity: usize,
    ) -> Self {
        let (engine_tx, engine_rx) = mpsc::channel(engine_queue_capacity.max(1));
        let task = tokio::spawn(run_engine(user_id.clone(), engine, engine_rx));

        Self {
            user_id,
            peer_id,
            storage,
            engine_tx,
            engine_task: Mutex::new(Some(task)),
            adapters: Mutex::new(HashMap::new()),
            retired: AtomicBool::new(false),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// The server's peer id inside this domain.
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn storage(&self) -> &Arc<dyn ChunkStore> {
        &self.storage
    }

    pub fn connection_count(&self) -> usize {
        self.adapters().len()
    }

    pub fn connections(&self) -> Vec<AdapterHandle> {
        self.adapters().values().cloned().collect()
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// Register a new connection and hand it to the engine.
    pub(crate) async fn attach(
        &self,
        transport_id: TransportId,
        connection: Arc<dyn Connection>,
        config: &SyncConfig,
    ) -> Result<AdapterHandle> {
        let (handle, transport) = {
            let mut adapters = self.adapters();
            if self.is_retired() {
                return Err(SyncError::DomainRetired(self.user_id.clone()));
            }

            let local = LocalPeer::new(self.peer_id.clone(), config.local_metadata.clone());
            let (handle, transport) = AdapterHandle::spawn(
                transport_id,
                self.user_id.clone(),
                local,
                connection,
                config.outbound_queue_capacity,
                self.engine_tx.clone(),
            );
            adapters.insert(transport_id, handle.clone());
            (handle, transport)
        };

        if self.engine_tx.send(EngineEvent::Attach(transport)).await.is_err() {
            self.adapters().remove(&transport_id);
            handle.abort().await;
            return Err(SyncError::EngineUnavailable(self.user_id.clone()));
        }
        handle.attached().await?;

        tracing::debug!(
            user_id = %self.user_id,
            transport_id = %transport_id,
            "connection attached"
        );
        Ok(handle)
    }

    /// Remove a connection, tell the engine, and close it.
    pub(crate) async fn detach(&self, handle: &AdapterHandle) -> Result<()> {
        let removed = self.adapters().remove(&handle.id()).is_some();

        let disconnected = handle.disconnect().await;
        if removed {
            self.engine_tx
                .send(EngineEvent::Detach(handle.id()))
                .await
                .map_err(|_| SyncError::EngineUnavailable(self.user_id.clone()))?;
            tracing::debug!(
                user_id = %self.user_id,
                transport_id = %handle.id(),
                "connection detached"
            );
        }
        disconnected
    }

    /// Mark the domain retired if it has no connections.
    ///
    /// Runs under the adapter lock, so a concurrent attach either lands first
    /// (and the domain stays) or sees the flag and fails with
    /// [`SyncError::DomainRetired`].
    pub(crate) fn retire_if_idle(&self) -> bool {
        let adapters = self.adapters();
        if !adapters.is_empty() || self.is_retired() {
            return false;
        }
        self.retired.store(true, Ordering::SeqCst);
        true
    }

    /// Retire unconditionally and return the connections that were open.
    pub(crate) fn retire(&self) -> Vec<AdapterHandle> {
        let mut adapters = self.adapters();
        self.retired.store(true, Ordering::SeqCst);
        adapters.drain().map(|(_, handle)| handle).collect()
    }

    /// Stop the engine task and wait for it.
    pub(crate) async fn stop_engine(&self) {
        let task = self
            .engine_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(task) = task else {
            return;
        };

        // Waits for queue space. A closed queue means the task already exited.
        let _ = self.engine_tx.send(EngineEvent::Shutdown).await;
        if let Err(e) = task.await {
            tracing::error!(user_id = %self.user_id, error = %e, "engine task panicked");
        }
    }

    fn adapters(&self) -> MutexGuard<'_, HashMap<TransportId, AdapterHandle>> {
        self.adapters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

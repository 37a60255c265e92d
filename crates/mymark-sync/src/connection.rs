//! Live adapters: one per open connection.
//!
//! An [`AdapterHandle`] owns the protocol state machine for a connection and
//! carries out its effects: replies and close requests go to the outbound
//! writer task, everything else becomes an [`EngineEvent`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use mymark_sync_core::{PeerId, TransportId, UserId};
use mymark_sync_protocol::{
    AdapterEvent, AdapterState, CloseReason, Connection, Effect, LocalPeer, TransportAdapter,
};

use crate::engine::{EngineEvent, Outbound, TransportHandle};
use crate::error::{Result, SyncError};

/// Handle to one attached connection. Cloning shares the same adapter.
#[derive(Clone)]
pub struct AdapterHandle {
    inner: Arc<AdapterInner>,
}

struct AdapterInner {
    id: TransportId,
    user_id: UserId,
    adapter: Mutex<TransportAdapter>,
    closed: AtomicBool,
    outbound: mpsc::Sender<Outbound>,
    engine: mpsc::Sender<EngineEvent>,
}

impl std::fmt::Debug for AdapterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterHandle")
            .field("id", &self.inner.id)
            .field("user_id", &self.inner.user_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl AdapterHandle {
    /// Create the adapter and spawn its outbound writer.
    pub(crate) fn spawn(
        id: TransportId,
        user_id: UserId,
        local: LocalPeer,
        connection: Arc<dyn Connection>,
        outbound_capacity: usize,
        engine: mpsc::Sender<EngineEvent>,
    ) -> (Self, TransportHandle) {
        let (outbound, rx) = mpsc::channel(outbound_capacity.max(1));
        spawn_writer(id, connection, rx);

        let handle = Self {
            inner: Arc::new(AdapterInner {
                id,
                user_id,
                adapter: Mutex::new(TransportAdapter::new(local)),
                closed: AtomicBool::new(false),
                outbound: outbound.clone(),
                engine,
            }),
        };
        (handle, TransportHandle::new(id, outbound))
    }

    pub fn id(&self) -> TransportId {
        self.inner.id
    }

    pub fn user_id(&self) -> &UserId {
        &self.inner.user_id
    }

    /// Feed one inbound frame through the protocol.
    ///
    /// Frames from one connection must be passed in arrival order.
    pub async fn receive(&self, frame: Bytes) -> Result<()> {
        self.apply(AdapterEvent::Received(frame)).await
    }

    /// Tear down the adapter. Idempotent.
    pub async fn disconnect(&self) -> Result<()> {
        self.apply(AdapterEvent::Disconnect).await
    }

    pub(crate) async fn attached(&self) -> Result<()> {
        self.apply(AdapterEvent::Attached).await
    }

    pub async fn state(&self) -> AdapterState {
        self.inner.adapter.lock().await.state().clone()
    }

    pub async fn remote_peer_id(&self) -> Option<PeerId> {
        self.inner.adapter.lock().await.remote_peer_id().cloned()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Close the writer without running the protocol. Used when attach fails.
    pub(crate) async fn abort(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let _ = self
            .inner
            .outbound
            .send(Outbound::Close(CloseReason::Internal))
            .await;
    }

    async fn apply(&self, event: AdapterEvent) -> Result<()> {
        // Held across effects so two callers cannot interleave them.
        let mut adapter = self.inner.adapter.lock().await;
        let effects = adapter.handle(event);
        if adapter.is_closed() {
            self.inner.closed.store(true, Ordering::SeqCst);
        }

        // A stopped engine must not keep the connection open.
        let mut first_error = None;
        for effect in effects {
            if let Err(e) = self.carry_out(effect).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn carry_out(&self, effect: Effect) -> Result<()> {
        let id = self.inner.id;
        match effect {
            Effect::Reply(frame) => {
                if self.inner.outbound.send(Outbound::Frame(frame)).await.is_err() {
                    tracing::debug!(transport_id = %id, "reply after writer stopped");
                }
            }
            Effect::Close(reason) => {
                tracing::info!(
                    user_id = %self.inner.user_id,
                    transport_id = %id,
                    reason = %reason,
                    "closing connection"
                );
                let _ = self.inner.outbound.send(Outbound::Close(reason)).await;
            }
            Effect::PeerCandidate { peer_id, metadata } => {
                tracing::info!(
                    user_id = %self.inner.user_id,
                    transport_id = %id,
                    peer_id = %peer_id,
                    "peer joined"
                );
                self.to_engine(EngineEvent::PeerCandidate {
                    transport_id: id,
                    peer_id,
                    metadata,
                })
                .await?;
            }
            Effect::Forward(message) => {
                self.to_engine(EngineEvent::Inbound {
                    transport_id: id,
                    message,
                })
                .await?;
            }
            Effect::PeerDisconnected(peer_id) => {
                self.to_engine(EngineEvent::PeerDisconnected {
                    transport_id: id,
                    peer_id,
                })
                .await?;
            }
        }
        Ok(())
    }

    async fn to_engine(&self, event: EngineEvent) -> Result<()> {
        self.inner
            .engine
            .send(event)
            .await
            .map_err(|_| SyncError::EngineUnavailable(self.inner.user_id.clone()))
    }
}

/// Drain the outbound queue into the connection until told to close.
fn spawn_writer(
    id: TransportId,
    connection: Arc<dyn Connection>,
    mut rx: mpsc::Receiver<Outbound>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Frame(frame) => {
                    if !connection.is_writable() {
                        tracing::debug!(
                            transport_id = %id,
                            "connection not writable, dropping frame"
                        );
                        continue;
                    }
                    if let Err(e) = connection.send(frame).await {
                        tracing::debug!(transport_id = %id, error = %e, "write failed");
                    }
                }
                Outbound::Close(_) => break,
            }
        }

        rx.close();
        if let Err(e) = connection.close().await {
            tracing::debug!(transport_id = %id, error = %e, "close failed");
        }
        tracing::trace!(transport_id = %id, "writer stopped");
    })
}

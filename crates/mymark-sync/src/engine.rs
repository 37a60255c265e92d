//! The engine collaborator contract.
//!
//! A [`SyncEngine`] is the document replication engine for one user. It is
//! owned by exactly one domain and driven from a single task, so every
//! callback takes `&mut self` and runs serialized.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use mymark_sync_core::{PeerId, PeerMetadata, TransportId, UserId};
use mymark_sync_protocol::{CloseReason, RepoMessage};
use mymark_sync_store::ChunkStore;

use crate::error::Result;

/// Per-user replication engine.
#[async_trait]
pub trait SyncEngine: Send + 'static {
    /// A new transport is available. The engine may send through it at once.
    async fn attach_transport(&mut self, transport: TransportHandle) -> Result<()>;

    /// The transport is gone; drop any handle to it.
    async fn detach_transport(&mut self, transport_id: TransportId) -> Result<()>;

    /// A remote peer completed the handshake on `transport_id`.
    async fn peer_candidate(
        &mut self,
        transport_id: TransportId,
        peer_id: PeerId,
        metadata: PeerMetadata,
    ) -> Result<()>;

    /// The remote peer on `transport_id` went away.
    async fn peer_disconnected(&mut self, transport_id: TransportId, peer_id: PeerId)
        -> Result<()>;

    /// A repo message arrived from the peer on `transport_id`.
    async fn inbound_message(&mut self, transport_id: TransportId, message: RepoMessage)
        -> Result<()>;

    /// Called once before the engine task exits.
    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Builds one engine per user domain.
#[async_trait]
pub trait EngineFactory: Send + Sync + 'static {
    type Engine: SyncEngine;

    /// Construct the engine for `user_id`.
    ///
    /// `peer_id` is the identity the engine presents to clients; `storage`
    /// is already scoped to the user.
    async fn create(
        &self,
        user_id: &UserId,
        peer_id: &PeerId,
        storage: Arc<dyn ChunkStore>,
    ) -> Result<Self::Engine>;
}

/// What a connection's writer is asked to do.
#[derive(Debug)]
pub(crate) enum Outbound {
    Frame(bytes::Bytes),
    Close(CloseReason),
}

/// Result of [`TransportHandle::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Queued,
    /// The outbound queue was full; the message was discarded.
    Dropped,
    /// The connection has closed.
    Closed,
}

/// The engine's view of one attached transport.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    id: TransportId,
    outbound: mpsc::Sender<Outbound>,
}

impl TransportHandle {
    pub(crate) fn new(id: TransportId, outbound: mpsc::Sender<Outbound>) -> Self {
        Self { id, outbound }
    }

    pub fn id(&self) -> TransportId {
        self.id
    }

    /// Queue a message for the remote peer without waiting.
    pub fn send(&self, message: &RepoMessage) -> SendOutcome {
        match self
            .outbound
            .try_send(Outbound::Frame(message.as_bytes().clone()))
        {
            Ok(()) => SendOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    transport_id = %self.id,
                    message_type = message.message_type(),
                    "outbound queue full, dropping message"
                );
                SendOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(transport_id = %self.id, "send on closed transport");
                SendOutcome::Closed
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

/// Engine callbacks, queued for the domain's engine task.
#[derive(Debug)]
pub enum EngineEvent {
    Attach(TransportHandle),
    Detach(TransportId),
    PeerCandidate {
        transport_id: TransportId,
        peer_id: PeerId,
        metadata: PeerMetadata,
    },
    PeerDisconnected {
        transport_id: TransportId,
        peer_id: PeerId,
    },
    Inbound {
        transport_id: TransportId,
        message: RepoMessage,
    },
    Shutdown,
}

/// Drive `engine` until its queue closes or a `Shutdown` arrives.
///
/// Engine errors are logged and do not stop the task.
pub(crate) async fn run_engine<E: SyncEngine>(
    user_id: UserId,
    mut engine: E,
    mut events: mpsc::Receiver<EngineEvent>,
) {
    tracing::debug!(user_id = %user_id, "engine task started");

    while let Some(event) = events.recv().await {
        let result = match event {
            EngineEvent::Attach(handle) => engine.attach_transport(handle).await,
            EngineEvent::Detach(transport_id) => engine.detach_transport(transport_id).await,
            EngineEvent::PeerCandidate {
                transport_id,
                peer_id,
                metadata,
            } => engine.peer_candidate(transport_id, peer_id, metadata).await,
            EngineEvent::PeerDisconnected {
                transport_id,
                peer_id,
            } => engine.peer_disconnected(transport_id, peer_id).await,
            EngineEvent::Inbound {
                transport_id,
                message,
            } => engine.inbound_message(transport_id, message).await,
            EngineEvent::Shutdown => break,
        };

        if let Err(e) = result {
            tracing::warn!(user_id = %user_id, error = %e, "engine rejected event");
        }
    }

    if let Err(e) = engine.shutdown().await {
        tracing::warn!(user_id = %user_id, error = %e, "engine shutdown failed");
    }
    tracing::debug!(user_id = %user_id, "engine task stopped");
}

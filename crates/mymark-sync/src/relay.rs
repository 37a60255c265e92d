//! A stand-in engine that relays between a user's devices.
//!
//! `RelayEngine` keeps no document state and never touches storage. A repo
//! message addressed to another established device goes to that device
//! alone, unchanged. A message addressed to the server's own peer id is
//! re-addressed and sent to each of the user's other established devices.
//! Deployments with a real replication engine plug in their own
//! [`EngineFactory`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use mymark_sync_core::{PeerId, PeerMetadata, TransportId, UserId};
use mymark_sync_protocol::RepoMessage;
use mymark_sync_store::ChunkStore;

use crate::engine::{EngineFactory, SendOutcome, SyncEngine, TransportHandle};
use crate::error::{Result, SyncError};

/// Builds a [`RelayEngine`] per user.
#[derive(Debug, Clone, Default)]
pub struct RelayEngineFactory;

#[async_trait]
impl EngineFactory for RelayEngineFactory {
    type Engine = RelayEngine;

    async fn create(
        &self,
        user_id: &UserId,
        peer_id: &PeerId,
        _storage: Arc<dyn ChunkStore>,
    ) -> Result<RelayEngine> {
        Ok(RelayEngine::new(user_id.clone(), peer_id.clone()))
    }
}

#[derive(Debug)]
struct Slot {
    handle: TransportHandle,
    peer: Option<PeerId>,
}

/// Targeted relay with fan-out for server-addressed messages. See the
/// module docs.
#[derive(Debug)]
pub struct RelayEngine {
    user_id: UserId,
    local: PeerId,
    transports: BTreeMap<TransportId, Slot>,
}

impl RelayEngine {
    /// `local` is the peer id the domain presents to clients.
    pub fn new(user_id: UserId, local: PeerId) -> Self {
        Self {
            user_id,
            local,
            transports: BTreeMap::new(),
        }
    }

    /// Peers that completed the handshake, by transport.
    pub fn peers(&self) -> Vec<(TransportId, PeerId)> {
        self.transports
            .iter()
            .filter_map(|(id, slot)| slot.peer.clone().map(|peer| (*id, peer)))
            .collect()
    }
}

#[async_trait]
impl SyncEngine for RelayEngine {
    async fn attach_transport(&mut self, transport: TransportHandle) -> Result<()> {
        self.transports.insert(
            transport.id(),
            Slot {
                handle: transport,
                peer: None,
            },
        );
        Ok(())
    }

    async fn detach_transport(&mut self, transport_id: TransportId) -> Result<()> {
        self.transports.remove(&transport_id);
        Ok(())
    }

    async fn peer_candidate(
        &mut self,
        transport_id: TransportId,
        peer_id: PeerId,
        _metadata: PeerMetadata,
    ) -> Result<()> {
        let slot = self
            .transports
            .get_mut(&transport_id)
            .ok_or_else(|| SyncError::Engine(format!("unknown transport {}", transport_id)))?;
        slot.peer = Some(peer_id);
        Ok(())
    }

    async fn peer_disconnected(
        &mut self,
        transport_id: TransportId,
        _peer_id: PeerId,
    ) -> Result<()> {
        if let Some(slot) = self.transports.get_mut(&transport_id) {
            slot.peer = None;
        }
        Ok(())
    }

    async fn inbound_message(
        &mut self,
        transport_id: TransportId,
        message: RepoMessage,
    ) -> Result<()> {
        let sender = message.sender_id().clone();
        let target = message.target_id();
        let mut relayed = 0usize;

        if *target == self.local {
            for (id, slot) in &self.transports {
                if *id == transport_id {
                    continue;
                }
                let Some(peer) = &slot.peer else {
                    continue;
                };
                if *peer == sender {
                    continue;
                }

                let readdressed = message.readdressed(&sender, peer)?;
                if slot.handle.send(&readdressed) == SendOutcome::Queued {
                    relayed += 1;
                }
            }
        } else {
            let destination = self
                .transports
                .iter()
                .find(|(id, slot)| **id != transport_id && slot.peer.as_ref() == Some(target));
            match destination {
                Some((_, slot)) => {
                    if slot.handle.send(&message) == SendOutcome::Queued {
                        relayed += 1;
                    }
                }
                None => {
                    tracing::debug!(
                        user_id = %self.user_id,
                        sender_id = %sender,
                        target_id = %target,
                        "no connected peer for target, dropping message"
                    );
                }
            }
        }

        tracing::trace!(
            user_id = %self.user_id,
            message_type = message.message_type(),
            relayed,
            "relayed message"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use bytes::Bytes;
    use mymark_sync_protocol::{decode, JoinMessage, MemoryConnection, MemoryRemote, WireMessage};
    use mymark_sync_store::MemoryDatabase;

    use crate::{DomainManager, SyncConfig};

    const WAIT: Duration = Duration::from_secs(2);

    fn manager() -> DomainManager<RelayEngineFactory> {
        DomainManager::new(
            RelayEngineFactory,
            Arc::new(MemoryDatabase::new()),
            SyncConfig::default(),
        )
    }

    fn join(sender: &str) -> Bytes {
        WireMessage::Join(JoinMessage {
            sender_id: PeerId::new(sender),
            peer_metadata: None,
            supported_protocol_versions: None,
        })
        .encode()
        .unwrap()
    }

    async fn expect(remote: &mut MemoryRemote) -> WireMessage {
        let frame = remote.recv_timeout(WAIT).await.expect("frame");
        decode(&frame).unwrap()
    }

    #[tokio::test]
    async fn test_relays_between_devices() {
        let manager = manager();
        let alice = UserId::new("alice").unwrap();

        let (conn_a, mut remote_a) = MemoryConnection::pair();
        let (conn_b, mut remote_b) = MemoryConnection::pair();
        let a = manager.attach_connection(&alice, conn_a).await.unwrap();
        let b = manager.attach_connection(&alice, conn_b).await.unwrap();

        a.receive(join("laptop")).await.unwrap();
        b.receive(join("phone")).await.unwrap();
        assert!(matches!(expect(&mut remote_a).await, WireMessage::Peer(_)));
        assert!(matches!(expect(&mut remote_b).await, WireMessage::Peer(_)));

        let sync = RepoMessage::new(
            "sync",
            PeerId::new("laptop"),
            PeerId::new("server-alice"),
            None,
            vec![7],
        )
        .unwrap();
        a.receive(sync.as_bytes().clone()).await.unwrap();

        let WireMessage::Repo(relayed) = expect(&mut remote_b).await else {
            panic!("expected repo message");
        };
        assert_eq!(relayed.sender_id().as_str(), "laptop");
        assert_eq!(relayed.target_id().as_str(), "phone");
        assert_eq!(relayed.data(), Some(&[7u8][..]));

        assert!(remote_a.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_targeted_message_reaches_only_its_target() {
        let manager = manager();
        let alice = UserId::new("alice").unwrap();

        let (conn_l, mut remote_l) = MemoryConnection::pair();
        let (conn_p, mut remote_p) = MemoryConnection::pair();
        let (conn_t, mut remote_t) = MemoryConnection::pair();
        let laptop = manager.attach_connection(&alice, conn_l).await.unwrap();
        let phone = manager.attach_connection(&alice, conn_p).await.unwrap();
        let tablet = manager.attach_connection(&alice, conn_t).await.unwrap();

        laptop.receive(join("laptop")).await.unwrap();
        phone.receive(join("phone")).await.unwrap();
        tablet.receive(join("tablet")).await.unwrap();
        for remote in [&mut remote_l, &mut remote_p, &mut remote_t] {
            assert!(matches!(expect(remote).await, WireMessage::Peer(_)));
        }

        let sync = RepoMessage::new(
            "sync",
            PeerId::new("phone"),
            PeerId::new("laptop"),
            None,
            vec![3],
        )
        .unwrap();
        phone.receive(sync.as_bytes().clone()).await.unwrap();

        let WireMessage::Repo(delivered) = expect(&mut remote_l).await else {
            panic!("expected repo message");
        };
        assert_eq!(delivered.sender_id().as_str(), "phone");
        assert_eq!(delivered.target_id().as_str(), "laptop");
        assert_eq!(delivered.as_bytes(), sync.as_bytes());

        assert!(remote_t
            .recv_timeout(Duration::from_millis(100))
            .await
            .is_none());
        assert!(remote_p.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_unknown_target_is_dropped() {
        let manager = manager();
        let alice = UserId::new("alice").unwrap();

        let (conn_l, mut remote_l) = MemoryConnection::pair();
        let (conn_p, mut remote_p) = MemoryConnection::pair();
        let laptop = manager.attach_connection(&alice, conn_l).await.unwrap();
        let phone = manager.attach_connection(&alice, conn_p).await.unwrap();

        laptop.receive(join("laptop")).await.unwrap();
        phone.receive(join("phone")).await.unwrap();
        expect(&mut remote_l).await;
        expect(&mut remote_p).await;

        let sync = RepoMessage::new(
            "sync",
            PeerId::new("laptop"),
            PeerId::new("watch"),
            None,
            vec![1],
        )
        .unwrap();
        laptop.receive(sync.as_bytes().clone()).await.unwrap();

        assert!(remote_p
            .recv_timeout(Duration::from_millis(100))
            .await
            .is_none());
        assert!(!laptop.is_closed());
    }

    #[tokio::test]
    async fn test_no_relay_across_users() {
        let manager = manager();
        let alice = UserId::new("alice").unwrap();
        let bob = UserId::new("bob").unwrap();

        let (conn_a, mut remote_a) = MemoryConnection::pair();
        let (conn_b, mut remote_b) = MemoryConnection::pair();
        let a = manager.attach_connection(&alice, conn_a).await.unwrap();
        let b = manager.attach_connection(&bob, conn_b).await.unwrap();

        a.receive(join("laptop")).await.unwrap();
        b.receive(join("phone")).await.unwrap();
        expect(&mut remote_a).await;
        expect(&mut remote_b).await;

        let sync = RepoMessage::new(
            "sync",
            PeerId::new("laptop"),
            PeerId::new("server-alice"),
            None,
            vec![1],
        )
        .unwrap();
        a.receive(sync.as_bytes().clone()).await.unwrap();

        assert!(remote_b
            .recv_timeout(Duration::from_millis(100))
            .await
            .is_none());
        assert_eq!(manager.domain_count(), 2);
    }
}

//! Transport adapter state machine.
//!
//! One adapter per open connection. [`transition`] is pure; [`TransportAdapter`]
//! just holds the current state and applies it.

use std::fmt;

use bytes::Bytes;

use mymark_sync_core::{PeerId, PeerMetadata};

use crate::codec;
use crate::messages::{
    ErrorMessage, JoinMessage, PeerMessage, RepoMessage, WireMessage, PROTOCOL_V1,
};

/// The server side of a connection: who we are and what we advertise.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalPeer {
    pub peer_id: PeerId,
    pub metadata: PeerMetadata,
}

impl LocalPeer {
    pub fn new(peer_id: PeerId, metadata: PeerMetadata) -> Self {
        Self { peer_id, metadata }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterState {
    /// Created, not yet registered with the engine.
    Connecting,
    /// Registered, waiting for `join`.
    Handshaking,
    /// Remote peer known; repo messages flow.
    Established { remote: PeerId },
    /// Terminal.
    Closed,
}

impl AdapterState {
    pub fn remote_peer_id(&self) -> Option<&PeerId> {
        match self {
            AdapterState::Established { remote } => Some(remote),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEvent {
    /// The engine registered this adapter.
    Attached,
    /// One inbound frame.
    Received(Bytes),
    /// The connection went away.
    Disconnect,
}

/// Why an adapter closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Malformed,
    HandshakeViolation,
    UnsupportedVersion,
    SenderMismatch,
    PeerChanged,
    UnexpectedMessage,
    Leave,
    Disconnect,
    Internal,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::Malformed => "malformed message",
            CloseReason::HandshakeViolation => "message before handshake",
            CloseReason::UnsupportedVersion => "unsupported protocol version",
            CloseReason::SenderMismatch => "sender does not match handshake",
            CloseReason::PeerChanged => "join from a different peer",
            CloseReason::UnexpectedMessage => "unexpected message",
            CloseReason::Leave => "peer left",
            CloseReason::Disconnect => "disconnected",
            CloseReason::Internal => "internal error",
        };
        f.write_str(s)
    }
}

/// Something the caller must do after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Write this frame to the connection.
    Reply(Bytes),
    /// Tell the engine about a newly handshaken peer.
    PeerCandidate {
        peer_id: PeerId,
        metadata: PeerMetadata,
    },
    /// Hand a repo message to the engine.
    Forward(RepoMessage),
    /// Tell the engine the peer is gone.
    PeerDisconnected(PeerId),
    /// Close the connection.
    Close(CloseReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: AdapterState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn stay(state: &AdapterState) -> Self {
        Self {
            state: state.clone(),
            effects: Vec::new(),
        }
    }

    fn to(state: AdapterState, effects: Vec<Effect>) -> Self {
        Self { state, effects }
    }

    fn closed(effects: Vec<Effect>) -> Self {
        Self::to(AdapterState::Closed, effects)
    }
}

/// Compute the next state and effects.
///
/// Once `Closed`, every event yields no effects.
pub fn transition(local: &LocalPeer, state: &AdapterState, event: AdapterEvent) -> Transition {
    match (state, event) {
        (AdapterState::Closed, _) => Transition::stay(state),

        (AdapterState::Connecting, AdapterEvent::Attached) => {
            Transition::to(AdapterState::Handshaking, Vec::new())
        }
        (_, AdapterEvent::Attached) => Transition::stay(state),

        (AdapterState::Established { remote }, AdapterEvent::Disconnect) => {
            Transition::closed(vec![
                Effect::PeerDisconnected(remote.clone()),
                Effect::Close(CloseReason::Disconnect),
            ])
        }
        (_, AdapterEvent::Disconnect) => {
            Transition::closed(vec![Effect::Close(CloseReason::Disconnect)])
        }

        (AdapterState::Established { remote }, AdapterEvent::Received(frame)) => {
            established(remote, &frame)
        }
        (_, AdapterEvent::Received(frame)) => handshaking(local, &frame),
    }
}

fn handshaking(local: &LocalPeer, frame: &Bytes) -> Transition {
    let message = match codec::decode(frame) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(error = %e, "undecodable frame before handshake");
            return Transition::closed(vec![Effect::Close(CloseReason::Malformed)]);
        }
    };

    match message {
        WireMessage::Join(join) => accept_join(local, join),
        WireMessage::Leave(_) => Transition::closed(vec![Effect::Close(CloseReason::Leave)]),
        other => {
            let text = format!("expected join, got {}", other.kind());
            let mut effects = error_reply(local, other.sender_id(), text);
            effects.push(Effect::Close(CloseReason::HandshakeViolation));
            Transition::closed(effects)
        }
    }
}

fn accept_join(local: &LocalPeer, join: JoinMessage) -> Transition {
    if let Some(versions) = &join.supported_protocol_versions {
        if !versions.iter().any(|v| v == PROTOCOL_V1) {
            let text = format!("no supported protocol version, server speaks {}", PROTOCOL_V1);
            let mut effects = error_reply(local, &join.sender_id, text);
            effects.push(Effect::Close(CloseReason::UnsupportedVersion));
            return Transition::closed(effects);
        }
    }

    let peer = WireMessage::Peer(PeerMessage {
        sender_id: local.peer_id.clone(),
        peer_metadata: local.metadata.clone(),
        selected_protocol_version: PROTOCOL_V1.to_string(),
        target_id: join.sender_id.clone(),
    });
    let reply = match peer.encode() {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, "failed to encode peer reply");
            return Transition::closed(vec![Effect::Close(CloseReason::Internal)]);
        }
    };

    let remote = join.sender_id;
    Transition::to(
        AdapterState::Established {
            remote: remote.clone(),
        },
        vec![
            Effect::Reply(reply),
            Effect::PeerCandidate {
                peer_id: remote,
                metadata: join.peer_metadata.unwrap_or_default(),
            },
        ],
    )
}

fn established(remote: &PeerId, frame: &Bytes) -> Transition {
    let state = AdapterState::Established {
        remote: remote.clone(),
    };
    let drop_peer = |reason| {
        Transition::closed(vec![
            Effect::PeerDisconnected(remote.clone()),
            Effect::Close(reason),
        ])
    };

    let message = match codec::decode(frame) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(peer_id = %remote, error = %e, "undecodable frame");
            return drop_peer(CloseReason::Malformed);
        }
    };

    match message {
        WireMessage::Repo(repo) if repo.sender_id() == remote => {
            Transition::to(state, vec![Effect::Forward(repo)])
        }
        WireMessage::Repo(repo) => {
            tracing::debug!(
                peer_id = %remote,
                sender_id = %repo.sender_id(),
                "repo message from unexpected sender"
            );
            drop_peer(CloseReason::SenderMismatch)
        }
        WireMessage::Join(join) if &join.sender_id == remote => Transition::stay(&state),
        WireMessage::Join(_) => drop_peer(CloseReason::PeerChanged),
        WireMessage::Leave(_) => drop_peer(CloseReason::Leave),
        WireMessage::Peer(_) | WireMessage::Error(_) => drop_peer(CloseReason::UnexpectedMessage),
    }
}

fn error_reply(local: &LocalPeer, target: &PeerId, text: String) -> Vec<Effect> {
    let message = WireMessage::Error(ErrorMessage::new(
        local.peer_id.clone(),
        target.clone(),
        text,
    ));
    match message.encode() {
        Ok(bytes) => vec![Effect::Reply(bytes)],
        Err(e) => {
            tracing::error!(error = %e, "failed to encode error reply");
            Vec::new()
        }
    }
}

/// Live holder for one connection's protocol state.
#[derive(Debug)]
pub struct TransportAdapter {
    local: LocalPeer,
    state: AdapterState,
}

impl TransportAdapter {
    pub fn new(local: LocalPeer) -> Self {
        Self {
            local,
            state: AdapterState::Connecting,
        }
    }

    /// Apply one event and return the effects to carry out, in order.
    pub fn handle(&mut self, event: AdapterEvent) -> Vec<Effect> {
        let Transition { state, effects } = transition(&self.local, &self.state, event);
        if state != self.state {
            tracing::trace!(
                local = %self.local.peer_id,
                from = ?self.state,
                to = ?state,
                "adapter transition"
            );
        }
        self.state = state;
        effects
    }

    pub fn state(&self) -> &AdapterState {
        &self.state
    }

    pub fn local(&self) -> &LocalPeer {
        &self.local
    }

    pub fn remote_peer_id(&self) -> Option<&PeerId> {
        self.state.remote_peer_id()
    }

    pub fn is_closed(&self) -> bool {
        self.state == AdapterState::Closed
    }
}

//! # mymark-sync Protocol
//!
//! Wire protocol spoken between client repos and the sync server, and the
//! per-connection state machine that enforces it.
//!
//! ## Overview
//!
//! Every frame is a CBOR map tagged by a `type` string. A connection must open
//! with a `join`; the server answers with exactly one `peer` and from then on
//! relays repo messages (sync, ephemeral, request, ...) byte-for-byte to the
//! sync engine without interpreting them.
//!
//! The [`TransportAdapter`] is a pure state machine: it consumes
//! [`AdapterEvent`]s and returns [`Effect`]s, so it can be tested without a
//! live connection. The live plumbing (queues, engine events) lives in the
//! `mymark-sync` crate.
//!
//! ## Message Flow
//!
//! ```text
//! Client                               Server
//!   |-------- join ------------------->|   Connecting/Handshaking
//!   |<------- peer --------------------|   Established
//!   |-------- sync ------------------->|   forwarded to engine
//!   |<------- sync --------------------|   emitted by engine
//!   |-------- leave ------------------>|   Closed
//! ```
//!
//! ## States
//!
//! ```text
//! Connecting --Attached--> Handshaking --join--> Established
//!      |                        |                     |
//!      +------------------------+---- violation / ----+--> Closed
//!                                     malformed / leave
//! ```

pub mod adapter;
pub mod codec;
pub mod connection;
pub mod error;
pub mod messages;

pub use adapter::{
    transition, AdapterEvent, AdapterState, CloseReason, Effect, LocalPeer, TransportAdapter,
    Transition,
};
pub use codec::{decode, encode};
pub use connection::{memory::MemoryConnection, memory::MemoryRemote, Connection};
pub use error::{ProtocolError, Result};
pub use messages::{
    limits, ErrorMessage, JoinMessage, LeaveMessage, PeerMessage, RepoMessage, WireMessage,
    PROTOCOL_V1,
};

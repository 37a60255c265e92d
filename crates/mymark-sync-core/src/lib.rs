//! # mymark-sync Core
//!
//! Pure primitives shared by every mymark-sync crate: identifiers, storage keys
//! and the order-preserving key encoding used by relational chunk stores.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`UserId`] - Opaque identity supplied by the session layer
//! - [`PeerId`] - Identity of a sync peer (client device or server domain)
//! - [`StorageKey`] - Non-empty, hierarchical chunk address
//! - [`KeyPrefix`] - Possibly-empty leading subsequence of a key, used for ranges
//! - [`PeerMetadata`] - Opaque capability bag exchanged during the handshake
//!
//! ## Key Encoding
//!
//! Keys are encoded so that byte-wise comparison of encodings matches
//! segment-wise comparison of keys. See [`key`] module.

pub mod error;
pub mod key;
pub mod types;

pub use error::{CoreError, Result};
pub use key::{prefix_successor, KeyPrefix, KeyRange, StorageKey};
pub use types::{DocumentId, PeerId, PeerMetadata, TransportId, UserId};

//! # mymark-sync Testkit
//!
//! Testing utilities for mymark-sync.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: storage key encodings and wire frames with known
//!   outcomes, so other implementations can share a database or a socket
//! - **Generators**: Proptest strategies for keys, prefixes and chunk sets
//! - **Fixtures**: a recording engine double and frame builders
//!
//! ## Golden Vectors
//!
//! ```rust
//! use mymark_sync_testkit::vectors::verify_all_vectors;
//!
//! verify_all_vectors().unwrap();
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use mymark_sync_testkit::generators::{key_prefix, storage_key};
//!
//! proptest! {
//!     #[test]
//!     fn range_matches_starts_with(key in storage_key(), prefix in key_prefix()) {
//!         prop_assert_eq!(prefix.range().contains(&key.encode()), key.starts_with(&prefix));
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,ignore
//! use mymark_sync_protocol::MemoryConnection;
//! use mymark_sync_testkit::fixtures::{join_frame, user, TestDomains};
//!
//! let domains = TestDomains::new();
//! let (conn, mut remote) = MemoryConnection::pair();
//! let handle = domains.manager.attach_connection(&user("alice"), conn).await?;
//! handle.receive(join_frame("laptop")).await?;
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{
    EngineLog, FailingEngineFactory, Recorded, RecordingEngine, RecordingEngineFactory,
    TestDomains,
};

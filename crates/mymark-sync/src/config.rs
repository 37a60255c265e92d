//! Configuration for sync domains.

use mymark_sync_core::PeerMetadata;

/// Configuration for the domain manager and the adapters it creates.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Frames buffered per connection before engine traffic is dropped.
    pub outbound_queue_capacity: usize,
    /// Events buffered per domain before callers wait on the engine.
    pub engine_queue_capacity: usize,
    /// Metadata the server advertises in its `peer` reply.
    pub local_metadata: PeerMetadata,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: 256,
            engine_queue_capacity: 1024,
            local_metadata: PeerMetadata::new().with("isEphemeral", false),
        }
    }
}

//! Connection abstraction.
//!
//! A connection is a message-oriented duplex channel carrying whole frames.
//! The accept layer wraps its socket in one; the adapter only ever writes.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Outbound half of an open connection.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Connection: Send + Sync {
    /// Whether a send right now would reach the peer.
    fn is_writable(&self) -> bool;

    /// Write one frame.
    async fn send(&self, frame: Bytes) -> Result<()>;

    /// Close the connection. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// An in-memory connection for testing.
///
/// [`pair`](memory::pair) returns the server-side [`Connection`] and a
/// [`MemoryRemote`](memory::MemoryRemote) that observes what was written.
pub mod memory {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::sync::mpsc;

    use crate::error::ProtocolError;

    #[derive(Debug)]
    struct Shared {
        writable: AtomicBool,
        closed: AtomicBool,
    }

    /// Create a connected pair.
    pub fn pair() -> (MemoryConnection, MemoryRemote) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            writable: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        });

        (
            MemoryConnection {
                tx: Mutex::new(Some(tx)),
                shared: Arc::clone(&shared),
            },
            MemoryRemote { rx, shared },
        )
    }

    /// Server side of an in-memory connection.
    #[derive(Debug)]
    pub struct MemoryConnection {
        tx: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
        shared: Arc<Shared>,
    }

    impl MemoryConnection {
        pub fn pair() -> (MemoryConnection, MemoryRemote) {
            pair()
        }
    }

    #[async_trait]
    impl Connection for MemoryConnection {
        fn is_writable(&self) -> bool {
            self.shared.writable.load(Ordering::SeqCst)
                && !self.shared.closed.load(Ordering::SeqCst)
        }

        async fn send(&self, frame: Bytes) -> Result<()> {
            let guard = self
                .tx
                .lock()
                .map_err(|e| ProtocolError::Connection(e.to_string()))?;
            let tx = guard.as_ref().ok_or(ProtocolError::ConnectionClosed)?;
            tx.send(frame).map_err(|_| ProtocolError::ConnectionClosed)
        }

        async fn close(&self) -> Result<()> {
            self.shared.closed.store(true, Ordering::SeqCst);
            let mut guard = self
                .tx
                .lock()
                .map_err(|e| ProtocolError::Connection(e.to_string()))?;
            guard.take();
            Ok(())
        }
    }

    /// Client side of an in-memory connection.
    #[derive(Debug)]
    pub struct MemoryRemote {
        rx: mpsc::UnboundedReceiver<Bytes>,
        shared: Arc<Shared>,
    }

    impl MemoryRemote {
        /// Next frame written by the server, or `None` once closed and drained.
        pub async fn recv(&mut self) -> Option<Bytes> {
            self.rx.recv().await
        }

        /// Receive with timeout. `None` on timeout or close.
        pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<Bytes> {
            tokio::time::timeout(timeout, self.rx.recv())
                .await
                .ok()
                .flatten()
        }

        /// A frame if one is already queued.
        pub fn try_recv(&mut self) -> Option<Bytes> {
            self.rx.try_recv().ok()
        }

        /// Simulate a stalled or recovered socket.
        pub fn set_writable(&self, writable: bool) {
            self.shared.writable.store(writable, Ordering::SeqCst);
        }

        pub fn is_closed(&self) -> bool {
            self.shared.closed.load(Ordering::SeqCst)
        }
    }

}

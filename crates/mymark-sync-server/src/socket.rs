//! WebSocket plumbing between axum sockets and sync domains.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::Mutex;

use mymark_sync::{DomainManager, EngineFactory};
use mymark_sync_core::UserId;
use mymark_sync_protocol::{Connection, ProtocolError};

/// Outbound half of an upgraded socket.
pub struct WebSocketConnection {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    open: AtomicBool,
}

impl WebSocketConnection {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink: Mutex::new(sink),
            open: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    fn is_writable(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send(&self, frame: Bytes) -> mymark_sync_protocol::Result<()> {
        let result = self.sink.lock().await.send(Message::Binary(frame)).await;
        result.map_err(|e| {
            self.open.store(false, Ordering::SeqCst);
            ProtocolError::Connection(e.to_string())
        })
    }

    async fn close(&self) -> mymark_sync_protocol::Result<()> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let mut sink = self.sink.lock().await;
        // The peer may already be gone; closing our side still matters.
        let _ = sink.send(Message::Close(None)).await;
        sink.close()
            .await
            .map_err(|e| ProtocolError::Connection(e.to_string()))
    }
}

/// Run one connection until either side closes it.
pub async fn serve<F: EngineFactory>(
    manager: Arc<DomainManager<F>>,
    user_id: UserId,
    socket: WebSocket,
) {
    let (sink, mut stream) = socket.split();

    let handle = match manager
        .attach_connection(&user_id, WebSocketConnection::new(sink))
        .await
    {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(user_id = %user_id, error = %e, "failed to attach connection");
            return;
        }
    };
    tracing::info!(user_id = %user_id, transport_id = %handle.id(), "websocket connected");

    while let Some(message) = stream.next().await {
        let frame = match message {
            Ok(Message::Binary(data)) => data,
            Ok(Message::Text(text)) => Bytes::copy_from_slice(text.as_str().as_bytes()),
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Err(e) => {
                tracing::debug!(user_id = %user_id, error = %e, "websocket read failed");
                break;
            }
        };

        if let Err(e) = handle.receive(frame).await {
            tracing::warn!(user_id = %user_id, error = %e, "failed to process frame");
        }
        if handle.is_closed() {
            break;
        }
    }

    if let Err(e) = manager.detach_connection(&user_id, &handle).await {
        tracing::warn!(user_id = %user_id, error = %e, "failed to detach connection");
    }
    tracing::info!(user_id = %user_id, transport_id = %handle.id(), "websocket disconnected");
}

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use mymark_sync::{DomainManager, RelayEngineFactory, SyncConfig};
use mymark_sync_core::{PeerId, UserId};
use mymark_sync_protocol::{decode, JoinMessage, RepoMessage, WireMessage};
use mymark_sync_server::{build_router, AppState, DocumentUrlResponse, TrustedHeaderResolver};
use mymark_sync_store::MemoryDatabase;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

struct TestServer {
    addr: String,
    manager: Arc<DomainManager<RelayEngineFactory>>,
}

/// Spin up the server on an OS-assigned port.
async fn spawn_test_server() -> TestServer {
    let db = MemoryDatabase::new();
    let manager = Arc::new(DomainManager::new(
        RelayEngineFactory,
        Arc::new(db.clone()),
        SyncConfig::default(),
    ));
    let app = build_router(AppState {
        manager: Arc::clone(&manager),
        roots: Arc::new(db),
        sessions: Arc::new(TrustedHeaderResolver::default()),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        addr: format!("127.0.0.1:{}", port),
        manager,
    }
}

async fn connect(server: &TestServer, user: &'static str) -> Client {
    let mut request = format!("ws://{}/automerge", server.addr)
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("x-user-id", HeaderValue::from_static(user));
    let (client, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    client
}

fn join_frame(sender: &str) -> Message {
    let frame = WireMessage::Join(JoinMessage {
        sender_id: PeerId::new(sender),
        peer_metadata: None,
        supported_protocol_versions: Some(vec!["1".to_string()]),
    })
    .encode()
    .unwrap();
    Message::binary(frame)
}

async fn next_message(client: &mut Client) -> WireMessage {
    loop {
        let msg = tokio::time::timeout(WAIT, client.next())
            .await
            .expect("timed out")
            .expect("stream ended")
            .unwrap();
        if let Message::Binary(data) = msg {
            return decode(&data).unwrap();
        }
    }
}

async fn handshake(client: &mut Client, sender: &str) {
    client.send(join_frame(sender)).await.unwrap();
    match next_message(client).await {
        WireMessage::Peer(_) => {}
        other => panic!("expected peer, got {:?}", other),
    }
}

#[tokio::test]
async fn test_health_returns_ok() {
    let server = spawn_test_server().await;
    let resp = reqwest::get(format!("http://{}/health", server.addr))
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_document_url_requires_identity() {
    let server = spawn_test_server().await;
    let resp = reqwest::get(format!("http://{}/api/sync/document-url", server.addr))
        .await
        .unwrap();

    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_document_url_store_once() {
    let server = spawn_test_server().await;
    let client = reqwest::Client::new();
    let url = format!("http://{}/api/sync/document-url", server.addr);

    let empty: DocumentUrlResponse = client
        .get(&url)
        .header("x-user-id", "alice")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(empty.document_url, None);

    let stored = client
        .post(&url)
        .header("x-user-id", "alice")
        .json(&serde_json::json!({ "docUrl": "automerge:root" }))
        .send()
        .await
        .unwrap();
    assert_eq!(stored.status(), 204);

    let again = client
        .post(&url)
        .header("x-user-id", "alice")
        .json(&serde_json::json!({ "docUrl": "automerge:other" }))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 409);

    let found: DocumentUrlResponse = client
        .get(&url)
        .header("x-user-id", "alice")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(found.document_url.as_deref(), Some("automerge:root"));

    let other: DocumentUrlResponse = client
        .get(&url)
        .header("x-user-id", "bob")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(other.document_url, None);
}

#[tokio::test]
async fn test_websocket_without_identity_is_unauthorized() {
    let server = spawn_test_server().await;
    let result = tokio_tungstenite::connect_async(format!("ws://{}/automerge", server.addr)).await;

    match result {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 401),
        Err(other) => panic!("expected http error, got {:?}", other),
        Ok(_) => panic!("expected rejection"),
    }
}

#[tokio::test]
async fn test_websocket_handshake_returns_peer() {
    let server = spawn_test_server().await;
    let mut client = connect(&server, "alice").await;

    client.send(join_frame("laptop")).await.unwrap();
    let WireMessage::Peer(peer) = next_message(&mut client).await else {
        panic!("expected peer");
    };

    assert_eq!(peer.sender_id.as_str(), "server-alice");
    assert_eq!(peer.target_id.as_str(), "laptop");
    assert_eq!(peer.selected_protocol_version, "1");

    let alice = UserId::new("alice").unwrap();
    assert_eq!(server.manager.domain_count(), 1);
    assert_eq!(server.manager.connection_count(&alice), 1);
}

#[tokio::test]
async fn test_websocket_relays_between_devices() {
    let server = spawn_test_server().await;
    let mut laptop = connect(&server, "alice").await;
    let mut phone = connect(&server, "alice").await;

    handshake(&mut laptop, "laptop").await;
    handshake(&mut phone, "phone").await;

    let sync = RepoMessage::new(
        "sync",
        PeerId::new("laptop"),
        PeerId::new("server-alice"),
        None,
        vec![4, 2],
    )
    .unwrap();
    laptop
        .send(Message::binary(sync.as_bytes().clone()))
        .await
        .unwrap();

    let WireMessage::Repo(relayed) = next_message(&mut phone).await else {
        panic!("expected repo message");
    };
    assert_eq!(relayed.target_id().as_str(), "phone");
    assert_eq!(relayed.data(), Some(&[4u8, 2][..]));
}

#[tokio::test]
async fn test_websocket_garbage_closes_connection() {
    let server = spawn_test_server().await;
    let mut client = connect(&server, "alice").await;

    client
        .send(Message::binary(vec![0xff, 0x00, 0x13]))
        .await
        .unwrap();

    let ended = tokio::time::timeout(WAIT, async {
        loop {
            match client.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return true,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .unwrap();
    assert!(ended);

    // The domain outlives the connection.
    let alice = UserId::new("alice").unwrap();
    for _ in 0..50 {
        if server.manager.connection_count(&alice) == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(server.manager.connection_count(&alice), 0);
    assert_eq!(server.manager.domain_count(), 1);
}

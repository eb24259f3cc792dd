//! Integration tests for connection lifecycle, HTTP introspection, and
//! shutdown.
//!
//! Verification command: `cargo test --test relay_lifecycle`

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_tungstenite::tungstenite;

use bazaar_proto::{RoomId, ServerEvent, codec};
use bazaar_relay::relay::{RelaySettings, RelayState};
use bazaar_relay::server::{start_server_with_shutdown, start_server_with_state};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn start_relay(state: Arc<RelayState>) -> std::net::SocketAddr {
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", state)
        .await
        .expect("failed to start test relay");
    addr
}

async fn connect(addr: std::net::SocketAddr) -> WsStream {
    let url = format!("ws://{addr}/ws");
    let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    ws
}

async fn recv_event(ws: &mut WsStream) -> ServerEvent {
    let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("recv timed out")
        .unwrap()
        .unwrap();
    codec::decode_server(msg.to_text().unwrap()).unwrap()
}

async fn join(ws: &mut WsStream, room: &str) {
    let frame = json!({"event": "join-room", "data": room}).to_string();
    ws.send(tungstenite::Message::Text(frame.into()))
        .await
        .unwrap();
    assert_eq!(recv_event(ws).await, ServerEvent::joined(RoomId::from(room)));
}

async fn send_message(ws: &mut WsStream, room: &str, message: &str, sender: &str) {
    let frame = json!({
        "event": "send-message",
        "data": {"roomId": room, "message": message, "sender": sender}
    })
    .to_string();
    ws.send(tungstenite::Message::Text(frame.into()))
        .await
        .unwrap();
}

/// Polls until the registry holds `expected` connections.
async fn wait_for_connections(state: &RelayState, expected: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while state.registry.len() != expected {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timeout waiting for {expected} connections (have {})",
            state.registry.len()
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Minimal HTTP/1.1 GET returning the response body.
async fn http_get(addr: std::net::SocketAddr, path: &str) -> serde_json::Value {
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = String::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_string(&mut response))
        .await
        .expect("http response timed out")
        .unwrap();

    assert!(response.starts_with("HTTP/1.1 200"), "got: {response}");
    let (_, body) = response.split_once("\r\n\r\n").unwrap();
    serde_json::from_str(body).unwrap()
}

// =============================================================================
// Connection lifecycle
// =============================================================================

#[tokio::test]
async fn upgrade_registers_and_close_unregisters() {
    let state = Arc::new(RelayState::new());
    let addr = start_relay(Arc::clone(&state)).await;

    let mut ws = connect(addr).await;
    wait_for_connections(&state, 1).await;

    ws.close(None).await.unwrap();
    wait_for_connections(&state, 0).await;
}

#[tokio::test]
async fn abrupt_disconnect_unregisters() {
    let state = Arc::new(RelayState::new());
    let addr = start_relay(Arc::clone(&state)).await;

    let mut ws = connect(addr).await;
    join(&mut ws, "room1").await;
    wait_for_connections(&state, 1).await;

    // Drop the TCP stream without a close handshake.
    drop(ws);
    wait_for_connections(&state, 0).await;
    assert!(state.registry.rooms().is_empty());
}

/// After B leaves, broadcasts to its old room reach only the remaining members.
#[tokio::test]
async fn closed_peer_not_targeted() {
    let state = Arc::new(RelayState::new());
    let addr = start_relay(Arc::clone(&state)).await;

    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    let mut c = connect(addr).await;
    join(&mut a, "room1").await;
    join(&mut b, "room1").await;
    join(&mut c, "room1").await;

    b.close(None).await.unwrap();
    wait_for_connections(&state, 2).await;

    send_message(&mut a, "room1", "who's left?", "A").await;
    for ws in [&mut a, &mut c] {
        match recv_event(ws).await {
            ServerEvent::ReceiveMessage { message, .. } => {
                assert_eq!(message, json!("who's left?"));
            }
            other => panic!("expected ReceiveMessage, got {other:?}"),
        }
    }
    assert_eq!(state.registry.members(&RoomId::from("room1")).len(), 2);
}

#[tokio::test]
async fn echo_disabled_skips_sender() {
    let state = Arc::new(RelayState::with_settings(RelaySettings {
        echo_to_sender: false,
        ..RelaySettings::default()
    }));
    let addr = start_relay(state).await;

    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    join(&mut a, "room1").await;
    join(&mut b, "room1").await;

    send_message(&mut a, "room1", "just for you", "A").await;
    assert!(matches!(
        recv_event(&mut b).await,
        ServerEvent::ReceiveMessage { .. }
    ));
    let echoed = tokio::time::timeout(Duration::from_millis(300), a.next()).await;
    assert!(echoed.is_err(), "sender should not receive its own message");
}

// =============================================================================
// HTTP introspection
// =============================================================================

#[tokio::test]
async fn health_and_rooms_reflect_registry() {
    let state = Arc::new(RelayState::new());
    let addr = start_relay(Arc::clone(&state)).await;

    assert_eq!(
        http_get(addr, "/health").await,
        json!({"status": "ok", "connections": 0, "rooms": 0})
    );

    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    let _idle = connect(addr).await;
    join(&mut a, "swap-42").await;
    join(&mut b, "swap-42").await;
    wait_for_connections(&state, 3).await;

    assert_eq!(
        http_get(addr, "/health").await,
        json!({"status": "ok", "connections": 3, "rooms": 1})
    );
    assert_eq!(
        http_get(addr, "/rooms").await,
        json!([{"roomId": "swap-42", "members": 2}])
    );
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test]
async fn graceful_shutdown_closes_connections() {
    let state = Arc::new(RelayState::new());
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let (addr, handle) = start_server_with_shutdown("127.0.0.1:0", Arc::clone(&state), async move {
        let _ = rx.await;
    })
    .await
    .unwrap();

    let mut ws = connect(addr).await;
    wait_for_connections(&state, 1).await;

    tx.send(()).unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("close frame timed out");
    assert!(
        matches!(frame, Some(Ok(tungstenite::Message::Close(_))) | None | Some(Err(_))),
        "expected close, got {frame:?}"
    );

    wait_for_connections(&state, 0).await;
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server did not stop")
        .unwrap();
}

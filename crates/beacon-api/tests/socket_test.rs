#![allow(clippy::unwrap_used)]
// Integration tests for `PhoenixSocket` against a local Phoenix stub.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use beacon_api::{EventKind, PhoenixSocket, RealtimeTransport, SocketConfig};

// ── Helpers ─────────────────────────────────────────────────────────

fn secret(s: &str) -> SecretString {
    SecretString::from(s.to_owned())
}

/// Tick the socket until `pred` holds or ~2s pass.
async fn wait_until(socket: &mut PhoenixSocket, pred: impl Fn(&PhoenixSocket) -> bool) -> bool {
    for _ in 0..200 {
        socket.tick();
        if pred(socket) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

async fn next_join(ws: &mut WebSocketStream<tokio::net::TcpStream>) -> Value {
    loop {
        let msg = ws.next().await.unwrap().unwrap();
        if let Message::Text(text) = msg {
            let frame: Value = serde_json::from_str(&text).unwrap();
            if frame["event"] == "phx_join" {
                return frame;
            }
        }
    }
}

/// Accept one client, answer its first join with `status`, then push
/// `extra` frames on that topic and wait for the client to hang up.
async fn spawn_stub(status: &'static str, extra: Vec<Value>) -> (String, JoinHandle<Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let join = next_join(&mut ws).await;
        let topic = join["topic"].clone();
        let reply = json!({
            "topic": topic,
            "event": "phx_reply",
            "payload": { "status": status, "response": { "reason": "denied" } },
            "ref": join["ref"],
            "join_ref": join["join_ref"],
        });
        ws.send(Message::text(reply.to_string())).await.unwrap();

        for mut frame in extra {
            frame["topic"] = topic.clone();
            ws.send(Message::text(frame.to_string())).await.unwrap();
        }

        while let Some(Ok(msg)) = ws.next().await {
            if msg.is_close() {
                break;
            }
        }
        join
    });

    (format!("http://{addr}"), handle)
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_user_join_confirmed_and_broadcast_delivered() {
    let broadcast = json!({
        "event": "broadcast",
        "payload": {
            "type": "broadcast",
            "event": "command",
            "payload": { "device_uuid": "d-1" }
        },
        "ref": null
    });
    let (url, server) = spawn_stub("ok", vec![broadcast]).await;

    let (tx, mut rx) = mpsc::channel(8);
    let mut socket = PhoenixSocket::new(SocketConfig::default());
    socket.register_message_sink(tx);
    socket.begin(&url, &secret("anon"), &secret("token")).unwrap();
    assert!(socket.is_connecting());
    assert!(socket.subscribe_to_user_channel("u-1"));

    assert!(wait_until(&mut socket, |s| s.is_fully_connected()).await);
    assert!(socket.has_ever_connected());
    assert_eq!(socket.min_heap_required(), 60_000);

    let envelope = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(envelope.event_kind, EventKind::Broadcast);
    assert_eq!(envelope.topic, "realtime:user:u-1");
    assert_eq!(envelope.payload["event"], "command");

    socket.disconnect();
    assert!(!socket.is_socket_connected());

    let join = tokio::time::timeout(Duration::from_secs(2), server)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(join["topic"], "realtime:user:u-1");
    assert_eq!(join["payload"]["access_token"], "token");
    assert_eq!(join["payload"]["config"]["private"], true);
}

#[tokio::test]
async fn test_rejected_join_leaves_socket_half_connected() {
    let (url, server) = spawn_stub("error", Vec::new()).await;

    let mut socket = PhoenixSocket::new(SocketConfig::default());
    socket.begin(&url, &secret("anon"), &secret("token")).unwrap();
    assert!(socket.subscribe_to_user_channel("u-2"));

    assert!(wait_until(&mut socket, |s| s.is_socket_connected()).await);
    // Give the reply time to land, then confirm it did not count.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!socket.is_fully_connected());

    socket.disconnect();
    let _ = tokio::time::timeout(Duration::from_secs(2), server).await;
}

#[tokio::test]
async fn test_legacy_postgres_join_and_row_change() {
    let change = json!({
        "event": "postgres_changes",
        "payload": {
            "data": {
                "type": "INSERT",
                "table": "commands",
                "schema": "display",
                "record": { "id": "abcdefgh", "command": "reboot", "status": "pending" }
            }
        },
        "ref": null
    });
    let (url, server) = spawn_stub("ok", vec![change]).await;

    let (tx, mut rx) = mpsc::channel(8);
    let mut socket = PhoenixSocket::new(SocketConfig::default());
    socket.register_message_sink(tx);
    socket.begin(&url, &secret("anon"), &secret("token")).unwrap();
    socket.set_channel_topic("realtime:display");
    assert!(socket.subscribe_multiple("display", &["commands"], "pairing_code=eq.ABC123"));

    let envelope = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(envelope.event_kind, EventKind::Insert);
    assert_eq!(envelope.table, "commands");
    assert_eq!(envelope.payload["data"]["record"]["command"], "reboot");

    socket.disconnect();
    let join = tokio::time::timeout(Duration::from_secs(2), server)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        join["payload"]["config"]["postgres_changes"][0]["filter"],
        "pairing_code=eq.ABC123"
    );
}

#[tokio::test]
async fn test_silent_server_trips_heartbeat_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        // Read and never answer.
        while let Some(Ok(_)) = ws.next().await {}
    });

    let config = SocketConfig {
        heartbeat_timeout: Duration::from_millis(200),
        ..SocketConfig::default()
    };
    let mut socket = PhoenixSocket::new(config);
    socket
        .begin(&format!("http://{addr}"), &secret("anon"), &secret("token"))
        .unwrap();

    assert!(wait_until(&mut socket, |s| s.is_socket_connected()).await);
    assert!(wait_until(&mut socket, |s| !s.is_socket_connected()).await);
    assert!(!socket.is_connecting());
    assert!(socket.has_ever_connected());
    assert!(matches!(
        socket.take_error(),
        Some(beacon_api::Error::HeartbeatTimeout { .. })
    ));
    assert!(socket.take_error().is_none());

    server.abort();
}

//! End-to-end relay tests over a real WebSocket connection.
//!
//! Boots the full stack (in-memory backends, relay, network module) on an
//! ephemeral port and drives it with a `tokio-tungstenite` client playing
//! the browser extension's part.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, Stream, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

use bridge_core::{ClientRole, AGGREGATE_LIVENESS_KEY, COMMAND_QUEUE};
use bridge_server::network::{
    ConnectionConfig, NetworkConfig, NetworkModule, ShutdownController,
};
use bridge_server::relay::{RelayConfig, RelayModule};
use bridge_server::storage::{MemoryQueue, MemoryStore};
use bridge_server::{DurableQueue, StatusStore};

struct TestServer {
    port: u16,
    queue: Arc<MemoryQueue>,
    store: Arc<MemoryStore>,
    relay: RelayModule,
    shutdown: Arc<ShutdownController>,
}

async fn boot(connection: ConnectionConfig) -> TestServer {
    let queue = Arc::new(MemoryQueue::new());
    let store = Arc::new(MemoryStore::new());
    let shutdown = Arc::new(ShutdownController::new());

    let relay_config = RelayConfig {
        requeue_backoff: Duration::from_millis(20),
        ..RelayConfig::default()
    };
    let mut relay = RelayModule::new(
        relay_config,
        connection.clone(),
        queue.clone() as _,
        store.clone() as _,
    );

    let network_config = NetworkConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        connection,
        ..NetworkConfig::default()
    };
    let mut network = NetworkModule::new(
        network_config,
        relay.hub(),
        relay.correlator(),
        Arc::clone(&shutdown),
    );

    let port = network.start().await.expect("bind should succeed");
    relay.start(&shutdown);

    let mut shutdown_rx = shutdown.shutdown_receiver();
    tokio::spawn(async move {
        network
            .serve(async move {
                let _ = shutdown_rx.changed().await;
            })
            .await
            .expect("serve should not fail");
    });

    TestServer {
        port,
        queue,
        store,
        relay,
        shutdown,
    }
}

async fn connect(
    port: u16,
    role: ClientRole,
) -> tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
> {
    let url = format!("ws://127.0.0.1:{port}/ws?role={role}");
    let (ws, _response) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("websocket connect should succeed");
    ws
}

/// Reads frames until one parses as JSON and satisfies `pred`, skipping
/// heartbeat probes and other interleaved traffic.
async fn next_matching<S>(ws: &mut S, pred: impl Fn(&Value) -> bool) -> Value
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended unexpectedly")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            let value: Value = serde_json::from_str(text.as_str()).expect("frames are JSON");
            if pred(&value) {
                return value;
            }
        }
    }
}

#[tokio::test]
async fn command_fans_out_and_reply_reaches_the_waiter() {
    let server = boot(ConnectionConfig::default()).await;
    let mut ws = connect(server.port, ClientRole::Extension).await;

    ws.send(Message::Text(
        r#"{"type":"CLIENT_READY","role":"extension"}"#.into(),
    ))
    .await
    .unwrap();

    // Producer side: enqueue a command and suspend on its reply.
    let correlator = server.relay.correlator();
    let waiter = tokio::spawn(async move {
        correlator.await_reply("r1", Duration::from_secs(5)).await
    });
    server
        .queue
        .push(
            COMMAND_QUEUE,
            r#"{"type":"SEND","payload":{"prompt":"hi","request_id":"r1"}}"#,
        )
        .await
        .unwrap();

    // The extension receives the command...
    let command = next_matching(&mut ws, |v| v["type"] == json!("SEND")).await;
    assert_eq!(command["payload"]["prompt"], json!("hi"));

    // ...and answers out-of-band with the same correlation id.
    ws.send(Message::Text(
        r#"{"request_id":"r1","payload":"pong"}"#.into(),
    ))
    .await
    .unwrap();

    let payload = waiter.await.unwrap().expect("reply should resolve");
    assert_eq!(payload, json!("pong"));

    server.shutdown.trigger_shutdown();
}

#[tokio::test]
async fn command_waits_in_queue_until_a_client_connects() {
    let server = boot(ConnectionConfig::default()).await;

    let raw = r#"{"type":"echo","payload":"hi","task_id":"t1"}"#;
    server.queue.push(COMMAND_QUEUE, raw).await.unwrap();

    // With no client the dispatcher keeps requeueing; the item never
    // leaves the queue for good.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(server.queue.len(COMMAND_QUEUE).await.unwrap() <= 1);

    let mut ws = connect(server.port, ClientRole::Extension).await;
    let delivered = next_matching(&mut ws, |v| v["type"] == json!("echo")).await;

    // Delivered exactly as enqueued, attempt counter and all.
    assert_eq!(delivered, serde_json::from_str::<Value>(raw).unwrap());

    server.shutdown.trigger_shutdown();
}

#[tokio::test]
async fn unsolicited_frames_reach_the_response_list() {
    let server = boot(ConnectionConfig::default()).await;
    let mut ws = connect(server.port, ClientRole::Extension).await;

    ws.send(Message::Text(
        r#"{"type":"CHAT_OUTPUT","payload":{"text":"the answer"}}"#.into(),
    ))
    .await
    .unwrap();

    let forwarded = server
        .queue
        .blocking_pop(bridge_core::RESPONSE_QUEUE, Some(Duration::from_secs(5)))
        .await
        .unwrap()
        .expect("frame should be forwarded");
    let value: Value = serde_json::from_str(&forwarded).unwrap();
    assert_eq!(value["payload"]["text"], json!("the answer"));

    server.shutdown.trigger_shutdown();
}

#[tokio::test]
async fn heartbeat_probes_flow_and_liveness_tracks_the_connection() {
    let connection = ConnectionConfig {
        probe_interval: Duration::from_millis(50),
        liveness_ttl: Duration::from_millis(200),
        max_missed_probes: 3,
        ..ConnectionConfig::default()
    };
    let server = boot(connection).await;
    let mut ws = connect(server.port, ClientRole::Extension).await;

    // Registration lands shortly after the upgrade handshake.
    let mut connected = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if server.store.get(AGGREGATE_LIVENESS_KEY).await.unwrap().as_deref()
            == Some("connected")
        {
            connected = true;
            break;
        }
    }
    assert!(connected, "aggregate liveness flag should be set on connect");

    // The hub probes; answer one PING to prove the round trip.
    let _ping = next_matching(&mut ws, |v| v["type"] == json!("PING")).await;
    ws.send(Message::Text(r#"{"type":"PONG"}"#.into()))
        .await
        .unwrap();

    ws.close(None).await.unwrap();
    drop(ws);

    // The disconnect clears the aggregate flag once the hub notices.
    let mut cleared = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if server.store.get(AGGREGATE_LIVENESS_KEY).await.unwrap().is_none() {
            cleared = true;
            break;
        }
    }
    assert!(cleared, "aggregate liveness flag should clear on disconnect");

    server.shutdown.trigger_shutdown();
}

#[tokio::test]
async fn silent_client_is_evicted_by_the_heartbeat() {
    let connection = ConnectionConfig {
        probe_interval: Duration::from_millis(30),
        liveness_ttl: Duration::from_millis(100),
        max_missed_probes: 2,
        ..ConnectionConfig::default()
    };
    let server = boot(connection).await;
    let hub = server.relay.hub();

    let _ws = connect(server.port, ClientRole::Worker).await;

    // Wait for registration to land.
    let mut seen = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if hub.client_count() == 1 {
            seen = true;
            break;
        }
    }
    assert!(seen, "client should register");

    // Never answer a probe; the monitor evicts past the deadline.
    let mut evicted = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if hub.is_empty() {
            evicted = true;
            break;
        }
    }
    assert!(evicted, "silent client should be evicted");

    server.shutdown.trigger_shutdown();
}

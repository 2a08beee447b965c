//! WebSocket upgrade handler and per-connection read/write loops.
//!
//! Each accepted socket becomes one registered client: the write loop
//! drains the client's bounded outbound channel onto the socket, and the
//! read loop feeds raw text frames into the hub. Unregistration runs
//! exactly once per connection, whether the client closed, the socket
//! errored, or the heartbeat monitor evicted it first.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::response::IntoResponse;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use bridge_core::ClientRole;

use crate::network::{ClientHandle, OutboundMessage};

use super::AppState;

/// Query parameters accepted on the upgrade request.
#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// `extension` (default) or `worker`.
    role: Option<String>,
}

/// Upgrades an HTTP connection to a WebSocket client connection.
///
/// The client's identity is its remote endpoint; its role comes from the
/// `role` query parameter and defaults to `extension` (the original
/// deployment's single browser extension).
pub async fn ws_upgrade_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let role = params
        .role
        .as_deref()
        .and_then(|r| r.parse().ok())
        .unwrap_or(ClientRole::Extension);

    ws.on_upgrade(move |socket| handle_socket(state, socket, addr.to_string(), role))
}

async fn handle_socket(state: AppState, socket: WebSocket, identity: String, role: ClientRole) {
    let _guard = state.shutdown.in_flight_guard();
    let (handle, outbound_rx) = state.hub.register(&identity, role).await;
    info!(client = %handle.id, %role, "websocket client connected");

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_loop(sink, outbound_rx));

    read_loop(&state, &handle, stream).await;

    state.hub.unregister(&handle).await;
    info!(client = %handle.id, "websocket client disconnected");

    // Dropping the last sender ends the write loop once it has drained
    // anything still queued (including a final close frame).
    drop(handle);
    let _ = writer.await;
}

/// Drains the client's outbound channel onto the socket.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<OutboundMessage>,
) {
    while let Some(msg) = outbound_rx.recv().await {
        match msg {
            OutboundMessage::Text(text) => {
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            OutboundMessage::Close(reason) => {
                let frame = CloseFrame {
                    code: close_code::NORMAL,
                    reason: reason.unwrap_or_default().into(),
                };
                let _ = sink.send(Message::Close(Some(frame))).await;
                break;
            }
        }
    }
}

/// Feeds inbound text frames into the hub until the socket ends.
async fn read_loop(
    state: &AppState,
    handle: &Arc<ClientHandle>,
    mut stream: SplitStream<WebSocket>,
) {
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                state.hub.handle_inbound(handle, text.as_str()).await;
            }
            Ok(Message::Binary(_)) => {
                warn!(client = %handle.id, "unexpected binary frame, ignoring");
            }
            Ok(Message::Close(_)) => {
                debug!(client = %handle.id, "client sent close frame");
                break;
            }
            // axum answers protocol-level pings itself.
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Err(error) => {
                debug!(client = %handle.id, %error, "websocket read error");
                break;
            }
        }
    }
}

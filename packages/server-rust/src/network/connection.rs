//! Client connection handles and the connection hub.
//!
//! The hub owns the authoritative in-memory set of live clients (keyed by
//! remote endpoint), their liveness keys in the Status Store, and the
//! split of inbound traffic into control frames (consumed here) and
//! application frames (handed to the relay router). Per-client
//! backpressure comes from bounded mpsc channels; the registry itself is
//! a `DashMap` so the acceptor never contends with broadcasts.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use bridge_core::{
    client_liveness_key, AppFrame, ClientRole, ControlFrame, InboundFrame,
    AGGREGATE_LIVENESS_KEY,
};

use crate::traits::StatusStore;

use super::config::ConnectionConfig;

/// A client's identity: its remote endpoint, unique among currently
/// registered clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(pub String);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Frame to be sent outbound to a client.
#[derive(Debug)]
pub enum OutboundMessage {
    /// A single JSON text frame.
    Text(String),
    /// A close frame with an optional reason.
    Close(Option<String>),
}

/// An application frame received from a client, tagged with its origin.
///
/// Delivered to the relay router over the hub's inbound channel.
#[derive(Debug)]
pub struct InboundApp {
    pub client: ClientId,
    pub frame: AppFrame,
}

/// Mutable per-client state.
#[derive(Debug)]
pub struct ClientMetadata {
    /// Whether the client announced readiness after connecting.
    pub ready: bool,
    /// Whether the client's page scripting context is attached.
    pub dom_ready: bool,
    /// URL reported with the DOM readiness signal, if any.
    pub page_url: Option<String>,
    /// Last time any frame was received from this client.
    pub last_seen: Instant,
}

impl ClientMetadata {
    fn new() -> Self {
        Self {
            ready: false,
            dom_ready: false,
            page_url: None,
            last_seen: Instant::now(),
        }
    }
}

/// Handle to a single client connection.
///
/// The receiver end of the bounded outbound channel is held by the
/// WebSocket write loop; this handle holds the sender end.
#[derive(Debug)]
pub struct ClientHandle {
    /// The client's identity (remote endpoint).
    pub id: ClientId,
    /// Whether this is a browser extension or a headless-browser worker.
    pub role: ClientRole,
    /// Sender end of the bounded outbound frame channel.
    pub tx: mpsc::Sender<OutboundMessage>,
    /// Mutable state (readiness flags, last-observed-alive timestamp).
    pub metadata: Arc<RwLock<ClientMetadata>>,
    /// When this client connected.
    pub connected_at: Instant,
}

impl ClientHandle {
    /// Attempts to send a frame without blocking.
    ///
    /// Returns `true` if the frame was enqueued, `false` if the channel
    /// is full or the connection has been closed.
    #[must_use]
    pub fn try_send(&self, msg: OutboundMessage) -> bool {
        self.tx.try_send(msg).is_ok()
    }

    /// Whether the write loop is still draining this client's channel.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// The connection hub: authoritative registry of live clients plus their
/// liveness state in the Status Store.
pub struct ClientHub {
    clients: DashMap<ClientId, Arc<ClientHandle>>,
    store: Arc<dyn StatusStore>,
    inbound_tx: mpsc::Sender<InboundApp>,
    config: ConnectionConfig,
    // Serializes registry mutations so the empty<->non-empty transition
    // that drives the aggregate liveness flag is observed exactly once.
    transition: Mutex<()>,
}

impl ClientHub {
    /// Creates a hub over the given Status Store.
    ///
    /// Returns the hub and the receiver end of the inbound
    /// application-frame channel; the relay router drains it.
    #[must_use]
    pub fn new(
        config: ConnectionConfig,
        store: Arc<dyn StatusStore>,
    ) -> (Self, mpsc::Receiver<InboundApp>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_channel_capacity);
        let hub = Self {
            clients: DashMap::new(),
            store,
            inbound_tx,
            config,
            transition: Mutex::new(()),
        };
        (hub, inbound_rx)
    }

    /// Registers a client, returning its handle and the receiver the
    /// write loop drains.
    ///
    /// A duplicate identity replaces the prior entry (last-writer-wins):
    /// the replaced handle's channel receives a close frame and its later
    /// `unregister` becomes a no-op. This happens when a client reconnects
    /// from the same endpoint before its old socket is torn down.
    pub async fn register(
        &self,
        identity: &str,
        role: ClientRole,
    ) -> (Arc<ClientHandle>, mpsc::Receiver<OutboundMessage>) {
        let id = ClientId(identity.to_string());
        let (tx, rx) = mpsc::channel(self.config.outbound_channel_capacity);

        let handle = Arc::new(ClientHandle {
            id: id.clone(),
            role,
            tx,
            metadata: Arc::new(RwLock::new(ClientMetadata::new())),
            connected_at: Instant::now(),
        });

        let (was_empty, replaced) = {
            let _guard = self.transition.lock();
            let was_empty = self.clients.is_empty();
            let replaced = self.clients.insert(id.clone(), Arc::clone(&handle));
            (was_empty, replaced)
        };

        if let Some(old) = replaced {
            warn!(client = %id, "duplicate identity registered, replacing prior connection");
            let _ = old.try_send(OutboundMessage::Close(Some(
                "replaced by newer connection".to_string(),
            )));
        }

        metrics::gauge!("bridge_clients_connected").set(usize_to_f64(self.clients.len()));
        debug!(client = %id, %role, "client registered");

        let ttl = Some(self.config.liveness_ttl);
        if let Err(error) = self
            .store
            .set(&client_liveness_key(identity), "connected", ttl)
            .await
        {
            warn!(client = %id, %error, "failed to set client liveness key");
        }
        if was_empty {
            if let Err(error) = self.store.set(AGGREGATE_LIVENESS_KEY, "connected", ttl).await {
                warn!(%error, "failed to set aggregate liveness key");
            }
        }

        (handle, rx)
    }

    /// Unregisters a client.
    ///
    /// Removes the registry entry only when it still refers to `handle`,
    /// so the teardown of a replaced connection cannot evict its
    /// replacement, and concurrent disconnect and heartbeat-timeout
    /// triggers take effect exactly once. Returns whether this call
    /// performed the removal.
    pub async fn unregister(&self, handle: &Arc<ClientHandle>) -> bool {
        let (removed, now_empty) = {
            let _guard = self.transition.lock();
            let removed = self
                .clients
                .remove_if(&handle.id, |_, current| Arc::ptr_eq(current, handle))
                .is_some();
            (removed, removed && self.clients.is_empty())
        };

        if !removed {
            return false;
        }

        metrics::gauge!("bridge_clients_connected").set(usize_to_f64(self.clients.len()));
        debug!(client = %handle.id, "client unregistered");

        if let Err(error) = self.store.delete(&client_liveness_key(&handle.id.0)).await {
            warn!(client = %handle.id, %error, "failed to delete client liveness key");
        }
        if now_empty {
            if let Err(error) = self.store.delete(AGGREGATE_LIVENESS_KEY).await {
                warn!(%error, "failed to clear aggregate liveness key");
            }
        }

        true
    }

    /// Number of currently registered clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Whether no clients are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Returns all registered clients as owned handles.
    #[must_use]
    pub fn clients(&self) -> Vec<Arc<ClientHandle>> {
        self.clients.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Sends a text frame to every registered client except `excluding`.
    ///
    /// Uses non-blocking sends so one slow client cannot stall the rest;
    /// per-target failures are collected and returned, never raised.
    pub fn broadcast(&self, text: &str, excluding: Option<&ClientId>) -> Vec<ClientId> {
        let mut failed = Vec::new();
        for entry in &self.clients {
            let handle = entry.value();
            if excluding == Some(&handle.id) {
                continue;
            }
            if !handle.try_send(OutboundMessage::Text(text.to_string())) {
                failed.push(handle.id.clone());
            }
        }
        if !failed.is_empty() {
            metrics::counter!("bridge_broadcast_send_failures_total")
                .increment(failed.len() as u64);
            warn!(failed = failed.len(), "broadcast skipped unreachable clients");
        }
        failed
    }

    /// Processes one raw inbound text frame from a client.
    ///
    /// Malformed frames are logged and dropped; they are never fatal to
    /// the connection. Control frames update liveness and readiness state
    /// here; application frames go to the relay router.
    pub async fn handle_inbound(&self, handle: &Arc<ClientHandle>, raw: &str) {
        let frame = match InboundFrame::parse(raw) {
            Ok(frame) => frame,
            Err(error) => {
                metrics::counter!("bridge_malformed_frames_total").increment(1);
                warn!(client = %handle.id, %error, "dropping malformed frame");
                return;
            }
        };

        {
            let mut metadata = handle.metadata.write().await;
            metadata.last_seen = Instant::now();
        }

        match frame {
            InboundFrame::Control(ControlFrame::Ping) => {
                let _ = handle.try_send(OutboundMessage::Text(ControlFrame::Pong.to_wire()));
            }
            InboundFrame::Control(ControlFrame::Pong) => {
                // last_seen was already refreshed; nothing else to do.
            }
            InboundFrame::Control(ControlFrame::ClientReady(payload)) => {
                let mut metadata = handle.metadata.write().await;
                metadata.ready = true;
                debug!(client = %handle.id, role = ?payload.role, "client ready");
            }
            InboundFrame::Control(ControlFrame::DomReady(payload)) => {
                let mut metadata = handle.metadata.write().await;
                metadata.dom_ready = true;
                metadata.page_url = payload.url;
                debug!(client = %handle.id, "client DOM ready");
            }
            InboundFrame::App(frame) => {
                let inbound = InboundApp {
                    client: handle.id.clone(),
                    frame,
                };
                if self.inbound_tx.send(inbound).await.is_err() {
                    warn!(client = %handle.id, "inbound router gone, dropping frame");
                }
            }
        }
    }

    /// Returns clients that have been silent longer than `max_age`.
    pub async fn stale_clients(&self, max_age: Duration) -> Vec<Arc<ClientHandle>> {
        let now = Instant::now();
        let mut stale = Vec::new();
        for handle in self.clients() {
            let last_seen = handle.metadata.read().await.last_seen;
            if now.duration_since(last_seen) > max_age {
                stale.push(handle);
            }
        }
        stale
    }

    /// Refreshes the per-client and aggregate liveness keys with `ttl`.
    ///
    /// Called once per heartbeat tick so liveness keys outlive exactly one
    /// probe cycle plus the TTL grace.
    pub async fn refresh_liveness(&self, ttl: Duration) -> anyhow::Result<()> {
        for handle in self.clients() {
            self.store
                .set(&client_liveness_key(&handle.id.0), "connected", Some(ttl))
                .await?;
        }
        if !self.is_empty() {
            self.store
                .set(AGGREGATE_LIVENESS_KEY, "connected", Some(ttl))
                .await?;
        }
        Ok(())
    }

    /// Removes and returns all clients. Used during graceful shutdown.
    pub async fn drain_all(&self) -> Vec<Arc<ClientHandle>> {
        let handles = {
            let _guard = self.transition.lock();
            let keys: Vec<ClientId> = self.clients.iter().map(|e| e.key().clone()).collect();
            let mut handles = Vec::with_capacity(keys.len());
            for key in keys {
                if let Some((_, handle)) = self.clients.remove(&key) {
                    handles.push(handle);
                }
            }
            handles
        };

        metrics::gauge!("bridge_clients_connected").set(0.0);
        for handle in &handles {
            if let Err(error) = self.store.delete(&client_liveness_key(&handle.id.0)).await {
                warn!(client = %handle.id, %error, "failed to delete client liveness key");
            }
        }
        if !handles.is_empty() {
            if let Err(error) = self.store.delete(AGGREGATE_LIVENESS_KEY).await {
                warn!(%error, "failed to clear aggregate liveness key");
            }
        }
        handles
    }
}

#[allow(clippy::cast_precision_loss)]
fn usize_to_f64(n: usize) -> f64 {
    n as f64
}

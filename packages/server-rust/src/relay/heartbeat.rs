//! Heartbeat monitor: detects silently-dead clients.
//!
//! Browser tabs get suspended without ever sending a close frame. Each
//! sweep probes every client with `PING`, force-unregisters clients that
//! have been silent past the deadline, and refreshes the liveness keys so
//! an external reader never trusts a stale "connected" flag for longer
//! than one missed probe cycle plus the TTL grace.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use bridge_core::ControlFrame;

use crate::network::{ClientHub, ConnectionConfig, OutboundMessage};

use super::worker::BackgroundRunnable;

/// On-demand work items for the heartbeat worker.
#[derive(Debug)]
pub enum ProbeTask {
    /// Run a full probe/evict/refresh sweep outside the tick schedule.
    Sweep,
}

/// Periodic liveness prober over the hub.
pub struct HeartbeatMonitor {
    hub: Arc<ClientHub>,
    config: ConnectionConfig,
}

impl HeartbeatMonitor {
    /// Creates a monitor over the given hub.
    #[must_use]
    pub fn new(hub: Arc<ClientHub>, config: ConnectionConfig) -> Self {
        Self { hub, config }
    }

    /// One probe/evict/refresh cycle.
    pub async fn sweep(&self) {
        let unreachable = self.hub.broadcast(&ControlFrame::Ping.to_wire(), None);
        if !unreachable.is_empty() {
            debug!(count = unreachable.len(), "probe skipped unreachable clients");
        }

        // Evict before refreshing so a dead client's liveness key is not
        // renewed one last time.
        let stale = self.hub.stale_clients(self.config.stale_after()).await;
        for handle in stale {
            warn!(
                client = %handle.id,
                connected_for = ?handle.connected_at.elapsed(),
                deadline = ?self.config.stale_after(),
                "client silent past deadline, unregistering"
            );
            let _ = handle.try_send(OutboundMessage::Close(Some(
                "liveness deadline exceeded".to_string(),
            )));
            self.hub.unregister(&handle).await;
            metrics::counter!("bridge_clients_evicted_total").increment(1);
        }

        if let Err(error) = self.hub.refresh_liveness(self.config.liveness_ttl).await {
            warn!(%error, "failed to refresh liveness keys");
        }
    }
}

#[async_trait]
impl BackgroundRunnable for HeartbeatMonitor {
    type Task = ProbeTask;

    async fn run(&mut self, task: ProbeTask) {
        match task {
            ProbeTask::Sweep => self.sweep().await,
        }
    }

    async fn on_tick(&mut self) {
        self.sweep().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::traits::StatusStore;
    use bridge_core::{ClientRole, AGGREGATE_LIVENESS_KEY};
    use std::time::Duration;

    fn short_config() -> ConnectionConfig {
        ConnectionConfig {
            probe_interval: Duration::from_millis(10),
            max_missed_probes: 2,
            liveness_ttl: Duration::from_millis(50),
            ..ConnectionConfig::default()
        }
    }

    fn fixture() -> (HeartbeatMonitor, Arc<ClientHub>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let (hub, _inbound_rx) = ClientHub::new(short_config(), store.clone() as _);
        let hub = Arc::new(hub);
        (
            HeartbeatMonitor::new(Arc::clone(&hub), short_config()),
            hub,
            store,
        )
    }

    #[tokio::test]
    async fn sweep_probes_connected_clients() {
        let (monitor, hub, _store) = fixture();
        let (_handle, mut rx) = hub.register("c:1", ClientRole::Extension).await;

        monitor.sweep().await;

        let msg = rx.try_recv().unwrap();
        assert!(matches!(msg, OutboundMessage::Text(t) if t == r#"{"type":"PING"}"#));
    }

    #[tokio::test]
    async fn silent_client_is_evicted_and_aggregate_cleared() {
        let (monitor, hub, store) = fixture();
        let (_handle, _rx) = hub.register("c:1", ClientRole::Extension).await;

        // Past probe_interval * max_missed_probes with no inbound frame.
        tokio::time::sleep(Duration::from_millis(40)).await;
        monitor.sweep().await;

        assert!(hub.is_empty());
        assert_eq!(store.get(AGGREGATE_LIVENESS_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn responsive_client_survives_sweeps() {
        let (monitor, hub, store) = fixture();
        let (handle, mut rx) = hub.register("c:1", ClientRole::Extension).await;

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            hub.handle_inbound(&handle, r#"{"type":"PONG"}"#).await;
            monitor.sweep().await;
            while rx.try_recv().is_ok() {}
        }

        assert_eq!(hub.client_count(), 1);
        assert_eq!(
            store.get(AGGREGATE_LIVENESS_KEY).await.unwrap().as_deref(),
            Some("connected")
        );
    }

    #[tokio::test]
    async fn sweep_refreshes_liveness_ttl() {
        let (monitor, hub, store) = fixture();
        let (handle, _rx) = hub.register("c:1", ClientRole::Extension).await;

        // Keep the client alive across two TTL windows via sweeps.
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            hub.handle_inbound(&handle, r#"{"type":"PONG"}"#).await;
            monitor.sweep().await;
        }

        assert_eq!(
            store.get(AGGREGATE_LIVENESS_KEY).await.unwrap().as_deref(),
            Some("connected")
        );
    }
}

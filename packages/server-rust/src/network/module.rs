//! Network module with deferred startup lifecycle.
//!
//! Implements the deferred startup pattern: `new()` takes the shared
//! state, `start()` binds the TCP listener, and `serve()` starts
//! accepting connections. The separation lets the relay spawn its
//! background tasks between `start()` and `serve()`.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::relay::Correlator;

use super::config::NetworkConfig;
use super::connection::{ClientHub, OutboundMessage};
use super::handlers::{
    health_handler, liveness_handler, readiness_handler, ws_upgrade_handler, AppState,
};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;

/// Manages the HTTP/WebSocket server lifecycle.
///
/// 1. `new()` -- takes the hub, correlator, and shutdown controller
/// 2. `start()` -- binds the TCP listener to the configured address
/// 3. `serve()` -- accepts connections until shutdown is signalled
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    hub: Arc<ClientHub>,
    correlator: Arc<Correlator>,
    shutdown: Arc<ShutdownController>,
}

impl NetworkModule {
    /// Creates a network module without binding any port.
    #[must_use]
    pub fn new(
        config: NetworkConfig,
        hub: Arc<ClientHub>,
        correlator: Arc<Correlator>,
        shutdown: Arc<ShutdownController>,
    ) -> Self {
        Self {
            config,
            listener: None,
            hub,
            correlator,
            shutdown,
        }
    }

    /// Assembles the axum router with all routes and middleware.
    ///
    /// Routes:
    /// - `GET /health` -- detailed health JSON
    /// - `GET /health/live` -- liveness probe
    /// - `GET /health/ready` -- readiness probe
    /// - `GET /ws` -- WebSocket upgrade (`?role=extension|worker`)
    #[must_use]
    pub fn build_router(&self) -> Router {
        Self::router_for(
            &self.config,
            Arc::clone(&self.hub),
            Arc::clone(&self.correlator),
            Arc::clone(&self.shutdown),
        )
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound port, which may differ from the
    /// configured port when port 0 is used (OS-assigned).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!("TCP listener bound to {}:{}", self.config.host, port);

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves connections until the shutdown future resolves, then drains.
    ///
    /// After the shutdown signal:
    /// 1. Health state transitions to Draining
    /// 2. All clients receive a close frame
    /// 3. Waits up to 30 seconds for in-flight connections to finish
    ///
    /// # Errors
    ///
    /// Returns an error if the server hits a fatal I/O error.
    ///
    /// # Panics
    ///
    /// Panics if `start()` was not called before `serve()`.
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .expect("start() must be called before serve()");
        let router = Self::router_for(
            &self.config,
            Arc::clone(&self.hub),
            Arc::clone(&self.correlator),
            Arc::clone(&self.shutdown),
        );

        // Transition to Ready so readiness probes pass.
        self.shutdown.set_ready();

        info!("serving HTTP/WS connections");
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        drain_clients(self.hub, self.shutdown).await;
        Ok(())
    }

    fn router_for(
        config: &NetworkConfig,
        hub: Arc<ClientHub>,
        correlator: Arc<Correlator>,
        shutdown: Arc<ShutdownController>,
    ) -> Router {
        let state = AppState {
            hub,
            correlator,
            shutdown,
            config: Arc::new(config.clone()),
            start_time: Instant::now(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .route("/ws", get(ws_upgrade_handler))
            .layer(build_http_layers(config))
            .with_state(state)
    }
}

/// Drains all clients and waits for their connection tasks to finish.
async fn drain_clients(hub: Arc<ClientHub>, shutdown: Arc<ShutdownController>) {
    shutdown.trigger_shutdown();

    let handles = hub.drain_all().await;
    if !handles.is_empty() {
        info!("draining {} clients", handles.len());
        for handle in &handles {
            let _ = handle.try_send(OutboundMessage::Close(Some(
                "server shutting down".to_string(),
            )));
        }
    }

    if shutdown.wait_for_drain(Duration::from_secs(30)).await {
        info!("all clients drained");
    } else {
        warn!("drain timeout expired with connections remaining");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ConnectionConfig;
    use crate::storage::MemoryStore;

    fn test_module() -> NetworkModule {
        let store = Arc::new(MemoryStore::new());
        let (hub, _inbound_rx) = ClientHub::new(ConnectionConfig::default(), store as _);
        NetworkModule::new(
            NetworkConfig::default(),
            Arc::new(hub),
            Arc::new(Correlator::new()),
            Arc::new(ShutdownController::new()),
        )
    }

    #[test]
    fn new_creates_module_without_binding() {
        let module = test_module();
        assert!(module.listener.is_none());
    }

    #[test]
    fn build_router_creates_router() {
        let module = test_module();
        let _router = module.build_router();
    }

    #[tokio::test]
    async fn start_binds_to_os_assigned_port() {
        let mut module = test_module();
        let port = module.start().await.expect("start should succeed");
        assert!(port > 0, "OS-assigned port should be > 0");
        assert!(module.listener.is_some());
    }

    #[tokio::test]
    #[should_panic(expected = "start() must be called before serve()")]
    async fn serve_panics_without_start() {
        let module = test_module();
        let _ = module.serve(std::future::pending::<()>()).await;
    }
}

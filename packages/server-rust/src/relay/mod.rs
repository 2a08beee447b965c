//! Command relay: dispatcher, correlator, heartbeat, and their wiring.
//!
//! `RelayModule` owns the hub, the correlator, and the background tasks
//! that move frames between the Durable Queue and the connected clients.
//! Cross-context work is handed off over channels: the hub's read loops
//! feed one inbound channel, and a single router task decides whether an
//! application frame resolves a waiting caller or lands on the response
//! list for external consumers.

pub mod config;
pub mod correlator;
pub mod dispatcher;
pub mod heartbeat;
pub mod tasks;
pub mod worker;

pub use config::RelayConfig;
pub use correlator::{CorrelationError, Correlator};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use heartbeat::{HeartbeatMonitor, ProbeTask};
pub use tasks::{TaskReadOutcome, TaskTracker};
pub use worker::{BackgroundRunnable, BackgroundWorker};

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::network::{ClientHub, ConnectionConfig, InboundApp, ShutdownController};
use crate::traits::{DurableQueue, StatusStore};

/// Owns the relay's shared state and background tasks.
///
/// Construction allocates the hub and correlator so the network layer can
/// reference them; `start()` spawns the dispatcher, the inbound router,
/// and the heartbeat worker; `stop()` tears them down after the shutdown
/// signal has fired.
pub struct RelayModule {
    hub: Arc<ClientHub>,
    correlator: Arc<Correlator>,
    queue: Arc<dyn DurableQueue>,
    store: Arc<dyn StatusStore>,
    config: Arc<RelayConfig>,
    connection_config: ConnectionConfig,
    inbound_rx: Option<mpsc::Receiver<InboundApp>>,
    dispatcher_task: Option<JoinHandle<()>>,
    router_task: Option<JoinHandle<()>>,
    heartbeat: Option<BackgroundWorker<HeartbeatMonitor>>,
}

impl RelayModule {
    /// Creates the relay over the given external backends.
    #[must_use]
    pub fn new(
        config: RelayConfig,
        connection_config: ConnectionConfig,
        queue: Arc<dyn DurableQueue>,
        store: Arc<dyn StatusStore>,
    ) -> Self {
        let (hub, inbound_rx) = ClientHub::new(connection_config.clone(), Arc::clone(&store));
        Self {
            hub: Arc::new(hub),
            correlator: Arc::new(Correlator::new()),
            queue,
            store,
            config: Arc::new(config),
            connection_config,
            inbound_rx: Some(inbound_rx),
            dispatcher_task: None,
            router_task: None,
            heartbeat: None,
        }
    }

    /// Shared handle to the connection hub.
    #[must_use]
    pub fn hub(&self) -> Arc<ClientHub> {
        Arc::clone(&self.hub)
    }

    /// Shared handle to the correlator.
    #[must_use]
    pub fn correlator(&self) -> Arc<Correlator> {
        Arc::clone(&self.correlator)
    }

    /// Spawns the dispatcher, inbound router, and heartbeat worker.
    ///
    /// # Panics
    ///
    /// Panics if called twice: the inbound channel can only be drained by
    /// one router.
    pub fn start(&mut self, shutdown: &ShutdownController) {
        let inbound_rx = self
            .inbound_rx
            .take()
            .expect("start() may only be called once");

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.hub),
            Arc::clone(&self.store),
            Arc::clone(&self.config),
        );
        self.dispatcher_task = Some(tokio::spawn(dispatcher.run(shutdown.shutdown_receiver())));

        self.router_task = Some(tokio::spawn(route_inbound(
            inbound_rx,
            Arc::clone(&self.hub),
            Arc::clone(&self.correlator),
            Arc::clone(&self.queue),
            Arc::clone(&self.config),
            shutdown.shutdown_receiver(),
        )));

        self.heartbeat = Some(BackgroundWorker::start(
            HeartbeatMonitor::new(Arc::clone(&self.hub), self.connection_config.clone()),
            self.connection_config.probe_interval,
        ));

        info!("relay started");
    }

    /// Stops the background tasks. Call after the shutdown signal fired
    /// so the dispatcher and router have already begun winding down.
    pub async fn stop(&mut self) {
        if let Some(mut heartbeat) = self.heartbeat.take() {
            heartbeat.stop().await;
        }
        for task in [self.dispatcher_task.take(), self.router_task.take()]
            .into_iter()
            .flatten()
        {
            let _ = task.await;
        }
        info!("relay stopped");
    }
}

/// Routes inbound application frames until shutdown.
///
/// Frames carrying a correlation id resolve the matching waiter; a reply
/// with no outstanding waiter is dropped (late and duplicate replies are
/// expected). Everything else goes onto the response list for external
/// consumers; kinds listed in `mirror_kinds` are additionally fanned back
/// out to the other clients so a worker can act on output the extension
/// captured.
async fn route_inbound(
    mut inbound_rx: mpsc::Receiver<InboundApp>,
    hub: Arc<ClientHub>,
    correlator: Arc<Correlator>,
    queue: Arc<dyn DurableQueue>,
    config: Arc<RelayConfig>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            inbound = inbound_rx.recv() => {
                let Some(InboundApp { client, frame }) = inbound else {
                    break;
                };
                if let Some(request_id) = &frame.request_id {
                    if !correlator.resolve(request_id, frame.payload.clone()) {
                        debug!(%client, %request_id, "reply with no waiter, dropped");
                    }
                    continue;
                }

                let raw = frame.raw.to_string();
                if frame
                    .kind
                    .as_deref()
                    .is_some_and(|kind| config.mirror_kinds.iter().any(|m| m == kind))
                {
                    let _ = hub.broadcast(&raw, Some(&client));
                }

                metrics::counter!("bridge_unsolicited_frames_total").increment(1);
                if let Err(error) = queue.push(&config.response_queue, &raw).await {
                    warn!(%client, %error, "failed to push frame to response list");
                }
            }
        }
    }
    info!("inbound router stopped");
}

//! Bridge server binary: wires the in-memory backends, the relay, and
//! the network module into one long-running process.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bridge_server::network::{
    ConnectionConfig, NetworkConfig, NetworkModule, ShutdownController,
};
use bridge_server::relay::{RelayConfig, RelayModule};
use bridge_server::storage::{MemoryQueue, MemoryStore};

#[derive(Debug, Parser)]
#[command(
    name = "bridge-server",
    about = "Command relay between backend producers and browser-side clients",
    version
)]
struct Args {
    /// Bind address.
    #[arg(long, env = "BRIDGE_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(long, env = "BRIDGE_PORT", default_value_t = 8765)]
    port: u16,

    /// Seconds between liveness probes.
    #[arg(long, env = "BRIDGE_PROBE_INTERVAL_SECS", default_value_t = 10)]
    probe_interval_secs: u64,

    /// TTL in seconds on liveness keys; must exceed the probe interval.
    #[arg(long, env = "BRIDGE_LIVENESS_TTL_SECS", default_value_t = 15)]
    liveness_ttl_secs: u64,

    /// Probes a client may miss before being unregistered.
    #[arg(long, env = "BRIDGE_MAX_MISSED_PROBES", default_value_t = 3)]
    max_missed_probes: u32,

    /// Delivery attempts before an undeliverable command is dropped.
    #[arg(long, env = "BRIDGE_MAX_DELIVERY_ATTEMPTS", default_value_t = 5)]
    max_delivery_attempts: u32,

    /// Frame kinds mirrored to the other connected clients when received
    /// (comma-separated).
    #[arg(long = "mirror-kind", env = "BRIDGE_MIRROR_KINDS", value_delimiter = ',')]
    mirror_kinds: Vec<String>,

    /// Expose Prometheus metrics on this port.
    #[arg(long, env = "BRIDGE_METRICS_PORT")]
    metrics_port: Option<u16>,

    /// Emit logs as JSON lines instead of human-readable text.
    #[arg(long, env = "BRIDGE_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    if let Some(port) = args.metrics_port {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], port))
            .install()?;
        info!(port, "prometheus exporter listening");
    }

    let connection = ConnectionConfig {
        probe_interval: Duration::from_secs(args.probe_interval_secs),
        liveness_ttl: Duration::from_secs(args.liveness_ttl_secs),
        max_missed_probes: args.max_missed_probes,
        ..ConnectionConfig::default()
    };
    anyhow::ensure!(
        connection.liveness_ttl > connection.probe_interval,
        "liveness TTL must exceed the probe interval"
    );
    let network_config = NetworkConfig {
        host: args.host,
        port: args.port,
        connection: connection.clone(),
        ..NetworkConfig::default()
    };
    let relay_config = RelayConfig {
        max_delivery_attempts: args.max_delivery_attempts,
        mirror_kinds: args.mirror_kinds,
        ..RelayConfig::default()
    };

    // The in-memory backends serve the single-process deployment; a Redis
    // deployment swaps in adapters implementing the same traits.
    let queue = Arc::new(MemoryQueue::new());
    let store = Arc::new(MemoryStore::new());

    let shutdown = Arc::new(ShutdownController::new());
    let mut relay = RelayModule::new(relay_config, connection, queue, store);
    let mut network = NetworkModule::new(
        network_config,
        relay.hub(),
        relay.correlator(),
        Arc::clone(&shutdown),
    );

    let port = network.start().await?;
    relay.start(&shutdown);
    info!(port, "bridge server up");

    let signal_shutdown = Arc::clone(&shutdown);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_shutdown.trigger_shutdown();
        }
    });

    let mut shutdown_rx = shutdown.shutdown_receiver();
    network
        .serve(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await?;

    relay.stop().await;
    info!("bridge server stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

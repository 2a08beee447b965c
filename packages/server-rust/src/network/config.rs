//! Network configuration types for the bridge server.

use std::time::Duration;

/// Top-level network configuration for the server.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Bind address for the server.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Per-connection settings.
    pub connection: ConnectionConfig,
    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// Maximum time to wait for an HTTP request to complete. Does not
    /// apply to upgraded WebSocket connections.
    pub request_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            connection: ConnectionConfig::default(),
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Per-connection settings controlling backpressure and liveness.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Bounded mpsc channel capacity for outbound frames per client.
    pub outbound_channel_capacity: usize,
    /// Capacity of the shared inbound application-frame channel feeding
    /// the router.
    pub inbound_channel_capacity: usize,
    /// Interval between liveness probes.
    pub probe_interval: Duration,
    /// Probes a client may miss before it is forcibly unregistered.
    pub max_missed_probes: u32,
    /// TTL on liveness keys in the Status Store. Slightly longer than
    /// `probe_interval` so a reader never sees a stale "connected" past
    /// one missed probe cycle plus this grace.
    pub liveness_ttl: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            outbound_channel_capacity: 256,
            inbound_channel_capacity: 1024,
            probe_interval: Duration::from_secs(10),
            max_missed_probes: 3,
            liveness_ttl: Duration::from_secs(15),
        }
    }
}

impl ConnectionConfig {
    /// Silence threshold past which a client is considered dead.
    #[must_use]
    pub fn stale_after(&self) -> Duration {
        self.probe_interval * self.max_missed_probes
    }
}

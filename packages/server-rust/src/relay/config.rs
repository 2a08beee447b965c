//! Relay configuration: queue names, delivery tuning, and timeouts.

use std::time::Duration;

use bridge_core::{COMMAND_QUEUE, RESPONSE_QUEUE};

/// Configuration for the dispatcher, router, and correlation defaults.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Durable Queue list the dispatcher drains.
    pub command_queue: String,
    /// Durable Queue list receiving unsolicited client frames.
    pub response_queue: String,
    /// How long one blocking pop waits. `None` blocks indefinitely; the
    /// dispatcher's shutdown signal still interrupts the wait.
    pub pop_timeout: Option<Duration>,
    /// Pause after requeueing a command that found no recipients, so an
    /// empty hub does not become a hot requeue loop.
    pub requeue_backoff: Duration,
    /// Pause after a queue backend failure before retrying.
    pub backend_retry_backoff: Duration,
    /// Delivery attempts before a repeatedly undeliverable command is
    /// dropped. Counts only attempts where every send failed; waiting for
    /// a first client to connect is not an attempt.
    pub max_delivery_attempts: u32,
    /// Application frame kinds mirrored to the other connected clients
    /// when received, in addition to landing on the response list. Lets a
    /// worker act on output the extension captured without a producer in
    /// the loop.
    pub mirror_kinds: Vec<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            command_queue: COMMAND_QUEUE.to_string(),
            response_queue: RESPONSE_QUEUE.to_string(),
            pop_timeout: None,
            requeue_backoff: Duration::from_secs(1),
            backend_retry_backoff: Duration::from_secs(5),
            max_delivery_attempts: 5,
            mirror_kinds: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_shared_queue_names() {
        let config = RelayConfig::default();
        assert_eq!(config.command_queue, COMMAND_QUEUE);
        assert_eq!(config.response_queue, RESPONSE_QUEUE);
        assert_eq!(config.pop_timeout, None);
        assert!(config.max_delivery_attempts > 0);
    }
}

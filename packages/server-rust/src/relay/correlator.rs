//! Request/response correlation.
//!
//! A caller issues a request carrying a fresh correlation id, then
//! suspends on [`Correlator::await_reply`] until the hub observes a reply
//! bearing the same id or the deadline elapses. Suspension is a real
//! oneshot-channel wait under a timer, never a poll loop over shared
//! state, so wake-up latency is bounded by the scheduler rather than a
//! poll interval.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

/// Outcome of a correlation wait that did not produce a payload.
#[derive(Debug, thiserror::Error)]
pub enum CorrelationError {
    /// A waiter for this id is already outstanding. Correlation ids must
    /// be fresh per request; reusing one is a caller error and fails
    /// fast rather than racing two waiters for one reply.
    #[error("a waiter for correlation id `{0}` is already outstanding")]
    DuplicateWaiter(String),
    /// No reply arrived within the deadline. The waiter has been removed;
    /// a reply arriving later is dropped as a no-op.
    #[error("no reply for correlation id `{id}` within {timeout:?}")]
    Timeout { id: String, timeout: Duration },
    /// The waiter was cancelled before a reply arrived.
    #[error("wait for correlation id `{0}` was cancelled")]
    Cancelled(String),
}

struct Waiter {
    tx: oneshot::Sender<Value>,
    created_at: Instant,
}

/// Tracks outstanding requests by correlation id and resolves each one
/// exactly once: with a payload, a timeout, or a cancellation.
pub struct Correlator {
    waiters: Mutex<HashMap<String, Waiter>>,
}

impl Correlator {
    /// Creates a correlator with no outstanding waiters.
    #[must_use]
    pub fn new() -> Self {
        Self {
            waiters: Mutex::new(HashMap::new()),
        }
    }

    /// Suspends until a reply bearing `id` arrives, or `timeout` elapses.
    ///
    /// Distinct ids may be awaited concurrently without interference.
    ///
    /// # Errors
    ///
    /// - [`CorrelationError::DuplicateWaiter`] when a waiter for `id` is
    ///   already outstanding (fails fast, the existing waiter is kept).
    /// - [`CorrelationError::Timeout`] when the deadline elapses; the
    ///   waiter is fully removed before this returns, so a late reply
    ///   cannot resurrect it.
    /// - [`CorrelationError::Cancelled`] when [`Self::cancel`] dropped
    ///   the waiter first.
    pub async fn await_reply(
        &self,
        id: &str,
        timeout: Duration,
    ) -> Result<Value, CorrelationError> {
        let rx = {
            let mut waiters = self.waiters.lock();
            if waiters.contains_key(id) {
                return Err(CorrelationError::DuplicateWaiter(id.to_string()));
            }
            let (tx, rx) = oneshot::channel();
            waiters.insert(
                id.to_string(),
                Waiter {
                    tx,
                    created_at: Instant::now(),
                },
            );
            rx
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(payload)) => {
                metrics::counter!("bridge_replies_resolved_total").increment(1);
                Ok(payload)
            }
            Ok(Err(_)) => Err(CorrelationError::Cancelled(id.to_string())),
            Err(_) => {
                // Remove before returning so resolve() becomes a no-op for
                // this id from here on.
                self.waiters.lock().remove(id);
                metrics::counter!("bridge_reply_timeouts_total").increment(1);
                Err(CorrelationError::Timeout {
                    id: id.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Wakes the waiter registered for `id` with `payload`.
    ///
    /// Returns `true` when a suspended caller was woken. With no
    /// outstanding waiter this is a no-op returning `false`; late and
    /// duplicate replies are expected and harmless.
    pub fn resolve(&self, id: &str, payload: Value) -> bool {
        let waiter = self.waiters.lock().remove(id);
        match waiter {
            Some(waiter) => {
                let waited = waiter.created_at.elapsed();
                debug!(correlation_id = id, ?waited, "resolving waiter");
                waiter.tx.send(payload).is_ok()
            }
            None => {
                debug!(correlation_id = id, "reply without outstanding waiter, dropping");
                false
            }
        }
    }

    /// Cancels the waiter registered for `id`, if any.
    ///
    /// The suspended caller returns [`CorrelationError::Cancelled`].
    pub fn cancel(&self, id: &str) -> bool {
        self.waiters.lock().remove(id).is_some()
    }

    /// Number of outstanding waiters. Reported by the health endpoint.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.waiters.lock().len()
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

//! Durable-queue dispatcher.
//!
//! Drains the command list and fans each command out to every connected
//! client. Delivery is at-least-once: a command popped while no client is
//! connected goes back onto the tail of the queue, so nothing is silently
//! lost while the browser side is away.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use bridge_core::Command;

use crate::network::ClientHub;
use crate::traits::{DurableQueue, StatusStore};

use super::config::RelayConfig;
use super::tasks::TaskTracker;

/// What one dispatcher cycle did with the popped item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The pop timed out with nothing to deliver.
    Idle,
    /// The command went out to at least one client.
    Delivered { recipients: usize, failed: usize },
    /// No client could receive the command; it is back on the queue tail.
    Requeued,
    /// The item was not a valid command envelope and was dropped.
    Poison,
    /// The command exhausted its delivery attempts and was dropped.
    Dropped { attempts: u32 },
}

/// Pulls commands from the Durable Queue and hands them to the hub.
pub struct Dispatcher {
    queue: Arc<dyn DurableQueue>,
    hub: Arc<ClientHub>,
    tasks: TaskTracker,
    config: Arc<RelayConfig>,
}

impl Dispatcher {
    /// Creates a dispatcher over the given queue and hub.
    pub fn new(
        queue: Arc<dyn DurableQueue>,
        hub: Arc<ClientHub>,
        store: Arc<dyn StatusStore>,
        config: Arc<RelayConfig>,
    ) -> Self {
        Self {
            queue,
            hub,
            tasks: TaskTracker::new(store),
            config,
        }
    }

    /// Pops and processes one command.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue backend is unreachable; the run
    /// loop retries after a backoff rather than terminating.
    pub async fn dispatch_next(&self) -> anyhow::Result<DispatchOutcome> {
        let popped = self
            .queue
            .blocking_pop(&self.config.command_queue, self.config.pop_timeout)
            .await?;
        let Some(raw) = popped else {
            return Ok(DispatchOutcome::Idle);
        };
        self.deliver(&raw).await
    }

    async fn deliver(&self, raw: &str) -> anyhow::Result<DispatchOutcome> {
        let command = match Command::from_wire(raw) {
            Ok(command) => command,
            Err(error) => {
                metrics::counter!("bridge_poison_commands_total").increment(1);
                warn!(%error, "dropping unparseable command");
                return Ok(DispatchOutcome::Poison);
            }
        };

        if self.hub.is_empty() {
            // Requeue the raw item untouched so it goes back exactly as
            // the producer enqueued it.
            self.queue
                .requeue(&self.config.command_queue, raw)
                .await?;
            metrics::counter!("bridge_commands_requeued_total").increment(1);
            debug!(kind = %command.kind, "no clients connected, command requeued");
            return Ok(DispatchOutcome::Requeued);
        }

        let targets = self.hub.client_count();
        let failed = self.hub.broadcast(raw, None);

        if failed.len() >= targets {
            return self.requeue_failed(command).await;
        }

        if let Some(task_id) = &command.task_id {
            if let Err(error) = self.tasks.mark_processing(task_id).await {
                warn!(%task_id, %error, "failed to mark task processing");
            }
        }

        let recipients = targets - failed.len();
        metrics::counter!("bridge_commands_dispatched_total").increment(1);
        info!(kind = %command.kind, recipients, failed = failed.len(), "command dispatched");
        Ok(DispatchOutcome::Delivered {
            recipients,
            failed: failed.len(),
        })
    }

    /// Every send failed: the command reached zero clients. Requeue with
    /// an incremented attempt count, up to the configured cap.
    async fn requeue_failed(&self, mut command: Command) -> anyhow::Result<DispatchOutcome> {
        command.attempts += 1;
        if command.attempts >= self.config.max_delivery_attempts {
            metrics::counter!("bridge_commands_dropped_total").increment(1);
            error!(
                kind = %command.kind,
                attempts = command.attempts,
                "command exhausted delivery attempts, dropping"
            );
            return Ok(DispatchOutcome::Dropped {
                attempts: command.attempts,
            });
        }

        self.queue
            .requeue(&self.config.command_queue, &command.to_wire())
            .await?;
        metrics::counter!("bridge_commands_requeued_total").increment(1);
        warn!(
            kind = %command.kind,
            attempts = command.attempts,
            "all sends failed, command requeued"
        );
        Ok(DispatchOutcome::Requeued)
    }

    /// Drains the queue until shutdown is signalled.
    ///
    /// Requeue outcomes pause for the configured backoff so an empty hub
    /// does not spin; backend failures pause longer and retry.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(queue = %self.config.command_queue, "dispatcher started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                result = self.dispatch_next() => match result {
                    Ok(DispatchOutcome::Requeued) => {
                        tokio::time::sleep(self.config.requeue_backoff).await;
                    }
                    Ok(_) => {}
                    Err(error) => {
                        error!(%error, "queue backend failure, backing off");
                        tokio::time::sleep(self.config.backend_retry_backoff).await;
                    }
                },
            }
        }
        info!("dispatcher stopped");
    }
}

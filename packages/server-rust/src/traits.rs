use std::time::Duration;

use async_trait::async_trait;

/// Durable FIFO queue external to the broker.
///
/// Producers push commands, the dispatcher pops them; unsolicited client
/// frames travel the other way on a second list. Implementations: Redis
/// lists (deployment), memory (tests and single-process default).
///
/// FIFO contract: `blocking_pop` takes from the opposite end used by
/// `push`. `requeue` appends to the tail, behind items already waiting.
#[async_trait]
pub trait DurableQueue: Send + Sync {
    /// Append an item to the tail of the named list.
    async fn push(&self, list: &str, item: &str) -> anyhow::Result<()>;

    /// Pop one item from the head of the named list, waiting up to
    /// `timeout` for one to arrive. `None` timeout blocks indefinitely;
    /// `Ok(None)` means the wait timed out with the list still empty.
    async fn blocking_pop(
        &self,
        list: &str,
        timeout: Option<Duration>,
    ) -> anyhow::Result<Option<String>>;

    /// Put an item back onto the tail of the named list after a failed
    /// delivery attempt.
    async fn requeue(&self, list: &str, item: &str) -> anyhow::Result<()>;

    /// Number of items currently waiting in the named list.
    async fn len(&self, list: &str) -> anyhow::Result<usize>;
}

/// Key/value store with per-key TTL, external to the broker.
///
/// Holds short-lived liveness flags and per-task status/result keys.
/// Implementations: Redis (deployment), memory (tests and single-process
/// default). Individual operations are atomic; the broker never needs
/// transactions across keys.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Set `key` to `value`, expiring after `ttl` when one is given.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> anyhow::Result<()>;

    /// Read `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// Delete `key`. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
}

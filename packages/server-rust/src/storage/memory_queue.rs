//! In-memory [`DurableQueue`] backed by per-list `VecDeque`s.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::traits::DurableQueue;

/// In-memory FIFO queue with blocking pop.
///
/// A single `Notify` wakes all poppers whenever any list receives an item;
/// each popper re-checks its own list and goes back to sleep on a miss.
/// With the broker's one-dispatcher-per-list usage this never thunders.
pub struct MemoryQueue {
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    notify: Notify,
}

impl MemoryQueue {
    /// Creates an empty queue backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            lists: Mutex::new(HashMap::new()),
            notify: Notify::new(),
        }
    }

    fn pop_front(&self, list: &str) -> Option<String> {
        let mut lists = self.lists.lock();
        lists.get_mut(list).and_then(VecDeque::pop_front)
    }

    fn push_back(&self, list: &str, item: &str) {
        let mut lists = self.lists.lock();
        lists
            .entry(list.to_string())
            .or_default()
            .push_back(item.to_string());
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableQueue for MemoryQueue {
    async fn push(&self, list: &str, item: &str) -> anyhow::Result<()> {
        self.push_back(list, item);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn blocking_pop(
        &self,
        list: &str,
        timeout: Option<Duration>,
    ) -> anyhow::Result<Option<String>> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);

        loop {
            // Register interest before the check so a push landing between
            // the check and the await still wakes this popper.
            let notified = self.notify.notified();

            if let Some(item) = self.pop_front(list) {
                return Ok(Some(item));
            }

            match deadline {
                None => notified.await,
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(self.pop_front(list));
                    }
                }
            }
        }
    }

    async fn requeue(&self, list: &str, item: &str) -> anyhow::Result<()> {
        self.push_back(list, item);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn len(&self, list: &str) -> anyhow::Result<usize> {
        let lists = self.lists.lock();
        Ok(lists.get(list).map_or(0, VecDeque::len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_then_pop_is_fifo() {
        let queue = MemoryQueue::new();
        queue.push("q", "a").await.unwrap();
        queue.push("q", "b").await.unwrap();

        assert_eq!(
            queue.blocking_pop("q", None).await.unwrap().as_deref(),
            Some("a")
        );
        assert_eq!(
            queue.blocking_pop("q", None).await.unwrap().as_deref(),
            Some("b")
        );
        assert_eq!(queue.len("q").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn pop_timeout_returns_none_on_empty_list() {
        let queue = MemoryQueue::new();
        let popped = queue
            .blocking_pop("q", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert_eq!(popped, None);
    }

    #[tokio::test]
    async fn pop_wakes_when_item_arrives() {
        let queue = std::sync::Arc::new(MemoryQueue::new());

        let popper = {
            let queue = std::sync::Arc::clone(&queue);
            tokio::spawn(async move { queue.blocking_pop("q", Some(Duration::from_secs(5))).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push("q", "late").await.unwrap();

        let popped = popper.await.unwrap().unwrap();
        assert_eq!(popped.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn requeue_appends_behind_waiting_items() {
        let queue = MemoryQueue::new();
        queue.push("q", "first").await.unwrap();
        queue.requeue("q", "retried").await.unwrap();

        assert_eq!(
            queue.blocking_pop("q", None).await.unwrap().as_deref(),
            Some("first")
        );
        assert_eq!(
            queue.blocking_pop("q", None).await.unwrap().as_deref(),
            Some("retried")
        );
    }

    #[tokio::test]
    async fn lists_are_independent() {
        let queue = MemoryQueue::new();
        queue.push("a", "x").await.unwrap();

        assert_eq!(queue.len("b").await.unwrap(), 0);
        assert_eq!(
            queue
                .blocking_pop("b", Some(Duration::from_millis(10)))
                .await
                .unwrap(),
            None
        );
        assert_eq!(queue.len("a").await.unwrap(), 1);
    }
}

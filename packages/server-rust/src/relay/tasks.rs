//! Task status plumbing over the Status Store.
//!
//! Implements the producer polling contract: consumers write a per-task
//! `status` key and, for completed tasks, a paired `result` key holding a
//! JSON-encoded payload. The result is written before the status flips to
//! `completed`, so a poller can never observe a completed task without
//! its result.

use std::sync::Arc;

use serde_json::Value;

use bridge_core::{task_result_key, task_status_key, TaskStatus};

use crate::traits::StatusStore;

/// What a producer polling a task id gets to see.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskReadOutcome {
    /// No status key exists for this task id.
    NotFound,
    /// The task is queued or processing.
    Pending(TaskStatus),
    /// The task completed; the JSON result payload.
    Completed(Value),
    /// The task failed; the JSON error payload.
    Failed(Value),
}

/// Reads and writes per-task status/result keys.
#[derive(Clone)]
pub struct TaskTracker {
    store: Arc<dyn StatusStore>,
}

impl TaskTracker {
    /// Creates a tracker over the given store.
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self { store }
    }

    /// Marks a task as waiting in the queue.
    ///
    /// # Errors
    ///
    /// Returns an error when the store is unreachable.
    pub async fn mark_queued(&self, task_id: &str) -> anyhow::Result<()> {
        self.set_status(task_id, TaskStatus::Queued).await
    }

    /// Marks a task as handed to at least one client.
    ///
    /// # Errors
    ///
    /// Returns an error when the store is unreachable.
    pub async fn mark_processing(&self, task_id: &str) -> anyhow::Result<()> {
        self.set_status(task_id, TaskStatus::Processing).await
    }

    /// Stores a task's result, then marks it completed.
    ///
    /// # Errors
    ///
    /// Returns an error when the store is unreachable. If the failure
    /// lands between the two writes, the status stays non-completed, so
    /// no partial result is ever observable as completed.
    pub async fn complete(&self, task_id: &str, result: &Value) -> anyhow::Result<()> {
        self.store
            .set(&task_result_key(task_id), &result.to_string(), None)
            .await?;
        self.set_status(task_id, TaskStatus::Completed).await
    }

    /// Stores a task's error payload, then marks it failed.
    ///
    /// # Errors
    ///
    /// Returns an error when the store is unreachable.
    pub async fn fail(&self, task_id: &str, error: &Value) -> anyhow::Result<()> {
        self.store
            .set(&task_result_key(task_id), &error.to_string(), None)
            .await?;
        self.set_status(task_id, TaskStatus::Failed).await
    }

    /// Reads a task's state per the polling contract.
    ///
    /// An absent or unrecognized status reads as [`TaskReadOutcome::NotFound`].
    /// A completed task whose result is missing or unparseable reads as
    /// failed, never as completed with a corrupt payload.
    ///
    /// # Errors
    ///
    /// Returns an error when the store is unreachable.
    pub async fn read(&self, task_id: &str) -> anyhow::Result<TaskReadOutcome> {
        let Some(status) = self.store.get(&task_status_key(task_id)).await? else {
            return Ok(TaskReadOutcome::NotFound);
        };
        let Some(status) = TaskStatus::parse(&status) else {
            return Ok(TaskReadOutcome::NotFound);
        };

        match status {
            TaskStatus::Queued | TaskStatus::Processing => Ok(TaskReadOutcome::Pending(status)),
            TaskStatus::Completed => match self.read_payload(task_id).await? {
                Some(result) => Ok(TaskReadOutcome::Completed(result)),
                None => Ok(TaskReadOutcome::Failed(
                    serde_json::json!({"error": "result missing or unreadable"}),
                )),
            },
            TaskStatus::Failed => {
                let error = self
                    .read_payload(task_id)
                    .await?
                    .unwrap_or_else(|| serde_json::json!({"error": "unknown failure"}));
                Ok(TaskReadOutcome::Failed(error))
            }
        }
    }

    async fn read_payload(&self, task_id: &str) -> anyhow::Result<Option<Value>> {
        let Some(raw) = self.store.get(&task_result_key(task_id)).await? else {
            return Ok(None);
        };
        Ok(serde_json::from_str(&raw).ok())
    }

    async fn set_status(&self, task_id: &str, status: TaskStatus) -> anyhow::Result<()> {
        self.store
            .set(&task_status_key(task_id), status.as_str(), None)
            .await
    }
}

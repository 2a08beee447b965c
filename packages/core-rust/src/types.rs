//! Shared vocabulary: client roles, task status values, and the key/list
//! naming conventions for the Status Store and Durable Queue.
//!
//! Producers and the broker both depend on these names, so they live in
//! core rather than being duplicated on each side.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Queue and key names
// ---------------------------------------------------------------------------

/// Durable Queue list holding commands enqueued by producers.
pub const COMMAND_QUEUE: &str = "bridge:commands";

/// Durable Queue list receiving unsolicited client frames for external
/// consumers.
pub const RESPONSE_QUEUE: &str = "bridge:responses";

/// Status Store key for the aggregate "any client connected" flag.
pub const AGGREGATE_LIVENESS_KEY: &str = "bridge:clients:connected";

/// Status Store key for one client's liveness flag.
#[must_use]
pub fn client_liveness_key(identity: &str) -> String {
    format!("bridge:client:{identity}:status")
}

/// Status Store key for a task's status value.
#[must_use]
pub fn task_status_key(task_id: &str) -> String {
    format!("bridge:task:{task_id}:status")
}

/// Status Store key for a task's JSON-encoded result payload.
#[must_use]
pub fn task_result_key(task_id: &str) -> String {
    format!("bridge:task:{task_id}:result")
}

// ---------------------------------------------------------------------------
// Client role
// ---------------------------------------------------------------------------

/// Classifies a connected client as a browser extension or a
/// headless-browser worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientRole {
    /// A browser extension driving a logged-in chat tab.
    Extension,
    /// A headless-browser worker process.
    Worker,
}

impl fmt::Display for ClientRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Extension => "extension",
            Self::Worker => "worker",
        })
    }
}

impl FromStr for ClientRole {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "extension" => Ok(Self::Extension),
            "worker" => Ok(Self::Worker),
            _ => Err(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Task status
// ---------------------------------------------------------------------------

/// Lifecycle state of a producer-submitted task, stored as a string under
/// the task's status key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    /// The string stored in the Status Store for this status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parses a stored status string. Returns `None` for unknown values so
    /// a corrupt key reads as "not found" rather than panicking a poller.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//! Command envelopes popped from the Durable Queue by the dispatcher.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A producer-enqueued command.
///
/// Immutable once enqueued except for `attempts`, the delivery counter
/// mutated only by the dispatcher. `attempts` is skipped on the wire while
/// zero so a command requeued before any delivery attempt serializes
/// byte-for-byte identical to the item the producer pushed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Discriminator understood by the receiving clients.
    #[serde(rename = "type")]
    pub kind: String,
    /// Command arguments, forwarded verbatim.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    /// Producer-side task id, when the command belongs to a polled task.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub task_id: Option<String>,
    /// Failed-delivery counter. Absent from freshly enqueued commands.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub attempts: u32,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl Command {
    /// Parses a raw queue item.
    ///
    /// # Errors
    ///
    /// Returns the underlying JSON error when the item is not a valid
    /// command envelope; the dispatcher treats this as poison and drops
    /// the item.
    pub fn from_wire(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Serializes the command to its single-line JSON wire form.
    ///
    /// # Panics
    ///
    /// Never panics: the envelope contains only JSON-representable data.
    #[must_use]
    pub fn to_wire(&self) -> String {
        serde_json::to_string(self).expect("command serialization cannot fail")
    }
}

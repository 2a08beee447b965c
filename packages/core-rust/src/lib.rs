//! Agent bridge core — wire frames, command envelopes, and the task status
//! vocabulary shared between the broker and its producers.

pub mod messages;
pub mod types;

pub use messages::{
    AppFrame, ClientReadyPayload, Command, ControlFrame, DomReadyPayload, FrameParseError,
    InboundFrame,
};
pub use types::{
    client_liveness_key, task_result_key, task_status_key, ClientRole, TaskStatus,
    AGGREGATE_LIVENESS_KEY, COMMAND_QUEUE, RESPONSE_QUEUE,
};

//! Wire schemas for the bridge protocol.
//!
//! Clients exchange one JSON object per WebSocket text message. Control
//! frames (`frames`) are a closed tagged-variant enum consumed by the hub
//! itself; everything else is an application frame routed by the presence
//! of a correlation id. Commands (`commands`) are the JSON envelopes
//! producers push onto the Durable Queue.

pub mod commands;
pub mod frames;

pub use commands::Command;
pub use frames::{
    AppFrame, ClientReadyPayload, ControlFrame, DomReadyPayload, FrameParseError, InboundFrame,
};

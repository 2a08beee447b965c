//! HTTP and WebSocket handler definitions for the bridge server.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors) and re-exports all handler functions for convenient access
//! when building the router.

pub mod health;
pub mod websocket;

pub use health::{health_handler, liveness_handler, readiness_handler};
pub use websocket::ws_upgrade_handler;

use std::sync::Arc;
use std::time::Instant;

use crate::relay::Correlator;

use super::{ClientHub, NetworkConfig, ShutdownController};

/// Shared application state passed to all axum handlers via `State`
/// extraction.
///
/// Holds `Arc` references to shared resources so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// The connection hub owning all registered clients.
    pub hub: Arc<ClientHub>,
    /// Outstanding request/response waiters.
    pub correlator: Arc<Correlator>,
    /// Graceful shutdown controller with health state and in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
    /// Network configuration (bind address, per-connection settings).
    pub config: Arc<NetworkConfig>,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}

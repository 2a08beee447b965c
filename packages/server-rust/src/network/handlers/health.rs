//! Health, liveness, and readiness endpoint handlers.
//!
//! These handlers expose broker health for orchestrators and operational
//! monitoring, including the connected-client count external producers
//! check before enqueueing interactive work.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::AppState;
use crate::network::HealthState;

/// Returns detailed health information as JSON.
///
/// Always returns 200 -- the `state` field in the response body indicates
/// whether the broker is actually healthy, which lets monitoring tools
/// distinguish "up but draining" from "down".
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let health = state.shutdown.health_state();
    let clients = state.hub.client_count();
    let pending_replies = state.correlator.pending_count();
    let in_flight = state.shutdown.in_flight_count();
    let uptime_secs = state.start_time.elapsed().as_secs();

    Json(json!({
        "state": health.as_str(),
        "clients": clients,
        "pending_replies": pending_replies,
        "in_flight": in_flight,
        "uptime_secs": uptime_secs,
    }))
}

/// Liveness probe -- always returns 200 OK.
///
/// Only checks that the process is running and responsive; a failed
/// liveness probe triggers a restart, so downstream state is not checked.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe -- returns 200 when ready, 503 otherwise.
///
/// Returns 503 during startup, graceful shutdown, and after stop, which
/// removes the broker from load-balancer rotation.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.shutdown.health_state() == HealthState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

//! HTTP route handlers.

use crate::state::AppState;
use axum::{extract::State, Json};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    debug!(target: "sockline::api", "Health check");
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub connected_clients: usize,
    pub messages_relayed: u64,
    pub dropped_frames: u64,
    pub uptime_secs: i64,
}

pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let response = StatsResponse {
        connected_clients: state.hub.client_count(),
        messages_relayed: state.hub.messages_relayed(),
        dropped_frames: state.hub.dropped_frames(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    };
    info!(target: "sockline::api",
        "Stats requested ({} clients, {} relayed)",
        response.connected_clients, response.messages_relayed);
    Json(response)
}

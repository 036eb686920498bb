use axum::extract::State;
use axum::{routing::get, Json, Router};
use demix_core::StatusCounts;
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Known jobs by lifecycle state.
    pub jobs: StatusCounts,
    /// Engines currently running.
    pub active_jobs: usize,
    /// Execution bound, `null` when unbounded.
    pub max_concurrent_jobs: Option<usize>,
    /// Open progress stream subscriptions.
    pub open_streams: usize,
}

/// GET /health -- service status and job bookkeeping.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        jobs: state.registry.counts(),
        active_jobs: state.dispatcher.active_jobs(),
        max_concurrent_jobs: state.dispatcher.max_concurrent_jobs(),
        open_streams: state.broker.total_subscribers(),
    })
}

/// Mount health check routes (intended for root-level, NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

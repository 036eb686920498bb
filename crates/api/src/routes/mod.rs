pub mod health;
pub mod jobs;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree served under the request timeout.
///
/// ```text
/// /jobs                 list (GET), submit (POST)
/// /jobs/{job_id}        purge (DELETE)
/// /status/{job_id}      poll (GET)
/// ```
pub fn api_routes() -> Router<AppState> {
    jobs::router()
}

/// Long-lived `/api/v1` routes, exempt from the request timeout.
///
/// ```text
/// /stream/{job_id}      SSE progress stream (GET)
/// ```
pub fn stream_routes() -> Router<AppState> {
    jobs::stream_router()
}

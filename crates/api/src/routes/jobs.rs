//! Route definitions for job submission, polling and streaming.

use axum::routing::{delete, get};
use axum::Router;

use crate::handlers::{jobs, stream};
use crate::state::AppState;

/// ```text
/// GET    /jobs                -> list_jobs
/// POST   /jobs                -> submit_job
/// DELETE /jobs/{job_id}       -> purge_job
/// GET    /status/{job_id}     -> job_status
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs", get(jobs::list_jobs).post(jobs::submit_job))
        .route("/jobs/{job_id}", delete(jobs::purge_job))
        .route("/status/{job_id}", get(jobs::job_status))
}

/// ```text
/// GET    /stream/{job_id}     -> job_stream
/// ```
pub fn stream_router() -> Router<AppState> {
    Router::new().route("/stream/{job_id}", get(stream::job_stream))
}

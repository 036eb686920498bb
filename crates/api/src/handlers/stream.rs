//! SSE progress stream for a single job.

use axum::extract::{Path, State};
use axum::response::Response;
use demix_core::JobId;

use crate::sse;
use crate::state::AppState;

/// GET /api/v1/stream/{job_id}
///
/// The first frame is the job's current state. Unknown jobs get a single
/// `job_not_found` frame. The stream ends after the terminal frame.
pub async fn job_stream(State(state): State<AppState>, Path(job_id): Path<JobId>) -> Response {
    let subscription = state.broker.subscribe(&state.registry, &job_id);
    tracing::info!(
        job_id = %job_id,
        subscribers = state.broker.subscriber_count(&job_id),
        "Progress stream client connected",
    );

    let stream = sse::subscription_stream(
        subscription,
        state.config.heartbeat_interval,
        sse::typed_event,
    );
    sse::into_sse_response(stream)
}

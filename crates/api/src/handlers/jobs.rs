//! Handlers for the job submission and polling endpoints.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use demix_core::error::CoreError;
use demix_core::JobId;
use demix_pipeline::JobRequest;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SubmittedJob {
    pub job_id: JobId,
}

#[derive(Debug, Serialize)]
pub struct PurgeResult {
    pub purged: bool,
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Validate the request, create the job and start it. Returns 202 with the
/// job id as soon as the job is queued.
pub async fn submit_job(
    State(state): State<AppState>,
    payload: Result<Json<JobRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(request) = payload?;
    request.validate()?;

    let job_id = state.dispatcher.submit(request)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: SubmittedJob { job_id },
        }),
    ))
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs
///
/// All known jobs, newest first.
pub async fn list_jobs(State(state): State<AppState>) -> impl IntoResponse {
    Json(DataResponse {
        data: state.registry.list(),
    })
}

// ---------------------------------------------------------------------------
// Poll
// ---------------------------------------------------------------------------

/// GET /api/v1/status/{job_id}
///
/// Current snapshot of one job. Never creates a subscription.
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let record = state
        .registry
        .get(&job_id)
        .ok_or_else(|| not_found(&job_id))?;
    Ok(Json(DataResponse { data: record }))
}

// ---------------------------------------------------------------------------
// Purge
// ---------------------------------------------------------------------------

/// DELETE /api/v1/jobs/{job_id}
///
/// Drop a job's bookkeeping and end its streams. A running engine is not
/// stopped. Unknown ids report `purged: false`.
pub async fn purge_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> impl IntoResponse {
    let purged = state.dispatcher.purge(&job_id);
    Json(DataResponse {
        data: PurgeResult { purged },
    })
}

fn not_found(job_id: &JobId) -> AppError {
    AppError::Core(CoreError::NotFound {
        entity: "Job",
        id: job_id.to_string(),
    })
}

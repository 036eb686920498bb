//! Event type names for job progress frames.
//!
//! Used as the `type` field of every [`JobEvent`](crate::progress::JobEvent)
//! and as the SSE `event:` name by the stream adapters.

/// Progress update during job execution (percentage + message).
pub const MSG_TYPE_JOB_PROGRESS: &str = "job_progress";

/// Job completed successfully.
pub const MSG_TYPE_JOB_COMPLETED: &str = "job_completed";

/// Job failed with an error.
pub const MSG_TYPE_JOB_FAILED: &str = "job_failed";

/// The requested job does not exist (or was purged).
pub const MSG_TYPE_JOB_NOT_FOUND: &str = "job_not_found";

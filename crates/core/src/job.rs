//! Job record, status state machine, and the updates a job's sink applies.
//!
//! The lifecycle is `Queued -> Processing -> {Completed, Error}`. All
//! invariants are enforced inside [`JobRecord::apply`], so every caller
//! (registry, dispatcher, tests) goes through the same transition rules.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{JobId, Timestamp};

/// Upper bound of the progress scale.
pub const MAX_PROGRESS: u8 = 100;

/// Message set on a freshly created job.
pub const QUEUED_MESSAGE: &str = "Job queued";

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Error,
}

impl JobStatus {
    /// `Completed` and `Error` have no outgoing transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }

    /// Position in the forward-only lifecycle. Both terminal states share
    /// the last rank.
    pub fn rank(self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed | JobStatus::Error => 2,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// JobUpdate
// ---------------------------------------------------------------------------

/// A mutation reported by a job's worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobUpdate {
    /// Incremental progress. The first one moves the job to `Processing`.
    Progress { progress: u8, message: String },
    /// Successful terminal transition.
    Completed {
        result_handle: String,
        message: String,
    },
    /// Failed terminal transition.
    Failed {
        error_detail: String,
        message: String,
    },
}

impl JobUpdate {
    pub fn progress(progress: u8, message: impl Into<String>) -> Self {
        JobUpdate::Progress {
            progress,
            message: message.into(),
        }
    }

    pub fn completed(result_handle: impl Into<String>) -> Self {
        JobUpdate::Completed {
            result_handle: result_handle.into(),
            message: "Job completed".to_string(),
        }
    }

    pub fn failed(error_detail: impl Into<String>) -> Self {
        let error_detail = error_detail.into();
        JobUpdate::Failed {
            message: format!("Processing failed: {error_detail}"),
            error_detail,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobUpdate::Progress { .. })
    }
}

// ---------------------------------------------------------------------------
// JobRecord
// ---------------------------------------------------------------------------

/// Authoritative state of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Percentage in `0..=100`.
    pub progress: u8,
    /// Latest human-readable status text.
    pub message: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Opaque reference into the artifact store. Present iff completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_handle: Option<String>,
    /// Failure description. Present iff the job ended in `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl JobRecord {
    /// A new job in `Queued` state with zero progress.
    pub fn new(job_id: JobId) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            status: JobStatus::Queued,
            progress: 0,
            message: QUEUED_MESSAGE.to_string(),
            created_at: now,
            updated_at: now,
            result_handle: None,
            error_detail: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply an update, enforcing the lifecycle invariants.
    ///
    /// - Terminal records are immutable: any update is rejected with
    ///   [`JobError::TerminalStateViolation`].
    /// - Progress never decreases; values above [`MAX_PROGRESS`] clamp.
    /// - `Completed` pins progress to 100 and sets the result handle.
    /// - `Failed` keeps the last progress and sets the error detail.
    pub fn apply(&mut self, update: JobUpdate) -> Result<(), JobError> {
        if self.status.is_terminal() {
            return Err(JobError::TerminalStateViolation {
                job_id: self.job_id.clone(),
                status: self.status,
            });
        }

        match update {
            JobUpdate::Progress { progress, message } => {
                self.status = JobStatus::Processing;
                self.progress = self.progress.max(progress.min(MAX_PROGRESS));
                self.message = message;
            }
            JobUpdate::Completed {
                result_handle,
                message,
            } => {
                self.status = JobStatus::Completed;
                self.progress = MAX_PROGRESS;
                self.result_handle = Some(result_handle);
                self.message = message;
            }
            JobUpdate::Failed {
                error_detail,
                message,
            } => {
                self.status = JobStatus::Error;
                self.error_detail = Some(error_detail);
                self.message = message;
            }
        }

        self.updated_at = Utc::now();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JobError
// ---------------------------------------------------------------------------

/// Registry-level failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    /// The job id is not present in the registry.
    #[error("Job {0} not found")]
    Unknown(JobId),

    /// A generated id collided with an existing job. Should never happen.
    #[error("Job {0} already exists")]
    Duplicate(JobId),

    /// A late or duplicate update arrived after the job reached a terminal
    /// state.
    #[error("Job {job_id} is already {status}, update rejected")]
    TerminalStateViolation { job_id: JobId, status: JobStatus },
}

impl From<JobError> for CoreError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::Unknown(id) => CoreError::NotFound {
                entity: "Job",
                id: id.to_string(),
            },
            JobError::Duplicate(_) => CoreError::Internal(err.to_string()),
            JobError::TerminalStateViolation { .. } => CoreError::Conflict(err.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

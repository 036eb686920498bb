//! Progress reporting capability and the frames fanned out to consumers.

use serde::{Deserialize, Serialize};

use crate::job::{JobRecord, JobStatus};
use crate::job_events::{
    MSG_TYPE_JOB_COMPLETED, MSG_TYPE_JOB_FAILED, MSG_TYPE_JOB_NOT_FOUND, MSG_TYPE_JOB_PROGRESS,
};
use crate::types::JobId;

/// One-way progress callback handed to a processing engine.
///
/// Implementations must tolerate calls from several engine threads at once.
pub trait ProgressSink: Send + Sync {
    /// Report `progress` (0..=100) with a human-readable message.
    fn report(&self, progress: u8, message: &str);
}

/// Kind of a [`JobEvent`], serialized as its `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobEventKind {
    #[serde(rename = "job_progress")]
    Progress,
    #[serde(rename = "job_completed")]
    Completed,
    #[serde(rename = "job_failed")]
    Failed,
    #[serde(rename = "job_not_found")]
    NotFound,
}

impl JobEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobEventKind::Progress => MSG_TYPE_JOB_PROGRESS,
            JobEventKind::Completed => MSG_TYPE_JOB_COMPLETED,
            JobEventKind::Failed => MSG_TYPE_JOB_FAILED,
            JobEventKind::NotFound => MSG_TYPE_JOB_NOT_FOUND,
        }
    }
}

/// A single frame delivered to job subscribers.
///
/// Every frame is a full snapshot of the job at publish time, so a consumer
/// that only ever sees the last frame still has the complete state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEvent {
    #[serde(rename = "type")]
    pub kind: JobEventKind,
    pub job_id: JobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    pub progress: u8,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobEvent {
    /// Frame describing the current state of `record`.
    pub fn snapshot(record: &JobRecord) -> Self {
        let kind = match record.status {
            JobStatus::Queued | JobStatus::Processing => JobEventKind::Progress,
            JobStatus::Completed => JobEventKind::Completed,
            JobStatus::Error => JobEventKind::Failed,
        };

        Self {
            kind,
            job_id: record.job_id.clone(),
            status: Some(record.status),
            progress: record.progress,
            message: record.message.clone(),
            result_handle: record.result_handle.clone(),
            error: record.error_detail.clone(),
        }
    }

    /// Single terminal frame sent to consumers of an unknown job.
    pub fn not_found(job_id: &JobId) -> Self {
        Self {
            kind: JobEventKind::NotFound,
            job_id: job_id.clone(),
            status: None,
            progress: 0,
            message: "Job not found".to_string(),
            result_handle: None,
            error: Some(format!("Job {job_id} not found")),
        }
    }

    /// Completed, failed and not-found frames end a stream.
    pub fn is_terminal(&self) -> bool {
        !matches!(self.kind, JobEventKind::Progress)
    }

    pub fn event_type(&self) -> &'static str {
        self.kind.as_str()
    }
}

impl From<&JobRecord> for JobEvent {
    fn from(record: &JobRecord) -> Self {
        JobEvent::snapshot(record)
    }
}

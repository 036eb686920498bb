//! Progress sink bound to a single job.

use std::sync::Arc;

use demix_core::{JobError, JobEvent, JobId, JobRecord, JobRegistry, JobUpdate, ProgressSink};
use demix_events::ProgressBroker;

/// Applies a job's updates to the registry and publishes the resulting
/// snapshot while the job is still locked, so subscribers observe updates
/// in exactly the order they were applied.
pub struct JobSink {
    job_id: JobId,
    registry: Arc<JobRegistry>,
    broker: ProgressBroker,
}

impl JobSink {
    pub fn new(job_id: JobId, registry: Arc<JobRegistry>, broker: ProgressBroker) -> Self {
        Self {
            job_id,
            registry,
            broker,
        }
    }

    /// Apply `update` and publish it. Returns the new record, or `None` if
    /// the update was dropped because the job is finished or gone.
    pub fn apply(&self, update: JobUpdate) -> Option<JobRecord> {
        let result = self.registry.update_with(&self.job_id, update, |record| {
            self.broker.publish(&JobEvent::snapshot(record));
        });

        match result {
            Ok(record) => Some(record),
            Err(JobError::TerminalStateViolation { status, .. }) => {
                tracing::debug!(
                    job_id = %self.job_id,
                    status = %status,
                    "Dropping update for finished job",
                );
                None
            }
            Err(JobError::Unknown(_)) => {
                tracing::debug!(job_id = %self.job_id, "Dropping update for purged job");
                None
            }
            Err(e) => {
                tracing::warn!(job_id = %self.job_id, error = %e, "Job update rejected");
                None
            }
        }
    }
}

impl ProgressSink for JobSink {
    fn report(&self, progress: u8, message: &str) {
        self.apply(JobUpdate::progress(progress, message));
    }
}

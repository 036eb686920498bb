//! Periodic cleanup of finished jobs and idle stream consumers.
//!
//! Runs on a fixed `tokio::time::interval`. Each sweep purges terminal jobs
//! older than the retention window (ending any stream still attached to
//! them) and disconnects subscribers that stopped pulling frames.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::state::AppState;

/// What one sweep removed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub purged_jobs: usize,
    pub closed_streams: usize,
    pub reaped_subscribers: usize,
}

/// Run the retention loop until `cancel` is triggered.
pub async fn run(state: AppState, cancel: CancellationToken) {
    let interval_period = state.config.retention_sweep_interval;
    tracing::info!(
        retention_secs = state.config.job_retention.as_secs(),
        interval_secs = interval_period.as_secs(),
        "Job retention task started"
    );

    // `interval` panics on a zero period.
    let mut interval = tokio::time::interval(interval_period.max(Duration::from_millis(1)));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Job retention task stopping");
                break;
            }
            _ = interval.tick() => {
                let report = sweep(&state);
                if report == SweepReport::default() {
                    tracing::debug!("Job retention: nothing to clean up");
                } else {
                    tracing::info!(
                        purged_jobs = report.purged_jobs,
                        closed_streams = report.closed_streams,
                        reaped_subscribers = report.reaped_subscribers,
                        "Job retention: cleaned up",
                    );
                }
            }
        }
    }
}

/// One cleanup pass.
pub fn sweep(state: &AppState) -> SweepReport {
    let purged = state.registry.purge_expired(state.config.job_retention);
    let closed_streams: usize = purged.iter().map(|job_id| state.broker.close(job_id)).sum();
    let reaped_subscribers = state.broker.reap_inactive(state.config.stream_inactivity);

    SweepReport {
        purged_jobs: purged.len(),
        closed_streams,
        reaped_subscribers,
    }
}

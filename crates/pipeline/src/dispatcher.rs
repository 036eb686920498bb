//! Worker dispatcher.
//!
//! Every submitted job gets its own supervised tokio task. The task moves
//! the job to `processing`, runs the engine on the blocking pool with a
//! [`JobSink`] bound to the job, and records exactly one terminal outcome.
//! Engine errors and panics both end as the job's `error` state; nothing
//! escapes the task. After the terminal frame is published the job's broker
//! channel is closed once the grace period has passed.
//!
//! Running engines cannot be cancelled. Purging a job only drops its
//! bookkeeping; the engine runs to completion and its reports are ignored.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use demix_core::{JobError, JobId, JobRegistry, JobUpdate};
use demix_events::ProgressBroker;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinHandle};

use crate::engine::ProcessingEngine;
use crate::params::JobRequest;
use crate::sink::JobSink;

/// Message of the frame that marks the start of processing.
pub const PROCESSING_STARTED: &str = "Processing started";

/// Default delay between the terminal frame and closing the channel.
const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum engines running at once. `0` means unbounded.
    pub max_concurrent_jobs: usize,
    /// How long subscribers get to drain the terminal frame.
    pub close_grace: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 0,
            close_grace: DEFAULT_CLOSE_GRACE,
        }
    }
}

/// Starts and supervises one execution unit per job.
///
/// Cheap to clone; clones share the engine, limiter and counters.
#[derive(Clone)]
pub struct JobDispatcher {
    registry: Arc<JobRegistry>,
    broker: ProgressBroker,
    engine: Arc<dyn ProcessingEngine>,
    limiter: Option<Arc<Semaphore>>,
    max_concurrent_jobs: usize,
    close_grace: Duration,
    active: Arc<AtomicUsize>,
}

impl JobDispatcher {
    pub fn new(
        registry: Arc<JobRegistry>,
        broker: ProgressBroker,
        engine: Arc<dyn ProcessingEngine>,
        config: DispatcherConfig,
    ) -> Self {
        let limiter = (config.max_concurrent_jobs > 0)
            .then(|| Arc::new(Semaphore::new(config.max_concurrent_jobs)));

        Self {
            registry,
            broker,
            engine,
            limiter,
            max_concurrent_jobs: config.max_concurrent_jobs,
            close_grace: config.close_grace,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a job for `request` and start it. Returns without waiting for
    /// any processing. Must be called from within a tokio runtime.
    pub fn submit(&self, request: JobRequest) -> Result<JobId, JobError> {
        let job_id = JobId::generate();
        self.registry.create(job_id.clone())?;
        tracing::info!(
            job_id = %job_id,
            model = %request.params.model,
            source = %request.input.source,
            "Job submitted",
        );

        self.dispatch(job_id.clone(), request);
        Ok(job_id)
    }

    /// Start the execution unit for an already created job.
    pub fn dispatch(&self, job_id: JobId, request: JobRequest) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.run_job(job_id, request).await })
    }

    /// Remove a job's record and end its streams. Does not stop the engine.
    pub fn purge(&self, job_id: &JobId) -> bool {
        let purged = self.registry.purge(job_id);
        let closed = self.broker.close(job_id);
        if purged {
            tracing::info!(job_id = %job_id, closed_streams = closed, "Job purged");
        }
        purged
    }

    /// Execution units currently running an engine.
    pub fn active_jobs(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// `None` when unbounded.
    pub fn max_concurrent_jobs(&self) -> Option<usize> {
        self.limiter.as_ref().map(|_| self.max_concurrent_jobs)
    }

    // ---- private helpers ----

    async fn run_job(self, job_id: JobId, request: JobRequest) {
        let permit = self.acquire_permit(&job_id).await;
        let sink = Arc::new(JobSink::new(
            job_id.clone(),
            Arc::clone(&self.registry),
            self.broker.clone(),
        ));

        if sink.apply(JobUpdate::progress(0, PROCESSING_STARTED)).is_none() {
            tracing::info!(job_id = %job_id, "Job removed before processing started");
            return;
        }

        self.active.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let engine = Arc::clone(&self.engine);
        let engine_sink = Arc::clone(&sink);
        let outcome = tokio::task::spawn_blocking(move || {
            engine.run(&request.input, &request.params, engine_sink.as_ref())
        })
        .await;
        self.active.fetch_sub(1, Ordering::Relaxed);
        drop(permit);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let update = match outcome {
            Ok(Ok(handle)) => {
                tracing::info!(
                    job_id = %job_id,
                    elapsed_ms,
                    result_handle = %handle,
                    "Job completed",
                );
                JobUpdate::completed(handle)
            }
            Ok(Err(failure)) => {
                tracing::warn!(job_id = %job_id, elapsed_ms, error = %failure, "Job failed");
                JobUpdate::failed(failure.to_string())
            }
            Err(join_error) => {
                let detail = join_failure_detail(join_error);
                tracing::error!(
                    job_id = %job_id,
                    elapsed_ms,
                    error = %detail,
                    "Processing engine crashed",
                );
                JobUpdate::failed(detail)
            }
        };
        sink.apply(update);

        if !self.close_grace.is_zero() {
            tokio::time::sleep(self.close_grace).await;
        }
        self.broker.close(&job_id);
    }

    async fn acquire_permit(&self, job_id: &JobId) -> Option<OwnedSemaphorePermit> {
        let limiter = self.limiter.as_ref()?;
        if limiter.available_permits() == 0 {
            tracing::debug!(job_id = %job_id, "Worker pool saturated, job waiting");
        }
        // The semaphore is never closed, so acquisition only fails in theory.
        Arc::clone(limiter).acquire_owned().await.ok()
    }
}

fn join_failure_detail(error: JoinError) -> String {
    if error.is_panic() {
        format!("engine panicked: {}", panic_message(error.into_panic()))
    } else {
        "engine task was cancelled".to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! In-memory job registry.
//!
//! [`JobRegistry`] is the single source of truth for job state. It is
//! constructed once at startup and shared via `Arc<JobRegistry>`; every
//! adapter (poll, stream, RPC) reads the same records.
//!
//! Locking is per job: the map lock is only held long enough to look up,
//! insert or remove an entry, and each record sits behind its own mutex.
//! Two updates for the same job are serialized, updates for different jobs
//! never contend.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::job::{JobError, JobRecord, JobStatus, JobUpdate};
use crate::types::JobId;

type JobSlot = Arc<Mutex<JobRecord>>;

/// Number of jobs in each lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub error: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.queued + self.processing + self.completed + self.error
    }
}

/// Thread-safe store of all known jobs.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, JobSlot>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new job in `Queued` state.
    pub fn create(&self, job_id: JobId) -> Result<JobRecord, JobError> {
        match self.write_map().entry(job_id) {
            Entry::Occupied(entry) => {
                tracing::error!(job_id = %entry.key(), "Duplicate job id generated");
                Err(JobError::Duplicate(entry.key().clone()))
            }
            Entry::Vacant(entry) => {
                let record = JobRecord::new(entry.key().clone());
                entry.insert(Arc::new(Mutex::new(record.clone())));
                Ok(record)
            }
        }
    }

    /// Apply `update` to a job and return the resulting record.
    pub fn update(&self, job_id: &JobId, update: JobUpdate) -> Result<JobRecord, JobError> {
        self.update_with(job_id, update, |_| ())
    }

    /// Apply `update` and run `on_applied` while the job is still locked.
    ///
    /// Anything done inside `on_applied` is atomic with respect to other
    /// updates and [`read_with`](Self::read_with) calls on the same job.
    /// `on_applied` must not block and must not call back into the registry.
    pub fn update_with<F>(
        &self,
        job_id: &JobId,
        update: JobUpdate,
        on_applied: F,
    ) -> Result<JobRecord, JobError>
    where
        F: FnOnce(&JobRecord),
    {
        let slot = self
            .slot(job_id)
            .ok_or_else(|| JobError::Unknown(job_id.clone()))?;
        let mut record = lock(&slot);
        record.apply(update)?;
        on_applied(&record);
        Ok(record.clone())
    }

    /// Snapshot of a job, if it exists.
    pub fn get(&self, job_id: &JobId) -> Option<JobRecord> {
        self.read_with(job_id, JobRecord::clone)
    }

    /// Run `f` against a job while it is locked.
    ///
    /// Returns `None` for unknown ids.
    pub fn read_with<R>(&self, job_id: &JobId, f: impl FnOnce(&JobRecord) -> R) -> Option<R> {
        let slot = self.slot(job_id)?;
        let record = lock(&slot);
        Some(f(&record))
    }

    /// Remove a job. Returns `false` if the id was unknown.
    pub fn purge(&self, job_id: &JobId) -> bool {
        self.write_map().remove(job_id).is_some()
    }

    /// Remove terminal jobs whose last update is older than `max_age`.
    ///
    /// Returns the ids that were removed so the caller can release any
    /// resources tied to them.
    pub fn purge_expired(&self, max_age: Duration) -> Vec<JobId> {
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return Vec::new();
        };

        let mut removed = Vec::new();
        self.write_map().retain(|job_id, slot| {
            let record = lock(slot);
            let expired = record.is_terminal() && record.updated_at <= cutoff;
            if expired {
                removed.push(job_id.clone());
            }
            !expired
        });
        removed
    }

    /// All jobs, newest first.
    pub fn list(&self) -> Vec<JobRecord> {
        let slots: Vec<JobSlot> = self.read_map().values().cloned().collect();
        let mut records: Vec<JobRecord> = slots.iter().map(|slot| lock(slot).clone()).collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    pub fn len(&self) -> usize {
        self.read_map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Count jobs per status.
    pub fn counts(&self) -> StatusCounts {
        let slots: Vec<JobSlot> = self.read_map().values().cloned().collect();
        let mut counts = StatusCounts::default();
        for slot in slots {
            match lock(&slot).status {
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Processing => counts.processing += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Error => counts.error += 1,
            }
        }
        counts
    }

    // ---- private helpers ----

    fn slot(&self, job_id: &JobId) -> Option<JobSlot> {
        self.read_map().get(job_id).cloned()
    }

    fn read_map(&self) -> RwLockReadGuard<'_, HashMap<JobId, JobSlot>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_map(&self) -> RwLockWriteGuard<'_, HashMap<JobId, JobSlot>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Lock a job record, recovering from poisoning. `JobRecord::apply`
/// validates before it writes, so a poisoned record is still consistent.
fn lock(slot: &Mutex<JobRecord>) -> MutexGuard<'_, JobRecord> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Domain model for the demix job service.
//!
//! Pure types and the in-memory [`registry::JobRegistry`]; no async runtime
//! and no transport concerns live here.

pub mod error;
pub mod job;
pub mod job_events;
pub mod progress;
pub mod registry;
pub mod types;

pub use job::{JobError, JobRecord, JobStatus, JobUpdate};
pub use progress::{JobEvent, JobEventKind, ProgressSink};
pub use registry::{JobRegistry, StatusCounts};
pub use types::{JobId, Timestamp};

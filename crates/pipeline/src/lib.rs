//! Job execution: the processing engine seam, request parameters, the
//! progress sink bound to a job, and the dispatcher that runs one
//! supervised task per job.

pub mod dispatcher;
pub mod engine;
pub mod params;
pub mod simulated;
pub mod sink;

pub use dispatcher::{DispatcherConfig, JobDispatcher};
pub use engine::{EngineFailure, ProcessingEngine, ResultHandle};
pub use params::{JobInput, JobRequest, SeparationParams};
pub use simulated::SimulatedSeparator;
pub use sink::JobSink;

//! The processing engine seam.

use demix_core::ProgressSink;

use crate::params::{JobInput, SeparationParams};

/// Opaque reference to a finished job's outputs in the artifact store.
pub type ResultHandle = String;

/// Failure raised by a processing engine. Becomes the job's error detail.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineFailure {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Model {0} is not available")]
    ModelUnavailable(String),

    #[error("{0}")]
    Processing(String),
}

/// A long-running, blocking transformation of one input into outputs.
///
/// `run` is called on the blocking thread pool, once per job, and may call
/// `sink.report` any number of times from any thread it spawns. There is no
/// cancellation hook: once started, a run always goes to completion.
pub trait ProcessingEngine: Send + Sync + 'static {
    fn run(
        &self,
        input: &JobInput,
        params: &SeparationParams,
        sink: &dyn ProgressSink,
    ) -> Result<ResultHandle, EngineFailure>;
}

impl<F> ProcessingEngine for F
where
    F: Fn(&JobInput, &SeparationParams, &dyn ProgressSink) -> Result<ResultHandle, EngineFailure>
        + Send
        + Sync
        + 'static,
{
    fn run(
        &self,
        input: &JobInput,
        params: &SeparationParams,
        sink: &dyn ProgressSink,
    ) -> Result<ResultHandle, EngineFailure> {
        self(input, params, sink)
    }
}

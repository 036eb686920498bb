//! Stand-in separation engine that paces through the stages of a real run.

use std::thread;
use std::time::Duration;

use demix_core::job::MAX_PROGRESS;
use demix_core::ProgressSink;

use crate::engine::{EngineFailure, ProcessingEngine, ResultHandle};
use crate::params::{find_model, JobInput, SeparationParams};

/// Root of the simulated output tree.
const OUTPUT_ROOT: &str = "separated";

/// Reports progress 1..=100, sleeping `step` before each report.
///
/// The result handle is the output directory, laid out as
/// `separated/<model>/<input base name>`.
#[derive(Debug, Clone)]
pub struct SimulatedSeparator {
    step: Duration,
}

impl SimulatedSeparator {
    pub fn new(step: Duration) -> Self {
        Self { step }
    }
}

impl Default for SimulatedSeparator {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl ProcessingEngine for SimulatedSeparator {
    fn run(
        &self,
        input: &JobInput,
        params: &SeparationParams,
        sink: &dyn ProgressSink,
    ) -> Result<ResultHandle, EngineFailure> {
        if input.source.trim().is_empty() {
            return Err(EngineFailure::InvalidInput(
                "input source is empty".to_string(),
            ));
        }
        let model = find_model(&params.model)
            .ok_or_else(|| EngineFailure::ModelUnavailable(params.model.clone()))?;
        let stems = params.output_stems().join(", ");

        tracing::debug!(
            source = %input.source,
            model = model.name,
            segment = params.effective_segment(),
            "Simulated separation started",
        );

        for progress in 1..=MAX_PROGRESS {
            if !self.step.is_zero() {
                thread::sleep(self.step);
            }
            let message = match progress {
                0..=19 => format!("Loading {} model...", model.name),
                20..=39 => "Analysing spectrum...".to_string(),
                40..=79 => format!("Separating stems ({stems})..."),
                _ => format!("Writing {} files...", params.output_extension()),
            };
            sink.report(progress, &message);
        }

        Ok(format!("{OUTPUT_ROOT}/{}/{}", model.name, input.base_name()))
    }
}

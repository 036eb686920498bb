use std::sync::Arc;

use demix_core::JobRegistry;
use demix_events::ProgressBroker;
use demix_pipeline::{JobDispatcher, ProcessingEngine};

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: every field is an `Arc` or a handle around one.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Authoritative job state, read by every adapter.
    pub registry: Arc<JobRegistry>,
    /// Per-job progress fan-out.
    pub broker: ProgressBroker,
    /// Starts and supervises job execution.
    pub dispatcher: JobDispatcher,
}

impl AppState {
    /// Wire the registry, broker and dispatcher around `engine`.
    pub fn new(config: ServerConfig, engine: Arc<dyn ProcessingEngine>) -> Self {
        let registry = Arc::new(JobRegistry::new());
        let broker = ProgressBroker::new(config.subscriber_buffer);
        let dispatcher = JobDispatcher::new(
            Arc::clone(&registry),
            broker.clone(),
            engine,
            config.dispatcher_config(),
        );

        Self {
            config: Arc::new(config),
            registry,
            broker,
            dispatcher,
        }
    }
}

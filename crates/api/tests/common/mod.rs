#![allow(dead_code)]

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use demix_api::config::ServerConfig;
use demix_api::router::build_app_router;
use demix_api::state::AppState;
use demix_core::{JobId, JobRecord, ProgressSink};
use demix_pipeline::{
    EngineFailure, JobInput, ProcessingEngine, ResultHandle, SeparationParams, SimulatedSeparator,
};

/// Build a test `ServerConfig` with short timings.
///
/// Heartbeats fire every 50 ms and finished channels close after 20 ms so
/// stream tests run quickly.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout: Duration::from_secs(5),
        heartbeat_interval: Duration::from_millis(50),
        stream_inactivity: Duration::from_secs(5),
        channel_close_grace: Duration::from_millis(20),
        simulated_step: Duration::ZERO,
        ..ServerConfig::default()
    }
}

/// Build the full application router around `engine`.
///
/// Uses the same [`build_app_router`] as `main.rs`, so tests exercise the
/// production middleware stack. The state is returned alongside so tests
/// can inspect the registry and broker directly.
pub fn build_test_app(engine: Arc<dyn ProcessingEngine>) -> (Router, AppState) {
    build_test_app_with(test_config(), engine)
}

pub fn build_test_app_with(
    config: ServerConfig,
    engine: Arc<dyn ProcessingEngine>,
) -> (Router, AppState) {
    let state = AppState::new(config.clone(), engine);
    let app = build_app_router(state.clone(), &config);
    (app, state)
}

/// App running the simulated separator with no delay between steps.
pub fn simulated_app() -> (Router, AppState) {
    build_test_app(Arc::new(SimulatedSeparator::new(Duration::ZERO)))
}

// ---------------------------------------------------------------------------
// Test engines
// ---------------------------------------------------------------------------

/// Progress reported by [`gated_engine`] before it blocks.
pub const GATED_PROGRESS: u8 = 10;
/// Result handle of a [`gated_engine`] run.
pub const GATED_RESULT: &str = "separated/test/output";

/// A latch the test opens to let gated engines finish.
#[derive(Clone, Default)]
pub struct Gate(Arc<(Mutex<bool>, Condvar)>);

impl Gate {
    pub fn open(&self) {
        let (open, signal) = &*self.0;
        *open.lock().unwrap() = true;
        signal.notify_all();
    }

    /// Block until opened. Gives up after ten seconds.
    fn wait(&self) -> bool {
        let (open, signal) = &*self.0;
        let guard = open.lock().unwrap();
        let (guard, _) = signal
            .wait_timeout_while(guard, Duration::from_secs(10), |open| !*open)
            .unwrap();
        *guard
    }
}

/// Reports [`GATED_PROGRESS`], waits for `gate`, reports 60 and completes.
pub fn gated_engine(gate: Gate) -> Arc<dyn ProcessingEngine> {
    Arc::new(
        move |_: &JobInput,
              _: &SeparationParams,
              sink: &dyn ProgressSink|
              -> Result<ResultHandle, EngineFailure> {
            sink.report(GATED_PROGRESS, "Stage one");
            if !gate.wait() {
                return Err(EngineFailure::Processing("gate never opened".to_string()));
            }
            sink.report(60, "Stage two");
            Ok(GATED_RESULT.to_string())
        },
    )
}

/// Reports [`GATED_PROGRESS`], waits for `gate`, then reports every step
/// up to 99 back to back before completing.
pub fn bursty_engine(gate: Gate) -> Arc<dyn ProcessingEngine> {
    Arc::new(
        move |_: &JobInput,
              _: &SeparationParams,
              sink: &dyn ProgressSink|
              -> Result<ResultHandle, EngineFailure> {
            sink.report(GATED_PROGRESS, "Stage one");
            if !gate.wait() {
                return Err(EngineFailure::Processing("gate never opened".to_string()));
            }
            for progress in GATED_PROGRESS + 1..100 {
                sink.report(progress, "Burst");
            }
            Ok(GATED_RESULT.to_string())
        },
    )
}

/// Fails immediately with `detail`.
pub fn failing_engine(detail: &'static str) -> Arc<dyn ProcessingEngine> {
    Arc::new(
        move |_: &JobInput,
              _: &SeparationParams,
              _: &dyn ProgressSink|
              -> Result<ResultHandle, EngineFailure> {
            Err(EngineFailure::Processing(detail.to_string()))
        },
    )
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response {
    send(app, Method::GET, uri, Body::empty()).await
}

pub async fn delete(app: Router, uri: &str) -> Response {
    send(app, Method::DELETE, uri, Body::empty()).await
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response {
    post_raw(app, uri, body.to_string()).await
}

pub async fn post_raw(app: Router, uri: &str, body: impl Into<String>) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.into()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

async fn send(app: Router, method: Method, uri: &str, body: Body) -> Response {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(body)
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Collect a finite body as text. Fails the test after five seconds.
pub async fn body_text(response: Response) -> String {
    let collected = tokio::time::timeout(Duration::from_secs(5), response.into_body().collect())
        .await
        .expect("body did not finish")
        .unwrap();
    String::from_utf8(collected.to_bytes().to_vec()).unwrap()
}

/// Submit a job over REST and return its id.
pub async fn submit(app: Router, source: &str) -> JobId {
    let response = post_json(
        app,
        "/api/v1/jobs",
        serde_json::json!({ "input": { "source": source } }),
    )
    .await;
    let json = body_json(response).await;
    JobId::from(json["data"]["job_id"].as_str().unwrap())
}

/// Poll the registry until `done` holds for the job. Fails after five
/// seconds.
pub async fn wait_for(state: &AppState, job_id: &JobId, done: impl Fn(&JobRecord) -> bool) -> JobRecord {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(record) = state.registry.get(job_id) {
            if done(&record) {
                return record;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {job_id} did not reach the expected state"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn wait_for_terminal(state: &AppState, job_id: &JobId) -> JobRecord {
    wait_for(state, job_id, JobRecord::is_terminal).await
}

// ---------------------------------------------------------------------------
// Server-Sent Events
// ---------------------------------------------------------------------------

/// One parsed SSE block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: Option<String>,
    pub comment: Option<String>,
}

impl SseFrame {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(self.data.as_deref().expect("frame has no data")).unwrap()
    }

    pub fn is_heartbeat(&self) -> bool {
        self.comment.is_some() && self.data.is_none()
    }
}

pub fn parse_sse(text: &str) -> Vec<SseFrame> {
    text.split("\n\n")
        .filter(|block| !block.trim().is_empty())
        .map(|block| {
            let mut frame = SseFrame::default();
            for line in block.lines() {
                if let Some(comment) = line.strip_prefix(':') {
                    frame.comment = Some(comment.trim().to_string());
                } else if let Some(event) = line.strip_prefix("event:") {
                    frame.event = Some(event.trim().to_string());
                } else if let Some(data) = line.strip_prefix("data:") {
                    frame.data = Some(data.trim().to_string());
                }
            }
            frame
        })
        .collect()
}

/// Incremental reader over a live SSE body.
pub struct SseReader {
    body: Body,
    buffer: String,
}

impl SseReader {
    pub fn new(response: Response) -> Self {
        Self {
            body: response.into_body(),
            buffer: String::new(),
        }
    }

    /// Next complete frame, or `None` once the body ends. Fails the test if
    /// nothing arrives within two seconds.
    pub async fn next_frame(&mut self) -> Option<SseFrame> {
        loop {
            if let Some(end) = self.buffer.find("\n\n") {
                let block: String = self.buffer.drain(..end + 2).collect();
                if let Some(frame) = parse_sse(&block).into_iter().next() {
                    return Some(frame);
                }
                continue;
            }

            let frame = tokio::time::timeout(Duration::from_secs(2), self.body.frame())
                .await
                .expect("no SSE frame within two seconds");
            match frame {
                None => return None,
                Some(frame) => {
                    if let Ok(data) = frame.unwrap().into_data() {
                        self.buffer.push_str(std::str::from_utf8(&data).unwrap());
                    }
                }
            }
        }
    }

    /// Next frame that is not a heartbeat.
    pub async fn next_event(&mut self) -> Option<SseFrame> {
        loop {
            let frame = self.next_frame().await?;
            if !frame.is_heartbeat() {
                return Some(frame);
            }
        }
    }
}

//! JSON-RPC 2.0 adapter (MCP-style tool calls) and its progress stream.
//!
//! ```text
//! POST /mcp                      single request or batch
//! GET  /mcp/info                 server, tool and resource summary
//! GET  /mcp/stream/{stream_id}   SSE of notifications/progress messages
//! ```

pub mod catalog;
pub mod envelope;
pub mod methods;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::Event;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use demix_core::{JobEvent, JobId};
use serde_json::{json, Value};

use crate::sse;
use crate::state::AppState;
use envelope::RpcError;

pub const PROGRESS_NOTIFICATION: &str = "notifications/progress";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/mcp", post(handle_rpc))
        .route("/mcp/info", get(server_info))
}

/// Stream routes, mounted outside the request timeout.
pub fn stream_router() -> Router<AppState> {
    Router::new().route("/mcp/stream/{stream_id}", get(rpc_stream))
}

/// POST /mcp
///
/// Unparseable bodies get a 400 with a parse error. A single notification,
/// or a batch made only of notifications, gets 204.
async fn handle_rpc(State(state): State<AppState>, body: Bytes) -> Response {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(error = %e, "Unparseable RPC body");
            let reply = envelope::failure(Value::Null, RpcError::parse_error(e.to_string()));
            return (StatusCode::BAD_REQUEST, Json(reply)).into_response();
        }
    };

    match payload {
        Value::Array(batch) if batch.is_empty() => Json(envelope::failure(
            Value::Null,
            RpcError::invalid_request("Empty batch"),
        ))
        .into_response(),
        Value::Array(batch) => {
            let replies: Vec<Value> = batch
                .into_iter()
                .filter_map(|message| handle_message(&state, message))
                .collect();
            if replies.is_empty() {
                StatusCode::NO_CONTENT.into_response()
            } else {
                Json(replies).into_response()
            }
        }
        message => match handle_message(&state, message) {
            Some(reply) => Json(reply).into_response(),
            None => StatusCode::NO_CONTENT.into_response(),
        },
    }
}

fn handle_message(state: &AppState, message: Value) -> Option<Value> {
    match envelope::parse_request(message) {
        Ok(request) => methods::handle(state, request),
        Err((id, error)) => Some(envelope::failure(id, error)),
    }
}

/// GET /mcp/info
async fn server_info() -> Json<Value> {
    Json(json!({
        "name": catalog::SERVER_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": {
            "transport": "JSON-RPC 2.0 over HTTP",
            "version": catalog::DEFAULT_PROTOCOL_VERSION,
        },
        "endpoint": { "url": "/mcp", "method": "POST", "contentType": "application/json" },
        "streaming": {
            "supported": true,
            "endpoint": "/mcp/stream/{stream_id}",
            "method": "GET",
            "contentType": "text/event-stream",
        },
        "capabilities": catalog::capabilities(),
        "tools": catalog::tools(),
        "resources": catalog::resources(),
        "errorCodes": envelope::error_codes(),
    }))
}

/// GET /mcp/stream/{stream_id}
///
/// The stream id is the job id returned by `start_job`.
async fn rpc_stream(State(state): State<AppState>, Path(stream_id): Path<String>) -> Response {
    let job_id = JobId::from(stream_id);
    let subscription = state.broker.subscribe(&state.registry, &job_id);
    tracing::info!(job_id = %job_id, "RPC progress stream client connected");

    let stream = sse::subscription_stream(
        subscription,
        state.config.heartbeat_interval,
        progress_notification,
    );
    sse::into_sse_response(stream)
}

/// A job frame as a JSON-RPC notification in an SSE `data:` line.
fn progress_notification(event: &JobEvent) -> Option<Event> {
    match progress_message(event) {
        Ok(message) => Some(Event::default().data(message.to_string())),
        Err(e) => {
            tracing::warn!(job_id = %event.job_id, error = %e, "Failed to serialize job frame");
            None
        }
    }
}

fn progress_message(event: &JobEvent) -> Result<Value, serde_json::Error> {
    let mut params = serde_json::to_value(event)?;
    params["progressToken"] = json!(event.job_id);
    params["total"] = json!(demix_core::job::MAX_PROGRESS);

    Ok(json!({
        "jsonrpc": envelope::JSONRPC_VERSION,
        "method": PROGRESS_NOTIFICATION,
        "params": params,
    }))
}

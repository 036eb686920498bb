//! RPC method dispatch.
//!
//! Every method reads and writes through the same registry and dispatcher
//! as the REST adapters, so a job started here is visible to Poll and
//! Stream consumers and vice versa.

use demix_core::JobId;
use demix_pipeline::params::MODELS;
use demix_pipeline::{JobInput, JobRequest, SeparationParams};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::catalog;
use super::envelope::{failure, success, RpcError, RpcRequest};
use crate::state::AppState;

/// Handle one parsed request. Returns the reply, or `None` for
/// notifications.
pub fn handle(state: &AppState, request: RpcRequest) -> Option<Value> {
    let notification = request.is_notification();
    let outcome = dispatch(state, &request.method, request.params);

    if notification {
        if let Err(error) = outcome {
            tracing::debug!(method = %request.method, error = %error, "RPC notification failed");
        }
        return None;
    }

    let id = request.id.unwrap_or(Value::Null);
    Some(match outcome {
        Ok(result) => success(id, result),
        Err(error) => failure(id, error),
    })
}

fn dispatch(state: &AppState, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
    tracing::debug!(method, "RPC call");

    match method {
        "initialize" => initialize(parse_params(params)?),
        "notifications/initialized" | "initialized" | "ping" => Ok(json!({})),
        "tools/list" | "list_tools" => Ok(json!({ "tools": catalog::tools() })),
        "resources/list" | "list_resources" => Ok(json!({ "resources": catalog::resources() })),
        "resources/read" => read_resource(parse_params(params)?),
        "tools/call" | "call_tool" => call_tool(state, parse_params(params)?),
        "job_status" => {
            let args: JobStatusArgs = parse_params(params)?;
            job_snapshot(state, &args.job_id)
        }
        _ => Err(RpcError::method_not_found(method)),
    }
}

/// Missing or null params read as an empty object.
fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, RpcError> {
    let params = match params {
        None | Some(Value::Null) => json!({}),
        Some(value) => value,
    };
    serde_json::from_value(params).map_err(|e| RpcError::invalid_params(e.to_string()))
}

// ---------------------------------------------------------------------------
// Lifecycle and resources
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct InitializeParams {
    #[serde(default, rename = "protocolVersion")]
    protocol_version: Option<String>,
}

fn initialize(params: InitializeParams) -> Result<Value, RpcError> {
    let protocol_version = params
        .protocol_version
        .unwrap_or_else(|| catalog::DEFAULT_PROTOCOL_VERSION.to_string());

    Ok(json!({
        "protocolVersion": protocol_version,
        "capabilities": catalog::capabilities(),
        "serverInfo": {
            "name": catalog::SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        },
    }))
}

#[derive(Debug, Deserialize)]
struct ReadResourceParams {
    uri: String,
}

fn read_resource(params: ReadResourceParams) -> Result<Value, RpcError> {
    catalog::read_resource(&params.uri)
        .ok_or_else(|| RpcError::invalid_params(format!("Unknown resource: {}", params.uri)))
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ToolCall {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct StartJobArgs {
    #[serde(alias = "file_path")]
    source: String,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default = "default_stream_progress")]
    stream_progress: bool,
    #[serde(flatten)]
    params: SeparationParams,
}

fn default_stream_progress() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct JobStatusArgs {
    job_id: JobId,
}

fn call_tool(state: &AppState, call: ToolCall) -> Result<Value, RpcError> {
    let arguments = call.arguments;
    let payload = match call.name.as_str() {
        catalog::TOOL_START_JOB | "separate_audio" => start_job(state, parse_params(arguments)?)?,
        catalog::TOOL_JOB_STATUS | "get_job_status" => {
            let args: JobStatusArgs = parse_params(arguments)?;
            job_snapshot(state, &args.job_id)?
        }
        catalog::TOOL_LIST_MODELS | "get_models" => json!({ "models": MODELS }),
        other => return Err(RpcError::invalid_params(format!("Unknown tool: {other}"))),
    };
    Ok(tool_result(payload))
}

fn start_job(state: &AppState, args: StartJobArgs) -> Result<Value, RpcError> {
    let request = JobRequest::new(
        JobInput {
            source: args.source,
            filename: args.filename,
        },
        args.params,
    );
    request.validate()?;

    let model = request.params.model.clone();
    let stems = request.params.output_stems();
    let job_id = state
        .dispatcher
        .submit(request)
        .map_err(|e| RpcError::from(demix_core::error::CoreError::from(e)))?;

    tracing::info!(job_id = %job_id, model = %model, "Job started over RPC");

    let mut reply = json!({
        "job_id": job_id,
        "status": "queued",
        "message": "Job started",
        "model": model,
        "stems": stems,
    });
    if args.stream_progress {
        reply["stream_id"] = json!(job_id);
        reply["stream_url"] = json!(format!("/mcp/stream/{job_id}"));
    }
    Ok(reply)
}

fn job_snapshot(state: &AppState, job_id: &JobId) -> Result<Value, RpcError> {
    let record = state
        .registry
        .get(job_id)
        .ok_or_else(|| RpcError::job_not_found(job_id))?;
    serde_json::to_value(record).map_err(|e| RpcError::internal(e.to_string()))
}

/// Tool results carry the payload both as text and structured content.
fn tool_result(payload: Value) -> Value {
    let text = serde_json::to_string_pretty(&payload).unwrap_or_else(|_| "{}".to_string());
    json!({
        "content": [{ "type": "text", "text": text }],
        "structuredContent": payload,
        "isError": false,
    })
}

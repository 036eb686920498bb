//! JSON-RPC 2.0 envelope: request parsing, error objects and replies.

use demix_core::error::CoreError;
use demix_core::JobId;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
/// Server-defined: the referenced job is unknown.
pub const JOB_NOT_FOUND: i64 = -32001;

/// Every error code this server can reply with.
pub fn error_codes() -> Value {
    json!([
        { "code": PARSE_ERROR, "message": "Parse error" },
        { "code": INVALID_REQUEST, "message": "Invalid request" },
        { "code": METHOD_NOT_FOUND, "message": "Method not found" },
        { "code": INVALID_PARAMS, "message": "Invalid params" },
        { "code": INTERNAL_ERROR, "message": "Internal error" },
        { "code": JOB_NOT_FOUND, "message": "Job not found" },
    ])
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub params: Option<Value>,
}

impl RpcRequest {
    /// Requests without an id (or with a null id) are notifications and
    /// never get a reply.
    pub fn is_notification(&self) -> bool {
        matches!(self.id, None | Some(Value::Null))
    }
}

/// The `error` member of a failed reply.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("{message} ({code})")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    fn new(code: i64, message: &str, detail: impl Into<String>) -> Self {
        Self {
            code,
            message: message.to_string(),
            data: Some(Value::String(detail.into())),
        }
    }

    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self::new(PARSE_ERROR, "Parse error", detail)
    }

    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self::new(INVALID_REQUEST, "Invalid Request", detail)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, "Method not found", format!("Unknown method: {method}"))
    }

    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, "Invalid params", detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, "Internal error", detail)
    }

    pub fn job_not_found(job_id: &JobId) -> Self {
        Self::new(JOB_NOT_FOUND, "Job not found", format!("Job {job_id} not found"))
    }
}

impl From<CoreError> for RpcError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound { entity, id } => Self::new(
                JOB_NOT_FOUND,
                "Job not found",
                format!("{entity} {id} not found"),
            ),
            CoreError::Validation(msg) => Self::invalid_params(msg),
            CoreError::Conflict(msg) | CoreError::Internal(msg) => {
                tracing::error!(error = %msg, "RPC call failed");
                Self::internal(msg)
            }
        }
    }
}

/// Validate one message of a request body.
///
/// On failure returns the id to reply with (null when it could not be
/// read) alongside the error.
pub fn parse_request(raw: Value) -> Result<RpcRequest, (Value, RpcError)> {
    let Value::Object(ref object) = raw else {
        return Err((
            Value::Null,
            RpcError::invalid_request("Request must be a JSON object"),
        ));
    };

    let id = match object.get("id") {
        Some(id @ (Value::Null | Value::String(_) | Value::Number(_))) => id.clone(),
        Some(_) => {
            return Err((
                Value::Null,
                RpcError::invalid_request("id must be a string, number or null"),
            ))
        }
        None => Value::Null,
    };

    if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err((id, RpcError::invalid_request("Invalid JSON-RPC version")));
    }
    match object.get("method") {
        Some(Value::String(method)) if !method.is_empty() => {}
        _ => return Err((id, RpcError::invalid_request("Missing method"))),
    }

    serde_json::from_value(raw).map_err(|e| (id, RpcError::invalid_request(e.to_string())))
}

pub fn success(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "result": result })
}

pub fn failure(id: Value, error: RpcError) -> Value {
    json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "error": error })
}

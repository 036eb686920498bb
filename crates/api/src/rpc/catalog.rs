//! Tools and resources advertised over RPC.

use demix_pipeline::params::{
    DEFAULT_MODEL, MAX_MP3_BITRATE, MAX_SEGMENT_SECS, MIN_MP3_BITRATE, MIN_SEGMENT_SECS, MODELS,
};
use serde_json::{json, Value};

pub const SERVER_NAME: &str = "demix-job-service";
/// Protocol revision reported when the client does not name one.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

pub const TOOL_START_JOB: &str = "start_job";
pub const TOOL_JOB_STATUS: &str = "job_status";
pub const TOOL_LIST_MODELS: &str = "list_models";

pub const RESOURCE_API_DOCS: &str = "demix://docs/api";
pub const RESOURCE_MODELS: &str = "demix://models/info";

pub fn capabilities() -> Value {
    json!({
        "tools": { "listChanged": false },
        "resources": { "subscribe": false, "listChanged": false },
        "experimental": { "streaming": true },
    })
}

pub fn tools() -> Value {
    let models: Vec<&str> = MODELS.iter().map(|model| model.name).collect();
    let mut stems: Vec<&str> = MODELS.iter().flat_map(|model| model.stems.iter().copied()).collect();
    stems.sort_unstable();
    stems.dedup();

    json!([
        {
            "name": TOOL_START_JOB,
            "description": "Start a stem separation job. Progress is available through job_status or the stream_url.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "source": { "type": "string", "description": "Location of the input audio" },
                    "filename": { "type": "string", "description": "Original file name, used to name outputs" },
                    "model": { "type": "string", "enum": models, "default": DEFAULT_MODEL },
                    "stems": { "type": "array", "items": { "type": "string", "enum": stems } },
                    "two_stems": { "type": "string", "enum": stems },
                    "segment": { "type": "integer", "minimum": MIN_SEGMENT_SECS, "maximum": MAX_SEGMENT_SECS },
                    "mp3": { "type": "boolean", "default": false },
                    "mp3_bitrate": { "type": "integer", "minimum": MIN_MP3_BITRATE, "maximum": MAX_MP3_BITRATE },
                    "stream_progress": { "type": "boolean", "default": true },
                },
                "required": ["source"],
            },
        },
        {
            "name": TOOL_JOB_STATUS,
            "description": "Current state of a job",
            "inputSchema": {
                "type": "object",
                "properties": { "job_id": { "type": "string" } },
                "required": ["job_id"],
            },
        },
        {
            "name": TOOL_LIST_MODELS,
            "description": "Available separation models",
            "inputSchema": {
                "type": "object",
                "properties": {},
                "additionalProperties": false,
            },
        },
    ])
}

pub fn resources() -> Value {
    json!([
        {
            "uri": RESOURCE_API_DOCS,
            "name": "API Documentation",
            "description": "How to start jobs and follow their progress",
            "mimeType": "text/markdown",
        },
        {
            "uri": RESOURCE_MODELS,
            "name": "Models Information",
            "description": "Separation models and the stems they produce",
            "mimeType": "application/json",
        },
    ])
}

/// Contents of a resource, `None` for unknown URIs.
pub fn read_resource(uri: &str) -> Option<Value> {
    let (mime_type, text) = match uri {
        RESOURCE_API_DOCS => ("text/markdown", API_DOCS.to_string()),
        RESOURCE_MODELS => (
            "application/json",
            serde_json::to_string_pretty(&json!({ "models": MODELS }))
                .unwrap_or_else(|_| "{}".to_string()),
        ),
        _ => return None,
    };
    Some(json!({
        "contents": [{ "uri": uri, "mimeType": mime_type, "text": text }],
    }))
}

const API_DOCS: &str = "\
# Demix job service

All RPC calls go to `POST /mcp` as JSON-RPC 2.0 messages. Batches are accepted.

## Tools

### start_job
Start a separation job.
- **source**: location of the input audio (alias `file_path`)
- **model**: htdemucs, htdemucs_ft, htdemucs_6s, mdx or mdx_q
- **stems**: stems to produce
- **stream_progress**: include a `stream_url` in the reply (default true)

### job_status
Current state of a job.
- **job_id**: id returned by start_job

### list_models
Available models and the stems each produces.

## Progress streaming
`GET /mcp/stream/{stream_id}` is an SSE stream of `notifications/progress`
messages. The first message is the job's current state and the stream ends
after the completed or failed message.

## Errors
Unknown jobs fail with code -32001.
";

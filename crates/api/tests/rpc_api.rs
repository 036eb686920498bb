//! Integration tests for the JSON-RPC endpoint and its progress stream.

mod common;

use axum::http::StatusCode;
use common::{
    body_json, body_text, build_test_app, gated_engine, get, parse_sse, post_json, post_raw,
    simulated_app, submit, wait_for, wait_for_terminal, Gate, SseReader, GATED_PROGRESS,
};
use demix_core::{JobId, JobStatus};
use serde_json::{json, Value};

async fn rpc(app: axum::Router, body: Value) -> Value {
    let response = post_json(app, "/mcp", body).await;
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

// ---------------------------------------------------------------------------
// Envelope handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ping_replies_with_empty_result() {
    let (app, _state) = simulated_app();
    let reply = rpc(app, json!({ "jsonrpc": "2.0", "id": "p-1", "method": "ping" })).await;
    assert_eq!(reply["jsonrpc"], "2.0");
    assert_eq!(reply["id"], "p-1");
    assert_eq!(reply["result"], json!({}));
}

#[tokio::test]
async fn unparseable_body_is_a_400_parse_error() {
    let (app, _state) = simulated_app();
    let response = post_raw(app, "/mcp", "{\"jsonrpc\": ").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let reply = body_json(response).await;
    assert_eq!(reply["error"]["code"], -32700);
    assert_eq!(reply["id"], Value::Null);
}

#[tokio::test]
async fn notification_gets_204() {
    let (app, _state) = simulated_app();
    let response = post_json(
        app,
        "/mcp",
        json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn batch_replies_skip_notifications() {
    let (app, _state) = simulated_app();
    let response = post_json(
        app,
        "/mcp",
        json!([
            { "jsonrpc": "2.0", "id": 1, "method": "ping" },
            { "jsonrpc": "2.0", "method": "notifications/initialized" },
            { "jsonrpc": "2.0", "id": 2, "method": "no_such_method" },
            { "jsonrpc": "1.0", "id": 3, "method": "ping" },
        ]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let replies = body_json(response).await;
    let replies = replies.as_array().unwrap();
    assert_eq!(replies.len(), 3);
    assert_eq!(replies[0]["id"], 1);
    assert_eq!(replies[1]["error"]["code"], -32601);
    assert_eq!(replies[2]["id"], 3);
    assert_eq!(replies[2]["error"]["code"], -32600);
}

#[tokio::test]
async fn batch_of_notifications_gets_204() {
    let (app, _state) = simulated_app();
    let response = post_json(
        app,
        "/mcp",
        json!([
            { "jsonrpc": "2.0", "method": "notifications/initialized" },
            { "jsonrpc": "2.0", "method": "ping" },
        ]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn empty_batch_is_invalid_request() {
    let (app, _state) = simulated_app();
    let reply = rpc(app, json!([])).await;
    assert_eq!(reply["error"]["code"], -32600);
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tools_and_resources_are_listed() {
    let (app, _state) = simulated_app();
    let reply = rpc(
        app.clone(),
        json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" }),
    )
    .await;
    let tools: Vec<&str> = reply["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|tool| tool["name"].as_str().unwrap())
        .collect();
    assert_eq!(tools, vec!["start_job", "job_status", "list_models"]);

    let reply = rpc(
        app.clone(),
        json!({ "jsonrpc": "2.0", "id": 2, "method": "list_resources" }),
    )
    .await;
    assert_eq!(reply["result"]["resources"].as_array().unwrap().len(), 2);

    let reply = rpc(
        app,
        json!({
            "jsonrpc": "2.0", "id": 3, "method": "resources/read",
            "params": { "uri": "demix://docs/api" },
        }),
    )
    .await;
    let contents = &reply["result"]["contents"][0];
    assert_eq!(contents["mimeType"], "text/markdown");
    assert!(contents["text"].as_str().unwrap().contains("start_job"));
}

#[tokio::test]
async fn info_endpoint_describes_the_server() {
    let (app, _state) = simulated_app();
    let json = body_json(get(app, "/mcp/info").await).await;
    assert_eq!(json["endpoint"]["url"], "/mcp");
    assert_eq!(json["streaming"]["supported"], true);
    assert!(json["tools"].is_array());

    let codes: Vec<i64> = json["errorCodes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["code"].as_i64().unwrap())
        .collect();
    assert!(codes.contains(&-32601));
    assert!(codes.contains(&-32001));
}

// ---------------------------------------------------------------------------
// Jobs over RPC
// ---------------------------------------------------------------------------

#[tokio::test]
async fn job_started_over_rpc_is_visible_to_poll() {
    let (app, state) = simulated_app();
    let reply = rpc(
        app.clone(),
        json!({
            "jsonrpc": "2.0", "id": 1, "method": "tools/call",
            "params": { "name": "start_job", "arguments": { "source": "uploads/mix.wav" } },
        }),
    )
    .await;
    let job_id = reply["result"]["structuredContent"]["job_id"]
        .as_str()
        .unwrap()
        .to_string();
    wait_for_terminal(&state, &JobId::from(job_id.as_str())).await;

    let json = body_json(get(app, &format!("/api/v1/status/{job_id}")).await).await;
    assert_eq!(json["data"]["status"], "completed");
    assert_eq!(json["data"]["result_handle"], "separated/htdemucs/mix");
}

#[tokio::test]
async fn job_submitted_over_rest_is_visible_to_rpc() {
    let (app, state) = simulated_app();
    let job_id = submit(app.clone(), "a.wav").await;
    wait_for_terminal(&state, &job_id).await;

    let reply = rpc(
        app,
        json!({
            "jsonrpc": "2.0", "id": 9, "method": "job_status",
            "params": { "job_id": job_id },
        }),
    )
    .await;
    assert_eq!(reply["result"]["job_id"], job_id.as_str());
    assert_eq!(reply["result"]["status"], "completed");
}

#[tokio::test]
async fn rpc_stream_follows_the_job() {
    let gate = Gate::default();
    let (app, state) = build_test_app(gated_engine(gate.clone()));
    let reply = rpc(
        app.clone(),
        json!({
            "jsonrpc": "2.0", "id": 1, "method": "tools/call",
            "params": { "name": "start_job", "arguments": { "file_path": "a.wav" } },
        }),
    )
    .await;
    let result = &reply["result"]["structuredContent"];
    let stream_url = result["stream_url"].as_str().unwrap().to_string();
    let job_id = JobId::from(result["job_id"].as_str().unwrap());
    wait_for(&state, &job_id, |rec| rec.progress == GATED_PROGRESS).await;

    let mut reader = SseReader::new(get(app, &stream_url).await);
    gate.open();

    let mut messages = Vec::new();
    while let Some(frame) = reader.next_event().await {
        assert!(frame.event.is_none());
        messages.push(frame.json());
    }

    assert_eq!(messages.len(), 3);
    for message in &messages {
        assert_eq!(message["jsonrpc"], "2.0");
        assert_eq!(message["method"], "notifications/progress");
        assert_eq!(message["params"]["progressToken"], job_id.as_str());
    }
    assert_eq!(messages[0]["params"]["progress"], GATED_PROGRESS);
    assert_eq!(messages[2]["params"]["type"], "job_completed");
    assert_eq!(messages[2]["params"]["progress"], 100);

    let record = wait_for_terminal(&state, &job_id).await;
    assert_eq!(record.status, JobStatus::Completed);
}

// ---------------------------------------------------------------------------
// Unknown jobs, on every adapter
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_job_is_not_found_on_every_adapter() {
    let (app, _state) = simulated_app();

    let response = get(app.clone(), "/api/v1/status/ghost").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let frames = parse_sse(&body_text(get(app.clone(), "/api/v1/stream/ghost").await).await);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].event.as_deref(), Some("job_not_found"));

    let frames = parse_sse(&body_text(get(app.clone(), "/mcp/stream/ghost").await).await);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].json()["params"]["type"], "job_not_found");

    let reply = rpc(
        app.clone(),
        json!({
            "jsonrpc": "2.0", "id": 1, "method": "job_status",
            "params": { "job_id": "ghost" },
        }),
    )
    .await;
    assert_eq!(reply["error"]["code"], -32001);

    let reply = rpc(
        app,
        json!({
            "jsonrpc": "2.0", "id": 2, "method": "tools/call",
            "params": { "name": "job_status", "arguments": { "job_id": "ghost" } },
        }),
    )
    .await;
    assert_eq!(reply["error"]["code"], -32001);
}

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::{rpc_request, send, tool_call};
use serde_json::json;
use std::sync::Arc;
use toolgate_core::jsonrpc::error_codes;
use toolgate_core::ToolPolicyEngine;
use toolgate_server::access_log::AccessLog;
use toolgate_server::auth::RequestGate;
use toolgate_server::discovery::Discovery;
use toolgate_server::mcp::McpState;
use toolgate_server::tools::ToolRegistry;
use toolgate_server::{build_router, RouterParts};

fn open_router() -> Router {
    build_router(RouterParts {
        gate: Arc::new(RequestGate::disabled()),
        mcp: Arc::new(McpState::new(
            "toolgate-test",
            "9.9.9",
            ToolRegistry::with_builtins(),
            ToolPolicyEngine::default(),
        )),
        discovery: Discovery::default(),
        access_log: Arc::new(AccessLog::default()),
    })
}

#[tokio::test]
async fn initialize_reports_server_info() {
    let body = send(
        &open_router(),
        rpc_request(
            None,
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "initialize",
                "params": {"protocolVersion": "2025-03-26", "capabilities": {}}
            }),
        ),
    )
    .await
    .json();

    assert_eq!(body["jsonrpc"], "2.0");
    assert_eq!(body["result"]["protocolVersion"], "2025-03-26");
    assert_eq!(body["result"]["serverInfo"]["name"], "toolgate-test");
    assert_eq!(body["result"]["serverInfo"]["version"], "9.9.9");
    assert!(body["result"]["capabilities"]["tools"].is_object());
}

#[tokio::test]
async fn initialized_notification_is_accepted_without_body() {
    let reply = send(
        &open_router(),
        rpc_request(
            None,
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        ),
    )
    .await;
    assert_eq!(reply.status, StatusCode::ACCEPTED);
    assert!(reply.body.is_empty());
}

#[tokio::test]
async fn tools_list_describes_registered_tools() {
    let body = send(
        &open_router(),
        rpc_request(
            None,
            json!({"jsonrpc": "2.0", "id": "list-1", "method": "tools/list"}),
        ),
    )
    .await
    .json();
    assert_eq!(body["id"], "list-1");
    let tools = body["result"]["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0]["name"], "whoami");
    assert_eq!(tools[0]["inputSchema"]["type"], "object");
}

#[tokio::test]
async fn protocol_errors_use_jsonrpc_codes() {
    let router = open_router();

    let body = send(
        &router,
        rpc_request(None, json!({"jsonrpc": "2.0", "id": 1, "method": "resources/list"})),
    )
    .await
    .json();
    assert_eq!(body["error"]["code"], error_codes::METHOD_NOT_FOUND);

    let body = send(
        &router,
        rpc_request(
            None,
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/call", "params": {"arguments": {}}}),
        ),
    )
    .await
    .json();
    assert_eq!(body["error"]["code"], error_codes::INVALID_PARAMS);

    let body = send(
        &router,
        rpc_request(None, json!({"jsonrpc": "1.0", "id": 3, "method": "tools/list"})),
    )
    .await
    .json();
    assert_eq!(body["error"]["code"], error_codes::INVALID_REQUEST);
    assert_eq!(body["id"], 3);

    let garbage = Request::post("/mcp")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let body = send(&router, garbage).await.json();
    assert_eq!(body["error"]["code"], error_codes::PARSE_ERROR);
    assert_eq!(body["id"], serde_json::Value::Null);
}

#[tokio::test]
async fn unknown_tool_is_a_tool_error() {
    let body = send(
        &open_router(),
        rpc_request(None, tool_call(4, "launch_rockets", json!({}))),
    )
    .await
    .json();
    assert_eq!(body["result"]["isError"], true);
    assert_eq!(
        body["result"]["content"][0]["text"],
        "unknown tool 'launch_rockets'"
    );
}

#[tokio::test]
async fn only_post_is_routed() {
    let reply = send(
        &open_router(),
        Request::get("/mcp").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(reply.status, StatusCode::METHOD_NOT_ALLOWED);
}

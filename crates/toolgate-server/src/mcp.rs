//! Streamable-HTTP MCP endpoint: JSON-RPC over `POST /mcp`.

use crate::auth::AuthorizationContext;
use crate::tools::ToolRegistry;
use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use toolgate_core::jsonrpc::{
    error_codes, JsonRpcRequest, JsonRpcResponse, RpcErrorPayload, RpcResult, ToolResultBody,
    JSONRPC_VERSION,
};
use toolgate_core::ToolPolicyEngine;

pub const MCP_PATH: &str = "/mcp";
pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-06-18";

/// Largest JSON-RPC body accepted.
const MAX_BODY_BYTES: usize = 1024 * 1024;

pub struct McpState {
    pub server_name: String,
    pub server_version: String,
    pub registry: ToolRegistry,
    pub policies: ToolPolicyEngine,
}

impl McpState {
    pub fn new(
        server_name: impl Into<String>,
        server_version: impl Into<String>,
        registry: ToolRegistry,
        policies: ToolPolicyEngine,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            server_version: server_version.into(),
            registry,
            policies,
        }
    }
}

pub async fn handle_mcp(State(state): State<Arc<McpState>>, req: Request) -> Response {
    let (parts, body) = req.into_parts();
    // Without the gate mounted, nothing was verified.
    let auth = parts
        .extensions
        .get::<AuthorizationContext>()
        .cloned()
        .unwrap_or_else(AuthorizationContext::bypassed);

    let body: Bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(_) => {
            return rpc_error(Value::Null, error_codes::INVALID_REQUEST, "request body too large")
        }
    };

    let request: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            return rpc_error(
                Value::Null,
                error_codes::PARSE_ERROR,
                format!("parse error: {e}"),
            )
        }
    };

    if request.jsonrpc != JSONRPC_VERSION {
        let id = request.id.clone().unwrap_or(Value::Null);
        return rpc_error(id, error_codes::INVALID_REQUEST, "jsonrpc must be \"2.0\"");
    }

    if request.is_notification() {
        tracing::debug!(method = %request.method, "notification received");
        return StatusCode::ACCEPTED.into_response();
    }

    let id = request.id.clone().unwrap_or(Value::Null);
    match request.method.as_str() {
        "initialize" => rpc_result(id, initialize_result(&state, &request.params)),
        "ping" => rpc_result(id, json!({})),
        "tools/list" => rpc_result(id, json!({ "tools": state.registry.descriptors() })),
        "tools/call" => call_tool(&state, &auth, id, &request).await,
        other => rpc_error(
            id,
            error_codes::METHOD_NOT_FOUND,
            format!("method not found: {other}"),
        ),
    }
}

fn initialize_result(state: &McpState, params: &Value) -> Value {
    let protocol_version = params
        .get("protocolVersion")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_PROTOCOL_VERSION);
    json!({
        "protocolVersion": protocol_version,
        "capabilities": { "tools": { "listChanged": false } },
        "serverInfo": { "name": state.server_name, "version": state.server_version },
    })
}

async fn call_tool(
    state: &McpState,
    auth: &AuthorizationContext,
    id: Value,
    request: &JsonRpcRequest,
) -> Response {
    let Some(params) = request.tool_params() else {
        return rpc_error(
            id,
            error_codes::INVALID_PARAMS,
            "tools/call requires params.name",
        );
    };

    if let Err(denied) = state.policies.check(&params.name, auth.policy_claims()) {
        return rpc_result(id, ToolResultBody::denied(&denied));
    }

    let Some(tool) = state.registry.get(&params.name) else {
        tracing::warn!(tool = %params.name, "call for unknown tool");
        return rpc_result(
            id,
            ToolResultBody::error(format!("unknown tool '{}'", params.name)),
        );
    };

    match tool.call(params.arguments, auth).await {
        Ok(value) => rpc_result(id, ToolResultBody::success(value)),
        Err(e) => {
            tracing::warn!(tool = %params.name, error = %e, "tool call failed");
            rpc_result(id, ToolResultBody::error(format!("{e:#}")))
        }
    }
}

fn rpc_result<T: Serialize>(id: Value, result: T) -> Response {
    Json(JsonRpcResponse::new(id, RpcResult { result })).into_response()
}

fn rpc_error(id: Value, code: i32, message: impl Into<String>) -> Response {
    Json(JsonRpcResponse::new(id, RpcErrorPayload::new(code, message))).into_response()
}

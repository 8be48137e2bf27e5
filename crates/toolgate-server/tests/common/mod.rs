#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use toolgate_server::config::{AllowConditionConfig, Config};
use toolgate_core::ToolPolicyConfig;
use tower::ServiceExt;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const RSA_K1: &[u8] = include_bytes!("../fixtures/rsa_k1.pem");
pub const RSA_K2: &[u8] = include_bytes!("../fixtures/rsa_k2.pem");
pub const JWKS_K1: &str = include_str!("../fixtures/jwks_k1.json");
pub const JWKS_K2: &str = include_str!("../fixtures/jwks_k2.json");

pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

pub fn sign(kid: &str, pem: &[u8], claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    encode(&header, claims, &EncodingKey::from_rsa_pem(pem).unwrap()).unwrap()
}

pub fn token_for(sub: &str, groups: &[&str]) -> String {
    sign(
        "k1",
        RSA_K1,
        &json!({"sub": sub, "groups": groups, "exp": now() + 3600}),
    )
}

/// JWKS endpoint at `/jwks.json` serving `jwks`.
pub async fn jwks_server(jwks: &str) -> MockServer {
    let server = MockServer::start().await;
    mount_jwks(&server, ResponseTemplate::new(200).set_body_raw(jwks.to_string(), "application/json")).await;
    server
}

pub async fn mount_jwks(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path("/jwks.json"))
        .respond_with(response)
        .mount(server)
        .await;
}

pub fn jwks_uri(server: &MockServer) -> Url {
    Url::parse(&format!("{}/jwks.json", server.uri())).unwrap()
}

/// JWT enforcement on, pointed at `server`, with a long refresh interval.
pub fn enforcing_config(server: &MockServer) -> Config {
    let mut cfg = Config::default();
    let jwt = &mut cfg.middleware.jwt;
    jwt.enabled = true;
    jwt.validation.jwks_uri = Some(jwks_uri(server));
    jwt.validation.cache_interval = Duration::from_secs(3600);
    jwt.validation.fetch_timeout = Duration::from_secs(2);
    cfg.oauth_protected_resource.enabled = true;
    cfg.oauth_protected_resource.resource = "https://tools.example.com/mcp".into();
    cfg.oauth_protected_resource.scopes_supported = vec!["openid".into(), "tweets".into()];
    cfg
}

pub fn allow_condition(expression: &str) -> AllowConditionConfig {
    AllowConditionConfig {
        expression: expression.to_string(),
    }
}

pub fn tool_policy(expression: &str, tools: &[&str]) -> ToolPolicyConfig {
    ToolPolicyConfig {
        expression: expression.to_string(),
        allowed_tools: tools.iter().map(|t| t.to_string()).collect(),
    }
}

pub fn rpc_request(token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::post("/mcp")
        .header(header::HOST, "tools.example.com")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn tool_call(id: u64, name: &str, arguments: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": {"name": name, "arguments": arguments}
    })
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    pub fn text(&self) -> String {
        String::from_utf8(self.body.clone()).unwrap()
    }
}

pub async fn send(router: &Router, request: Request<Body>) -> Reply {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec();
    Reply {
        status,
        headers,
        body,
    }
}

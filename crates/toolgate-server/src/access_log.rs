//! One structured log line per request, emitted after the response.

use crate::auth::sensitive_headers::{is_sensitive, redact_value};
use crate::config::AccessLogsConfig;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Default, Clone)]
pub struct AccessLog {
    excluded: Vec<String>,
    redacted: Vec<String>,
}

impl AccessLog {
    pub fn new(cfg: &AccessLogsConfig) -> Self {
        let lower = |names: &[String]| -> Vec<String> {
            names.iter().map(|n| n.to_ascii_lowercase()).collect()
        };
        Self {
            excluded: lower(&cfg.excluded_headers),
            redacted: lower(&cfg.redacted_headers),
        }
    }

    /// Header map for logging: excluded names dropped, sensitive and
    /// configured names redacted. Repeated headers are joined with `, `.
    pub fn filter_headers(&self, headers: &HeaderMap) -> BTreeMap<String, String> {
        let mut out: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in headers {
            let name = name.as_str();
            if self.excluded.iter().any(|e| e == name) {
                continue;
            }
            let raw = String::from_utf8_lossy(value.as_bytes());
            let shown = if is_sensitive(name) || self.redacted.iter().any(|r| r == name) {
                redact_value(&raw)
            } else {
                raw.into_owned()
            };
            out.entry(name.to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(&shown);
                })
                .or_insert(shown);
        }
        out
    }
}

pub async fn access_log_middleware(
    State(log): State<Arc<AccessLog>>,
    req: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let request_id = uuid::Uuid::new_v4();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let remote_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default();
    let headers = log.filter_headers(req.headers());

    let response = next.run(req).await;

    tracing::info!(
        target: "toolgate::access",
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = response.status().as_u16(),
        remote_addr = %remote_addr,
        user_agent = %user_agent,
        headers = ?headers,
        duration_ms = started.elapsed().as_millis() as u64,
        "request served"
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn filters_and_redacts_headers() {
        let log = AccessLog::new(&AccessLogsConfig {
            excluded_headers: vec!["X-Request-Start".into()],
            redacted_headers: vec!["X-Upstream-Token".into()],
        });

        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer aaaaaaaaaaaaaaaa"),
        );
        headers.insert("x-upstream-token", HeaderValue::from_static("tok"));
        headers.insert("x-request-start", HeaderValue::from_static("12345"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        headers.append(header::ACCEPT, HeaderValue::from_static("text/event-stream"));

        let out = log.filter_headers(&headers);
        assert_eq!(out["authorization"], "Bearer aaa***");
        assert_eq!(out["x-upstream-token"], "***");
        assert!(!out.contains_key("x-request-start"));
        assert_eq!(out["accept"], "application/json, text/event-stream");
    }
}

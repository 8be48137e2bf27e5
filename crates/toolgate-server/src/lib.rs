//! toolgate: an MCP tool server that authorizes every call.
//!
//! Requests pass the access log, then the [`auth::RequestGate`] (bearer token
//! against a refreshed JWKS, plus CEL allow-conditions), then the MCP
//! endpoint, where `tools/call` is checked against the tool policies before
//! the tool runs.

pub mod access_log;
pub mod auth;
pub mod config;
pub mod discovery;
pub mod mcp;
pub mod tools;

use access_log::{access_log_middleware, AccessLog};
use anyhow::Context;
use auth::{
    gate_middleware, ChallengeParams, KeyCache, RefreshTask, RequestGate, TokenValidator,
    ValidationSettings,
};
use axum::middleware::from_fn_with_state;
use axum::routing::post;
use axum::Router;
use config::Config;
use discovery::Discovery;
use mcp::{handle_mcp, McpState, MCP_PATH};
use std::sync::Arc;
use toolgate_core::condition::compile_all;
use toolgate_core::ToolPolicyEngine;
use tools::ToolRegistry;

/// Everything the router is assembled from.
pub struct RouterParts {
    pub gate: Arc<RequestGate>,
    pub mcp: Arc<McpState>,
    pub discovery: Discovery,
    pub access_log: Arc<AccessLog>,
}

pub fn build_router(parts: RouterParts) -> Router {
    let mcp = Router::new()
        .route(MCP_PATH, post(handle_mcp))
        .with_state(parts.mcp)
        .layer(from_fn_with_state(parts.gate, gate_middleware));

    Router::new()
        .merge(mcp)
        .merge(parts.discovery.router())
        .layer(from_fn_with_state(parts.access_log, access_log_middleware))
}

/// A fully wired server, ready to bind.
pub struct App {
    pub router: Router,
    pub refresh_task: Option<RefreshTask>,
    pub key_cache: Option<Arc<KeyCache>>,
}

impl App {
    /// Compile expressions, fetch the first key set and wire the router.
    /// Any error here is a startup failure.
    pub async fn build(cfg: &Config, registry: ToolRegistry) -> anyhow::Result<Self> {
        let policies =
            ToolPolicyEngine::compile(&cfg.policies.tools).context("compiling tool policies")?;
        tracing::info!(policies = policies.len(), "tool policies compiled");

        let jwt = &cfg.middleware.jwt;
        let (gate, key_cache, refresh_task) = if jwt.enabled {
            let conditions = compile_all(
                jwt.validation
                    .allow_conditions
                    .iter()
                    .map(|c| c.expression.as_str()),
            )
            .context("compiling JWT allow conditions")?;

            let jwks_uri = jwt
                .validation
                .jwks_uri
                .clone()
                .context("middleware.jwt.validation.jwks_uri is not set")?;
            let cache = Arc::new(
                KeyCache::new(jwks_uri.clone(), jwt.validation.fetch_timeout)
                    .context("building JWKS client")?,
            );
            let keys = cache
                .refresh()
                .await
                .with_context(|| format!("initial JWKS fetch from {jwks_uri}"))?;
            tracing::info!(jwks_uri = %jwks_uri, keys, "JWKS loaded");

            let validator =
                TokenValidator::new(Arc::clone(&cache), ValidationSettings::from(&jwt.validation));
            let gate = RequestGate::new(
                validator,
                conditions,
                ChallengeParams {
                    url_suffix: cfg.oauth_protected_resource.url_suffix.clone(),
                    scopes: cfg.oauth_protected_resource.scopes_supported.clone(),
                },
            );
            let task = Arc::clone(&cache).start(jwt.validation.cache_interval);
            (gate, Some(cache), Some(task))
        } else {
            tracing::warn!("JWT validation disabled, every request is let through");
            (RequestGate::disabled(), None, None)
        };

        let discovery = Discovery::from_config(
            &cfg.oauth_protected_resource,
            &cfg.oauth_authorization_server,
            jwt.validation.fetch_timeout,
        )
        .context("building discovery client")?;

        let router = build_router(RouterParts {
            gate: Arc::new(gate),
            mcp: Arc::new(McpState::new(
                cfg.server.name.clone(),
                cfg.server.version.clone(),
                registry,
                policies,
            )),
            discovery,
            access_log: Arc::new(AccessLog::new(&cfg.middleware.access_logs)),
        });

        Ok(Self {
            router,
            refresh_task,
            key_cache,
        })
    }

    /// Stop background work. The router itself holds no tasks.
    pub async fn shutdown(self) {
        if let Some(task) = self.refresh_task {
            task.stop().await;
        }
    }
}

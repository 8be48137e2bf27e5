//! OAuth discovery documents served next to the MCP endpoint.
//!
//! Neither route sits behind the request gate: clients read them to find out
//! how to obtain a token in the first place.

use crate::config::{OAuthAuthorizationServerConfig, OAuthProtectedResourceConfig};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

pub const PROTECTED_RESOURCE_PATH: &str = "/.well-known/oauth-protected-resource";
pub const AUTHORIZATION_SERVER_PATH: &str = "/.well-known/oauth-authorization-server";

/// RFC 9728 section 2 metadata. Empty optional members are left out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProtectedResourceMetadata {
    pub resource: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub authorization_servers: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub jwks_uri: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scopes_supported: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bearer_methods_supported: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resource_signing_alg_values_supported: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub resource_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub resource_documentation: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub resource_policy_uri: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub resource_tos_uri: String,
    #[serde(skip_serializing_if = "is_false")]
    pub tls_client_certificate_bound_access_tokens: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub authorization_details_types_supported: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dpop_signing_alg_values_supported: Vec<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub dpop_bound_access_tokens_required: bool,
}

fn is_false(v: &bool) -> bool {
    !*v
}

impl From<&OAuthProtectedResourceConfig> for ProtectedResourceMetadata {
    fn from(cfg: &OAuthProtectedResourceConfig) -> Self {
        Self {
            resource: cfg.resource.clone(),
            authorization_servers: cfg.auth_servers.clone(),
            jwks_uri: cfg.jwks_uri.clone(),
            scopes_supported: cfg.scopes_supported.clone(),
            bearer_methods_supported: cfg.bearer_methods_supported.clone(),
            resource_signing_alg_values_supported: cfg
                .resource_signing_alg_values_supported
                .clone(),
            resource_name: cfg.resource_name.clone(),
            resource_documentation: cfg.resource_documentation.clone(),
            resource_policy_uri: cfg.resource_policy_uri.clone(),
            resource_tos_uri: cfg.resource_tos_uri.clone(),
            tls_client_certificate_bound_access_tokens: cfg
                .tls_client_certificate_bound_access_tokens,
            authorization_details_types_supported: cfg
                .authorization_details_types_supported
                .clone(),
            dpop_signing_alg_values_supported: cfg.dpop_signing_alg_values_supported.clone(),
            dpop_bound_access_tokens_required: cfg.dpop_bound_access_tokens_required,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("failed to serialize metadata: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to fetch {url}: {source}")]
    Upstream {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered {status}")]
    UpstreamStatus {
        url: String,
        status: reqwest::StatusCode,
    },
}

impl IntoResponse for DiscoveryError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "discovery document unavailable");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
    }
}

struct AuthorizationServerProxy {
    client: reqwest::Client,
    openid_configuration_url: String,
}

#[derive(Default)]
pub struct Discovery {
    protected_resource: Option<(String, ProtectedResourceMetadata)>,
    authorization_server: Option<(String, AuthorizationServerProxy)>,
}

impl Discovery {
    pub fn from_config(
        protected_resource: &OAuthProtectedResourceConfig,
        authorization_server: &OAuthAuthorizationServerConfig,
        fetch_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let mut discovery = Self::default();

        if protected_resource.enabled {
            discovery.protected_resource = Some((
                format!("{PROTECTED_RESOURCE_PATH}{}", protected_resource.url_suffix),
                ProtectedResourceMetadata::from(protected_resource),
            ));
        }

        if authorization_server.enabled {
            let client = reqwest::Client::builder()
                .timeout(fetch_timeout)
                .build()?;
            discovery.authorization_server = Some((
                format!("{AUTHORIZATION_SERVER_PATH}{}", authorization_server.url_suffix),
                AuthorizationServerProxy {
                    client,
                    openid_configuration_url: format!(
                        "{}/.well-known/openid-configuration",
                        authorization_server.issuer_uri.trim_end_matches('/')
                    ),
                },
            ));
        }

        Ok(discovery)
    }

    pub fn router(self) -> Router {
        let state = Arc::new(self);
        let mut router = Router::new();
        if let Some((path, _)) = &state.protected_resource {
            router = router.route(path, get(protected_resource));
        }
        if let Some((path, _)) = &state.authorization_server {
            router = router.route(path, get(authorization_server));
        }
        router.with_state(state)
    }
}

async fn protected_resource(State(discovery): State<Arc<Discovery>>) -> Response {
    let Some((_, metadata)) = &discovery.protected_resource else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match serde_json::to_vec(metadata) {
        Ok(body) => json_document(body),
        Err(e) => DiscoveryError::from(e).into_response(),
    }
}

async fn authorization_server(State(discovery): State<Arc<Discovery>>) -> Response {
    let Some((_, proxy)) = &discovery.authorization_server else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match proxy.fetch().await {
        Ok(body) => json_document(body),
        Err(e) => e.into_response(),
    }
}

impl AuthorizationServerProxy {
    async fn fetch(&self) -> Result<Vec<u8>, DiscoveryError> {
        let url = &self.openid_configuration_url;
        let upstream = |source| DiscoveryError::Upstream {
            url: url.clone(),
            source,
        };
        let resp = self.client.get(url).send().await.map_err(upstream)?;
        if !resp.status().is_success() {
            return Err(DiscoveryError::UpstreamStatus {
                url: url.clone(),
                status: resp.status(),
            });
        }
        Ok(resp.bytes().await.map_err(upstream)?.to_vec())
    }
}

fn json_document(body: Vec<u8>) -> Response {
    let mut response = Response::new(Body::from(body));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=3600"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    response
}

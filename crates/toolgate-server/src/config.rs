//! YAML configuration.
//!
//! `$VAR` and `${VAR}` references are expanded from the process environment
//! before parsing; unknown variables become empty strings.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use toolgate_core::ToolPolicyConfig;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub middleware: MiddlewareConfig,
    pub policies: PoliciesConfig,
    pub oauth_authorization_server: OAuthAuthorizationServerConfig,
    pub oauth_protected_resource: OAuthProtectedResourceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub name: String,
    pub version: String,
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "toolgate".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MiddlewareConfig {
    pub access_logs: AccessLogsConfig,
    pub jwt: JwtConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessLogsConfig {
    pub excluded_headers: Vec<String>,
    pub redacted_headers: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    pub enabled: bool,
    pub validation: JwtValidationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtValidationConfig {
    pub jwks_uri: Option<Url>,
    #[serde(with = "humantime_duration")]
    pub cache_interval: Duration,
    #[serde(with = "humantime_duration")]
    pub fetch_timeout: Duration,
    #[serde(with = "humantime_duration")]
    pub leeway: Duration,
    pub issuer: Option<String>,
    pub audience: Vec<String>,
    pub allow_conditions: Vec<AllowConditionConfig>,
}

impl Default for JwtValidationConfig {
    fn default() -> Self {
        Self {
            jwks_uri: None,
            cache_interval: Duration::from_secs(600),
            fetch_timeout: Duration::from_secs(5),
            leeway: Duration::from_secs(30),
            issuer: None,
            audience: Vec::new(),
            allow_conditions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowConditionConfig {
    pub expression: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PoliciesConfig {
    pub tools: Vec<ToolPolicyConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthAuthorizationServerConfig {
    pub enabled: bool,
    pub url_suffix: String,
    pub issuer_uri: String,
}

/// RFC 9728 protected resource metadata, served verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthProtectedResourceConfig {
    pub enabled: bool,
    pub url_suffix: String,
    pub resource: String,
    pub auth_servers: Vec<String>,
    pub jwks_uri: String,
    pub scopes_supported: Vec<String>,
    pub bearer_methods_supported: Vec<String>,
    pub resource_signing_alg_values_supported: Vec<String>,
    pub resource_name: String,
    pub resource_documentation: String,
    pub resource_policy_uri: String,
    pub resource_tos_uri: String,
    pub tls_client_certificate_bound_access_tokens: bool,
    pub authorization_details_types_supported: Vec<String>,
    pub dpop_signing_alg_values_supported: Vec<String>,
    pub dpop_bound_access_tokens_required: bool,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env(content);
        let cfg: Config = serde_yaml::from_str(&expanded)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let jwt = &self.middleware.jwt;
        if !jwt.enabled {
            return Ok(());
        }

        let Some(uri) = &jwt.validation.jwks_uri else {
            return Err(ConfigError::Invalid(
                "middleware.jwt.validation.jwks_uri is required when jwt is enabled".into(),
            ));
        };
        if uri.cannot_be_a_base() || uri.host().is_none() {
            return Err(ConfigError::Invalid(format!(
                "middleware.jwt.validation.jwks_uri must be an absolute http(s) URL, got '{uri}'"
            )));
        }
        if uri.scheme() != "https" {
            tracing::warn!(jwks_uri = %uri, "JWKS URI is not HTTPS, keys can be tampered with in transit");
        }
        if jwt.validation.cache_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "middleware.jwt.validation.cache_interval must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Expand environment references the way a shell would, minus the errors.
pub fn expand_env(content: &str) -> Cow<'_, str> {
    shellexpand::env_with_context_no_errors(content, |name| {
        Some(std::env::var(name).unwrap_or_default())
    })
}

mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}

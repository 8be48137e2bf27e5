use super::jwks::KeyCache;
use crate::config::JwtValidationConfig;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, Validation};
use serde_json::{Map, Value};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use toolgate_core::Claims;

/// Header parameters that would let a token choose its own key.
const FORBIDDEN_HEADER_FIELDS: &[&str] = &["crit", "jku", "jwk", "x5u", "x5c"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error("no verification key for kid {0:?}")]
    UnknownKey(Option<String>),

    #[error("invalid token signature")]
    InvalidSignature,

    #[error("token has expired")]
    Expired,

    #[error("token is not yet valid")]
    NotYetValid,

    #[error("failed to decode token payload: {0}")]
    PayloadDecodeError(String),

    #[error("token rejected: {0}")]
    Rejected(String),
}

impl TokenError {
    /// Short stable label for logs.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MalformedToken(_) => "malformed_token",
            Self::UnknownKey(_) => "unknown_key",
            Self::InvalidSignature => "invalid_signature",
            Self::Expired => "expired",
            Self::NotYetValid => "not_yet_valid",
            Self::PayloadDecodeError(_) => "payload_decode_error",
            Self::Rejected(_) => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationSettings {
    pub issuer: Option<String>,
    pub audience: Vec<String>,
    pub leeway: Duration,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            issuer: None,
            audience: Vec::new(),
            leeway: Duration::from_secs(30),
        }
    }
}

impl From<&JwtValidationConfig> for ValidationSettings {
    fn from(cfg: &JwtValidationConfig) -> Self {
        Self {
            issuer: cfg.issuer.clone().filter(|s| !s.is_empty()),
            audience: cfg.audience.clone(),
            leeway: cfg.leeway,
        }
    }
}

pub struct TokenValidator {
    keys: Arc<KeyCache>,
    settings: ValidationSettings,
}

impl TokenValidator {
    pub fn new(keys: Arc<KeyCache>, settings: ValidationSettings) -> Self {
        Self { keys, settings }
    }

    pub fn settings(&self) -> &ValidationSettings {
        &self.settings
    }

    /// Verify `token` against the current key snapshot and return its claims.
    /// Every failure is terminal.
    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        let segments: Vec<&str> = token.split('.').collect();
        if segments.len() != 3 {
            return Err(TokenError::MalformedToken(format!(
                "expected 3 segments, found {}",
                segments.len()
            )));
        }

        let header = decode_header_object(segments[0])?;

        if let Some(field) = FORBIDDEN_HEADER_FIELDS
            .iter()
            .find(|f| header.contains_key(**f))
        {
            return Err(TokenError::Rejected(format!(
                "header parameter '{field}' is not accepted"
            )));
        }

        let alg_name = header
            .get("alg")
            .and_then(Value::as_str)
            .ok_or_else(|| TokenError::MalformedToken("header has no alg".into()))?;
        let alg = Algorithm::from_str(alg_name)
            .map_err(|_| TokenError::Rejected(format!("algorithm '{alg_name}' not supported")))?;

        let kid = header.get("kid").and_then(Value::as_str);
        let Some(kid) = kid else {
            return Err(TokenError::UnknownKey(None));
        };

        let keys = self.keys.get();
        let entry = keys
            .get(kid)
            .ok_or_else(|| TokenError::UnknownKey(Some(kid.to_string())))?;

        if let Some(pinned) = entry.algorithm {
            if pinned != alg {
                return Err(TokenError::Rejected(format!(
                    "algorithm {alg:?} does not match key '{kid}' ({pinned:?})"
                )));
            }
        }

        let data = decode::<Claims>(token, &entry.key, &self.validation_for(alg))
            .map_err(|e| map_jwt_error(e.kind()))?;
        Ok(data.claims)
    }

    fn validation_for(&self, alg: Algorithm) -> Validation {
        let mut validation = Validation::new(alg);
        validation.leeway = self.settings.leeway.as_secs();
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_required_spec_claims(&["exp"]);

        if let Some(issuer) = &self.settings.issuer {
            validation.set_issuer(&[issuer]);
        }
        if self.settings.audience.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&self.settings.audience);
        }
        validation
    }
}

fn decode_header_object(segment: &str) -> Result<Map<String, Value>, TokenError> {
    let raw = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| TokenError::MalformedToken(format!("header is not base64url: {e}")))?;
    serde_json::from_slice(&raw)
        .map_err(|e| TokenError::MalformedToken(format!("header is not a JSON object: {e}")))
}

fn map_jwt_error(kind: &ErrorKind) -> TokenError {
    match kind {
        ErrorKind::InvalidSignature => TokenError::InvalidSignature,
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::ImmatureSignature => TokenError::NotYetValid,
        ErrorKind::InvalidToken => TokenError::MalformedToken("invalid token structure".into()),
        ErrorKind::Base64(e) => TokenError::PayloadDecodeError(e.to_string()),
        ErrorKind::Json(e) => TokenError::PayloadDecodeError(e.to_string()),
        ErrorKind::Utf8(e) => TokenError::PayloadDecodeError(e.to_string()),
        ErrorKind::InvalidIssuer => TokenError::Rejected("issuer mismatch".into()),
        ErrorKind::InvalidAudience => TokenError::Rejected("audience mismatch".into()),
        ErrorKind::MissingRequiredClaim(claim) => {
            TokenError::Rejected(format!("missing required claim '{claim}'"))
        }
        ErrorKind::InvalidAlgorithm => {
            TokenError::Rejected("algorithm does not match key type".into())
        }
        other => TokenError::Rejected(format!("{other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_decoding_failures_are_classified() {
        let json_err = serde_json::from_str::<Value>("{").unwrap_err();
        assert!(matches!(
            map_jwt_error(&ErrorKind::Json(Arc::new(json_err))),
            TokenError::PayloadDecodeError(_)
        ));
    }

    #[test]
    fn time_failures_are_classified() {
        assert_eq!(map_jwt_error(&ErrorKind::ExpiredSignature), TokenError::Expired);
        assert_eq!(
            map_jwt_error(&ErrorKind::ImmatureSignature),
            TokenError::NotYetValid
        );
        assert_eq!(
            map_jwt_error(&ErrorKind::InvalidSignature),
            TokenError::InvalidSignature
        );
    }

    #[test]
    fn settings_from_config_drop_empty_issuer() {
        let cfg = JwtValidationConfig {
            issuer: Some(String::new()),
            audience: vec!["toolgate".into()],
            leeway: Duration::from_secs(5),
            ..Default::default()
        };
        let settings = ValidationSettings::from(&cfg);
        assert_eq!(settings.issuer, None);
        assert_eq!(settings.audience, ["toolgate"]);
        assert_eq!(settings.leeway, Duration::from_secs(5));
    }
}

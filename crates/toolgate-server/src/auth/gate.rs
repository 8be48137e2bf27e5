//! Request gate: bearer extraction, token validation and allow-conditions.
//!
//! ```text
//! Unauthenticated -> TokenExtracted -> TokenValidated -> ConditionsChecked -> Authorized
//!        \_________________\_________________\__________________\___________> Denied
//! ```
//!
//! Denials answer 401 with a `WWW-Authenticate` challenge pointing at the
//! protected resource metadata document. Authorized requests carry an
//! [`AuthorizationContext`] extension and no challenge.

use super::validation::{TokenError, TokenValidator};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use toolgate_core::{Claims, Condition, ConditionError};

const DENIAL_PREFIX: &str = "RBAC: Access Denied: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Unauthenticated,
    TokenExtracted,
    TokenValidated,
    ConditionsChecked,
    Authorized,
    Denied,
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unauthenticated => "unauthenticated",
            Self::TokenExtracted => "token_extracted",
            Self::TokenValidated => "token_validated",
            Self::ConditionsChecked => "conditions_checked",
            Self::Authorized => "authorized",
            Self::Denied => "denied",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Signature and claims were checked against the key set.
    Verified,
    /// Enforcement is switched off; nothing was checked.
    Bypassed,
}

/// Per-request authorization result, stored as a request extension.
#[derive(Clone)]
pub struct AuthorizationContext {
    pub token: Option<String>,
    pub claims: Claims,
    pub outcome: ValidationOutcome,
}

impl AuthorizationContext {
    pub fn verified(token: String, claims: Claims) -> Self {
        Self {
            token: Some(token),
            claims,
            outcome: ValidationOutcome::Verified,
        }
    }

    pub fn bypassed() -> Self {
        Self {
            token: None,
            claims: Claims::empty(),
            outcome: ValidationOutcome::Bypassed,
        }
    }

    pub fn is_verified(&self) -> bool {
        self.outcome == ValidationOutcome::Verified
    }

    /// Claims to feed the tool policy engine. A bypassed context has none.
    pub fn policy_claims(&self) -> Option<&Claims> {
        self.is_verified().then_some(&self.claims)
    }
}

impl fmt::Debug for AuthorizationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationContext")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("claims", &self.claims)
            .field("outcome", &self.outcome)
            .finish()
    }
}

#[derive(Debug)]
pub enum DenialReason {
    MissingToken,
    InvalidToken(TokenError),
    ConditionNotMet { index: usize },
    ConditionFailed(ConditionError),
}

impl DenialReason {
    /// Text sent to the caller after the `RBAC: Access Denied: ` prefix.
    fn public_message(&self) -> String {
        match self {
            Self::MissingToken => "Authorization header not found".to_string(),
            Self::InvalidToken(e) => format!("Invalid token: {e}"),
            Self::ConditionNotMet { .. } => "JWT does not meet conditions".to_string(),
            Self::ConditionFailed(_) => "Internal Issue".to_string(),
        }
    }
}

/// A rejected request: the last state reached, why, and the challenge to send.
#[derive(Debug)]
pub struct Denial {
    pub state: GateState,
    pub reason: DenialReason,
    pub challenge: Option<HeaderValue>,
}

impl Denial {
    pub fn body(&self) -> String {
        format!("{DENIAL_PREFIX}{}", self.reason.public_message())
    }
}

impl IntoResponse for Denial {
    fn into_response(self) -> Response {
        let mut response = (
            StatusCode::UNAUTHORIZED,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.body(),
        )
            .into_response();
        if let Some(challenge) = self.challenge {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, challenge);
        }
        response
    }
}

/// Inputs for the `WWW-Authenticate` challenge.
#[derive(Debug, Clone, Default)]
pub struct ChallengeParams {
    pub url_suffix: String,
    pub scopes: Vec<String>,
}

pub struct RequestGate {
    enforcement: Option<Enforcement>,
}

struct Enforcement {
    validator: TokenValidator,
    allow_conditions: Vec<Condition>,
    challenge: ChallengeParams,
}

impl RequestGate {
    pub fn new(
        validator: TokenValidator,
        allow_conditions: Vec<Condition>,
        challenge: ChallengeParams,
    ) -> Self {
        Self {
            enforcement: Some(Enforcement {
                validator,
                allow_conditions,
                challenge,
            }),
        }
    }

    /// Gate that lets everything through with a bypassed context.
    pub fn disabled() -> Self {
        Self { enforcement: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.enforcement.is_some()
    }

    pub fn evaluate(&self, headers: &HeaderMap) -> Result<AuthorizationContext, Denial> {
        let Some(enf) = &self.enforcement else {
            return Ok(AuthorizationContext::bypassed());
        };

        let deny = |state: GateState, reason: DenialReason| Denial {
            state,
            reason,
            challenge: challenge_header(headers, &enf.challenge),
        };

        let Some(token) = extract_bearer_token(headers) else {
            tracing::debug!(state = %GateState::Unauthenticated, "no bearer token on request");
            return Err(deny(GateState::Unauthenticated, DenialReason::MissingToken));
        };

        let claims = match enf.validator.validate(token) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::info!(
                    state = %GateState::TokenExtracted,
                    reason = e.reason(),
                    token_fingerprint = %token_fingerprint(token),
                    error = %e,
                    "token rejected"
                );
                return Err(deny(GateState::TokenExtracted, DenialReason::InvalidToken(e)));
            }
        };

        for (index, condition) in enf.allow_conditions.iter().enumerate() {
            match condition.evaluate(&claims) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::info!(
                        state = %GateState::TokenValidated,
                        condition = index,
                        subject = claims.subject().unwrap_or_default(),
                        token_fingerprint = %token_fingerprint(token),
                        "allow condition not met"
                    );
                    return Err(deny(
                        GateState::TokenValidated,
                        DenialReason::ConditionNotMet { index },
                    ));
                }
                Err(e) => {
                    tracing::error!(
                        state = %GateState::TokenValidated,
                        condition = index,
                        token_fingerprint = %token_fingerprint(token),
                        error = %e,
                        "allow condition evaluation failed"
                    );
                    return Err(deny(
                        GateState::TokenValidated,
                        DenialReason::ConditionFailed(e),
                    ));
                }
            }
        }

        tracing::debug!(
            state = %GateState::Authorized,
            subject = claims.subject().unwrap_or_default(),
            "request authorized"
        );
        Ok(AuthorizationContext::verified(token.to_string(), claims))
    }
}

/// axum middleware; mount with `from_fn_with_state(Arc<RequestGate>, gate_middleware)`.
pub async fn gate_middleware(
    State(gate): State<Arc<RequestGate>>,
    mut req: Request,
    next: Next,
) -> Response {
    match gate.evaluate(req.headers()) {
        Ok(ctx) => {
            req.extensions_mut().insert(ctx);
            next.run(req).await
        }
        Err(denial) => denial.into_response(),
    }
}

/// Bearer token from the `Authorization` header, if any.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// `X-Forwarded-Proto`, then `Forwarded: proto=https`, then plain http.
pub fn request_scheme(headers: &HeaderMap) -> &str {
    if let Some(proto) = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return proto;
    }
    let forwarded_https = headers
        .get(header::FORWARDED)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("proto=https"));
    if forwarded_https {
        "https"
    } else {
        "http"
    }
}

pub fn resource_metadata_url(headers: &HeaderMap, url_suffix: &str) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!(
        "{}://{host}/.well-known/oauth-protected-resource{url_suffix}",
        request_scheme(headers)
    )
}

fn challenge_header(headers: &HeaderMap, params: &ChallengeParams) -> Option<HeaderValue> {
    let value = format!(
        r#"Bearer error="invalid_token", resource_metadata="{}", scope="{}""#,
        resource_metadata_url(headers, &params.url_suffix),
        params.scopes.join(" ")
    );
    match HeaderValue::from_str(&value) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(error = %e, "could not build WWW-Authenticate header");
            None
        }
    }
}

/// Log-safe stand-in for a bearer token.
pub fn token_fingerprint(token: &str) -> String {
    let digest = hex::encode(Sha256::digest(token.as_bytes()));
    format!("sha256:{}", &digest[..16])
}

pub mod gate;
pub mod jwks;
pub mod sensitive_headers;
pub mod validation;

pub use gate::{
    gate_middleware, AuthorizationContext, ChallengeParams, Denial, DenialReason, GateState,
    RequestGate, ValidationOutcome,
};
pub use jwks::{KeyCache, KeyCacheError, KeySet, RefreshTask};
pub use sensitive_headers::{is_sensitive, redact_value, SENSITIVE_HEADER_NAMES};
pub use validation::{TokenError, TokenValidator, ValidationSettings};

use super::Tool;
use crate::auth::{AuthorizationContext, ValidationOutcome};
use async_trait::async_trait;
use serde_json::{json, Value};

/// Reports the caller's verified identity back to them.
pub struct WhoAmI;

#[async_trait]
impl Tool for WhoAmI {
    fn name(&self) -> &str {
        "whoami"
    }

    fn description(&self) -> &str {
        "Return the claims of the token used for this call"
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}, "additionalProperties": false})
    }

    async fn call(&self, _arguments: Value, auth: &AuthorizationContext) -> anyhow::Result<Value> {
        Ok(json!({
            "subject": auth.claims.subject(),
            "verified": auth.outcome == ValidationOutcome::Verified,
            "claims": auth.claims,
        }))
    }
}

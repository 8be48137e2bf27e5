//! Per-tool access policy.
//!
//! Policies are `(condition, allowed_tools)` pairs evaluated in declared order.
//! The first policy whose condition holds decides the outcome: if none of its
//! patterns cover the tool the call is denied, later policies are not
//! consulted.

use crate::claims::Claims;
use crate::condition::{Condition, ConditionError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPolicyConfig {
    pub expression: String,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("no verified claims available for tool '{tool}'")]
    NoClaimsInContext { tool: String },

    #[error("tool '{tool}' denied by policy")]
    PolicyDenied {
        tool: String,
        /// Index of the policy whose condition matched, if any did.
        matched_policy: Option<usize>,
    },
}

impl PolicyError {
    pub fn tool(&self) -> &str {
        match self {
            Self::NoClaimsInContext { tool } | Self::PolicyDenied { tool, .. } => tool,
        }
    }

    /// Caller-facing text placed in the tool result.
    pub fn denial_message(&self) -> String {
        match self {
            Self::NoClaimsInContext { .. } => {
                "Access denied: unable to verify permissions".to_string()
            }
            Self::PolicyDenied { tool, .. } => {
                format!("Access denied: you don't have permission to use '{tool}'")
            }
        }
    }
}

#[derive(Debug)]
pub struct CompiledToolPolicy {
    pub condition: Condition,
    pub allowed_tools: Vec<String>,
}

impl CompiledToolPolicy {
    pub fn covers(&self, tool_name: &str) -> bool {
        self.allowed_tools
            .iter()
            .any(|pattern| matches_tool_pattern(tool_name, pattern))
    }
}

/// Exact name, the universal `*`, or a prefix when the pattern ends in `*`.
pub fn matches_tool_pattern(tool_name: &str, pattern: &str) -> bool {
    if pattern == "*" || pattern == tool_name {
        return true;
    }
    match pattern.strip_suffix('*') {
        Some(prefix) => tool_name.starts_with(prefix),
        None => false,
    }
}

#[derive(Debug, Default)]
pub struct ToolPolicyEngine {
    policies: Vec<CompiledToolPolicy>,
}

impl ToolPolicyEngine {
    /// Compile every policy expression; the first bad expression aborts.
    pub fn compile(configs: &[ToolPolicyConfig]) -> Result<Self, ConditionError> {
        let policies = configs
            .iter()
            .map(|cfg| {
                Ok(CompiledToolPolicy {
                    condition: Condition::compile(&cfg.expression)?,
                    allowed_tools: cfg.allowed_tools.clone(),
                })
            })
            .collect::<Result<Vec<_>, ConditionError>>()?;
        Ok(Self { policies })
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn policies(&self) -> &[CompiledToolPolicy] {
        &self.policies
    }

    pub fn authorize(&self, tool_name: &str, claims: Option<&Claims>) -> bool {
        self.check(tool_name, claims).is_ok()
    }

    pub fn check(&self, tool_name: &str, claims: Option<&Claims>) -> Result<(), PolicyError> {
        // Open by default when nothing is configured.
        if self.policies.is_empty() {
            return Ok(());
        }

        let Some(claims) = claims else {
            tracing::warn!(tool = tool_name, "no claims in context for policy check");
            return Err(PolicyError::NoClaimsInContext {
                tool: tool_name.to_string(),
            });
        };

        for (index, policy) in self.policies.iter().enumerate() {
            match policy.condition.evaluate(claims) {
                Ok(true) => {
                    if policy.covers(tool_name) {
                        tracing::debug!(tool = tool_name, policy = index, "tool allowed");
                        return Ok(());
                    }
                    tracing::warn!(
                        tool = tool_name,
                        policy = index,
                        "tool not covered by first matching policy"
                    );
                    return Err(PolicyError::PolicyDenied {
                        tool: tool_name.to_string(),
                        matched_policy: Some(index),
                    });
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(
                        tool = tool_name,
                        policy = index,
                        error = %e,
                        "policy condition evaluation failed, treating as not matched"
                    );
                }
            }
        }

        tracing::warn!(tool = tool_name, "tool access denied by policy");
        Err(PolicyError::PolicyDenied {
            tool: tool_name.to_string(),
            matched_policy: None,
        })
    }
}

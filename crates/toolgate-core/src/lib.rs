//! Core authorization model for toolgate.
//!
//! Everything here is pure: no network, no clocks, no global state. The server
//! crate feeds verified [`Claims`] in and gets allow/deny decisions out.

pub mod claims;
pub mod condition;
pub mod jsonrpc;
pub mod policy;

pub use claims::Claims;
pub use condition::{Condition, ConditionError};
pub use policy::{
    matches_tool_pattern, CompiledToolPolicy, PolicyError, ToolPolicyConfig, ToolPolicyEngine,
};

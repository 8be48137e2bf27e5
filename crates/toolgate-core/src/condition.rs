//! CEL conditions over token claims.
//!
//! Expressions see exactly one variable, `payload`, bound to the full claims
//! map. Compile once at startup, evaluate per request.

use crate::claims::Claims;
use cel_interpreter::{Context, Program, Value};
use std::fmt;
use thiserror::Error;

/// Name of the single variable exposed to expressions.
pub const PAYLOAD_VARIABLE: &str = "payload";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConditionError {
    #[error("failed to compile expression '{expression}': {message}")]
    Compile { expression: String, message: String },

    #[error("failed to bind claims for '{expression}': {message}")]
    Binding { expression: String, message: String },

    #[error("evaluation of '{expression}' failed: {message}")]
    Evaluation { expression: String, message: String },

    #[error("expression '{expression}' returned {returned}, expected a boolean")]
    NonBoolean {
        expression: String,
        returned: String,
    },
}

impl ConditionError {
    /// True for failures raised while serving a request rather than at startup.
    pub fn is_evaluation_error(&self) -> bool {
        !matches!(self, Self::Compile { .. })
    }
}

/// A compiled boolean predicate plus its source text.
pub struct Condition {
    source: String,
    program: Program,
}

impl Condition {
    pub fn compile(expression: &str) -> Result<Self, ConditionError> {
        let program = Program::compile(expression).map_err(|e| ConditionError::Compile {
            expression: expression.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            source: expression.to_string(),
            program,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against `claims`. Anything but a boolean result is an error,
    /// and callers must treat every error as "not allowed".
    pub fn evaluate(&self, claims: &Claims) -> Result<bool, ConditionError> {
        let mut context = Context::default();
        context
            .add_variable(PAYLOAD_VARIABLE, claims.as_map())
            .map_err(|e| ConditionError::Binding {
                expression: self.source.clone(),
                message: e.to_string(),
            })?;

        match self.program.execute(&context) {
            Ok(Value::Bool(result)) => Ok(result),
            Ok(other) => Err(ConditionError::NonBoolean {
                expression: self.source.clone(),
                returned: format!("{other:?}"),
            }),
            Err(e) => Err(ConditionError::Evaluation {
                expression: self.source.clone(),
                message: e.to_string(),
            }),
        }
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Compile a list of expressions, failing on the first bad one.
pub fn compile_all<'a, I>(expressions: I) -> Result<Vec<Condition>, ConditionError>
where
    I: IntoIterator<Item = &'a str>,
{
    expressions.into_iter().map(Condition::compile).collect()
}

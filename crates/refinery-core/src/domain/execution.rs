//! Outcome of running one candidate against one input.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::grid::Grid;

/// A forbidden operation attempted by candidate code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// Import of a module outside the allow-list.
    DisallowedImport { module: String },
    /// Use of a builtin stripped from the sandbox (`open`, `eval`, ...).
    ForbiddenOperation { name: String },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::DisallowedImport { module } => {
                write!(f, "DisallowedImport: module '{module}' is not allowed")
            }
            Violation::ForbiddenOperation { name } => {
                write!(f, "SandboxViolation: '{name}' is not available in the sandbox")
            }
        }
    }
}

/// Tagged result of one sandbox execution. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResult {
    /// The transform returned a well-formed grid.
    Output { grid: Grid },
    /// The transform returned something that is not a rectangular integer grid.
    InvalidOutput { raw: String, detail: String },
    /// The transform raised.
    RuntimeError { kind: String, message: String },
    /// Wall-clock limit exceeded.
    Timeout { limit_ms: u64 },
    /// Forbidden import or operation.
    SandboxViolation { violation: Violation },
    /// No compilable `transform` could be obtained from the candidate.
    MalformedCandidate { detail: String },
}

impl ExecutionResult {
    pub fn grid(&self) -> Option<&Grid> {
        match self {
            ExecutionResult::Output { grid } => Some(grid),
            _ => None,
        }
    }

    pub fn is_output(&self) -> bool {
        matches!(self, ExecutionResult::Output { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecutionResult::Timeout { .. })
    }

    /// Short machine label, used in logs and reports.
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionResult::Output { .. } => "output",
            ExecutionResult::InvalidOutput { .. } => "invalid_output",
            ExecutionResult::RuntimeError { .. } => "runtime_error",
            ExecutionResult::Timeout { .. } => "timeout",
            ExecutionResult::SandboxViolation { .. } => "sandbox_violation",
            ExecutionResult::MalformedCandidate { .. } => "malformed_candidate",
        }
    }

    /// Human-readable failure description fed back to the generator.
    ///
    /// Returns `None` for `Output`; the feedback builder renders grids itself.
    pub fn failure_message(&self) -> Option<String> {
        match self {
            ExecutionResult::Output { .. } => None,
            ExecutionResult::InvalidOutput { raw, detail } => Some(format!(
                "returned a value that is not a valid grid ({detail}): {raw}"
            )),
            ExecutionResult::RuntimeError { kind, message } => {
                Some(format!("{kind}: {message}"))
            }
            ExecutionResult::Timeout { limit_ms } => {
                Some(format!("Timeout: execution exceeded {limit_ms}ms"))
            }
            ExecutionResult::SandboxViolation { violation } => Some(violation.to_string()),
            ExecutionResult::MalformedCandidate { detail } => {
                Some(format!("MalformedCandidate: {detail}"))
            }
        }
    }
}

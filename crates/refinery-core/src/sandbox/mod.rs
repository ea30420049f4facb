//! Sandbox: isolated execution of untrusted candidate programs.
//!
//! Candidates run in a separate interpreter process behind a serialization
//! boundary, under a hard wall-clock limit and a default-deny import
//! allow-list. Every failure is encoded in [`ExecutionResult`]; nothing here
//! returns an error to the caller.
//!
//! # Modules
//!
//! - [`policy`]: `ImportPolicy` allow-list and static import scan
//! - [`harness`]: interpreter-side harness and its JSON protocol
//! - [`isolation`]: namespaces, read-only mounts and resource limits for each child
//! - [`process`]: `SandboxConfig`, `ProcessSandbox` worker pool
//! - [`budget`]: `TimeoutBudget`, the per-loop cumulative timeout counter

pub mod budget;
pub mod harness;
pub mod isolation;
pub mod policy;
pub mod process;

use async_trait::async_trait;

use crate::domain::{ExecutionResult, Grid};

pub use budget::TimeoutBudget;
pub use policy::{ImportPolicy, DEFAULT_ALLOWED_MODULES};
pub use isolation::{IsolationMode, ResourceLimits};
pub use process::{is_interpreter_available, is_isolation_available, ProcessSandbox, SandboxConfig};

/// Executes a candidate's `transform` on one input.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Run `source` against `input`. Infallible: failures are result variants.
    async fn execute(&self, source: &str, input: &Grid) -> ExecutionResult;
}

//! Single-expert refinement: the generate, execute, score, feedback cycle.
//!
//! # Modules
//!
//! - [`config`]: `RefinementConfig` limits and `ExpertConfig` identity
//! - [`pool`]: `CandidatePool`, the bounded pool each loop owns
//! - [`expert_loop`]: `RefinementLoop` state machine
//! - [`result`]: `ExpertResult` and `TerminationReason`

pub mod config;
pub mod expert_loop;
pub mod pool;
pub mod result;

pub use config::{ExpertConfig, RefinementConfig};
pub use expert_loop::{LoopState, RefinementLoop};
pub use pool::CandidatePool;
pub use result::{ExpertResult, RetainedCandidate, TerminationReason};

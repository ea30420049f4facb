//! Refinery Core Library
//!
//! Iterative, feedback-driven refinement of generated programs, run by
//! independent experts in parallel and reconciled by diversity-first voting.

pub mod backend;
pub mod config;
pub mod domain;
pub mod fakes;
pub mod feedback;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod refinement;
pub mod reporting;
pub mod sandbox;
pub mod scoring;
pub mod telemetry;
pub mod voting;

pub use backend::{
    extract_transform, BackendError, GenerationBackend, GenerationRequest, HttpBackend,
    HttpBackendConfig,
};

pub use config::RefineryConfig;

pub use domain::{
    Candidate, Example, ExecutionResult, Grid, GridError, ProblemError, ProblemSpec,
    RefineryError, Result, Violation,
};

pub use feedback::FeedbackRecord;

pub use metrics::METRICS;

pub use orchestrator::{run_experts, EnsembleResult, Expert, OrchestratorConfig};

pub use refinement::{
    CandidatePool, ExpertConfig, ExpertResult, LoopState, RefinementConfig, RefinementLoop,
    RetainedCandidate, TerminationReason,
};

pub use reporting::{render_summary_md, write_report_json, SolveReport};

pub use sandbox::{
    ImportPolicy, IsolationMode, ProcessSandbox, ResourceLimits, Sandbox, SandboxConfig,
    TimeoutBudget,
};

pub use scoring::{score, ExampleScore, ScoredCandidate};

pub use telemetry::init_tracing;

pub use voting::{vote, Consensus, RankedCandidate, VoteGroup, VotingConfig};

/// Version of the Refinery library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

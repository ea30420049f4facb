//! Generation backends: the external services that write candidate programs.
//!
//! The refinement loop only sees [`GenerationBackend`]. Production code wires
//! in [`http::HttpBackend`]; tests use [`crate::fakes::ScriptedBackend`].

pub mod extract;
pub mod http;
pub mod prompt;

use async_trait::async_trait;

use crate::domain::ProblemSpec;
use crate::feedback::FeedbackRecord;
use crate::refinement::ExpertConfig;

pub use extract::extract_transform;
pub use http::{HttpBackend, HttpBackendConfig};
pub use prompt::render_prompt;

/// Everything a backend may use to produce the next candidate.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub problem: &'a ProblemSpec,
    /// Empty on the first iteration.
    pub feedback: &'a FeedbackRecord,
    pub expert: &'a ExpertConfig,
    /// 1-based iteration number.
    pub iteration: u32,
}

/// Errors produced by a generation backend call.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("backend response contained no message content")]
    EmptyResponse,

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// A service that turns a problem plus feedback into response text.
///
/// The returned text may contain prose around the code; the loop extracts the
/// `transform` definition itself.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Stable identifier used in logs.
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, BackendError>;
}

//! In-memory fakes for the backend and sandbox seams (testing only).
//!
//! Provides `ScriptedBackend` and `FnSandbox`, which satisfy the trait
//! contracts without a network or an interpreter.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{BackendError, GenerationBackend, GenerationRequest};
use crate::domain::{ExecutionResult, Grid};
use crate::sandbox::Sandbox;

// ---------------------------------------------------------------------------
// ScriptedBackend
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Script {
    responses: VecDeque<Result<String, BackendError>>,
    feedback_sizes: Vec<usize>,
}

/// Backend that replays a fixed queue of responses.
///
/// Once the queue is empty every call fails with `Unavailable`. Each call
/// records the size of the feedback it was given.
#[derive(Debug)]
pub struct ScriptedBackend {
    name: String,
    delay: Option<Duration>,
    script: Mutex<Script>,
}

impl ScriptedBackend {
    pub fn new(name: impl Into<String>, responses: Vec<Result<String, BackendError>>) -> Self {
        Self {
            name: name.into(),
            delay: None,
            script: Mutex::new(Script {
                responses: responses.into(),
                feedback_sizes: Vec::new(),
            }),
        }
    }

    /// A backend that always answers with the same text.
    pub fn repeating(name: impl Into<String>, response: &str, times: usize) -> Self {
        Self::new(name, (0..times).map(|_| Ok(response.to_string())).collect())
    }

    /// Sleep this long before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `generate` calls made so far.
    pub fn calls(&self) -> usize {
        self.script.lock().unwrap().feedback_sizes.len()
    }

    /// Feedback entry count seen by each call, in call order.
    pub fn feedback_sizes(&self) -> Vec<usize> {
        self.script.lock().unwrap().feedback_sizes.clone()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, BackendError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut script = self.script.lock().unwrap();
        script.feedback_sizes.push(request.feedback.len());
        script
            .responses
            .pop_front()
            .unwrap_or_else(|| Err(BackendError::Unavailable("script exhausted".to_string())))
    }
}

// ---------------------------------------------------------------------------
// FnSandbox
// ---------------------------------------------------------------------------

type ExecFn = dyn Fn(&str, &Grid) -> ExecutionResult + Send + Sync;

/// Sandbox whose behaviour is a plain closure over `(source, input)`.
pub struct FnSandbox {
    exec: Box<ExecFn>,
}

impl FnSandbox {
    pub fn new<F>(exec: F) -> Self
    where
        F: Fn(&str, &Grid) -> ExecutionResult + Send + Sync + 'static,
    {
        Self {
            exec: Box::new(exec),
        }
    }

    /// Every execution produces `grid`, whatever the input.
    pub fn constant(grid: Grid) -> Self {
        Self::new(move |_, _| ExecutionResult::Output { grid: grid.clone() })
    }
}

impl std::fmt::Debug for FnSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnSandbox").finish_non_exhaustive()
    }
}

#[async_trait]
impl Sandbox for FnSandbox {
    async fn execute(&self, source: &str, input: &Grid) -> ExecutionResult {
        (self.exec)(source, input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Example, ProblemSpec};
    use crate::feedback::FeedbackRecord;
    use crate::refinement::ExpertConfig;

    #[tokio::test]
    async fn test_scripted_backend_replays_then_fails() {
        let grid = Grid::new(vec![vec![1]]).unwrap();
        let problem = ProblemSpec::new(
            "p",
            vec![Example::new(grid.clone(), grid.clone())],
            vec![grid],
        )
        .unwrap();
        let feedback = FeedbackRecord::default();
        let expert = ExpertConfig::named("e");
        let request = GenerationRequest {
            problem: &problem,
            feedback: &feedback,
            expert: &expert,
            iteration: 1,
        };

        let backend = ScriptedBackend::repeating("s", "hello", 1);
        assert_eq!(backend.generate(&request).await.unwrap(), "hello");
        assert!(matches!(
            backend.generate(&request).await,
            Err(BackendError::Unavailable(_))
        ));
        assert_eq!(backend.calls(), 2);
        assert_eq!(backend.feedback_sizes(), vec![0, 0]);
    }

    #[tokio::test]
    async fn test_fn_sandbox_constant() {
        let out = Grid::new(vec![vec![9]]).unwrap();
        let sandbox = FnSandbox::constant(out.clone());
        let result = sandbox.execute("x", &Grid::empty()).await;
        assert_eq!(result.grid(), Some(&out));
    }
}

//! Single-expert refinement loop.
//!
//! `Init → Generating → Executing → Scoring → Feedback → (Generating | Terminated)`
//!
//! Iterations are strictly sequential. The only concurrency inside a loop is
//! the fan-out of one candidate across the training examples during
//! `Executing`.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::backend::{extract_transform, GenerationBackend, GenerationRequest};
use crate::domain::{Candidate, ExecutionResult, ProblemSpec};
use crate::feedback::FeedbackRecord;
use crate::metrics::METRICS;
use crate::obs;
use crate::sandbox::{Sandbox, TimeoutBudget};
use crate::scoring::ScoredCandidate;

use super::config::{ExpertConfig, RefinementConfig};
use super::pool::CandidatePool;
use super::result::{ExpertResult, RetainedCandidate, TerminationReason};

/// Observable position of a loop in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Init,
    Generating,
    Executing,
    Scoring,
    Feedback,
    Terminated,
}

/// One expert's generate/execute/score/feedback cycle over a single problem.
///
/// Owns its pool, feedback and timeout budget outright; nothing here is
/// shared with other loops.
pub struct RefinementLoop {
    problem: Arc<ProblemSpec>,
    expert: ExpertConfig,
    backend: Arc<dyn GenerationBackend>,
    sandbox: Arc<dyn Sandbox>,
    config: RefinementConfig,
    pool: CandidatePool,
    feedback: FeedbackRecord,
    budget: TimeoutBudget,
    state: LoopState,
    iterations: u32,
    passers_found: u32,
    generation_failures: u32,
}

impl RefinementLoop {
    pub fn new(
        problem: Arc<ProblemSpec>,
        expert: ExpertConfig,
        backend: Arc<dyn GenerationBackend>,
        sandbox: Arc<dyn Sandbox>,
        config: RefinementConfig,
    ) -> Self {
        Self {
            pool: CandidatePool::new(config.pool_size),
            budget: TimeoutBudget::new(config.max_total_timeouts),
            problem,
            expert,
            backend,
            sandbox,
            config,
            feedback: FeedbackRecord::default(),
            state: LoopState::Init,
            iterations: 0,
            passers_found: 0,
            generation_failures: 0,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Run to completion with no external cancellation.
    pub async fn run(self) -> ExpertResult {
        let (_tx, rx) = watch::channel(false);
        self.run_until(rx).await
    }

    /// Run until a termination condition holds or `cancel` becomes `true`.
    ///
    /// Cancellation is checked between iterations, so an iteration in flight
    /// always finishes scoring. Test predictions are still computed for the
    /// retained pool. A retry backoff in progress is cut short.
    pub async fn run_until(mut self, mut cancel: watch::Receiver<bool>) -> ExpertResult {
        obs::emit_expert_started(&self.expert.name, self.backend.name(), self.problem.id());

        let termination = loop {
            if self.iterations >= self.config.max_iterations {
                break TerminationReason::MaxIterations;
            }
            let cancelled = *cancel.borrow();
            if cancelled {
                break TerminationReason::Cancelled;
            }

            self.iterations += 1;
            let iteration = self.iterations;

            self.transition(LoopState::Generating);
            let Some(response) = self.generate(iteration, &mut cancel).await else {
                let cancelled = *cancel.borrow();
                break if cancelled {
                    TerminationReason::Cancelled
                } else {
                    TerminationReason::GenerationFailed
                };
            };
            METRICS.inc_candidates_generated();

            self.transition(LoopState::Executing);
            let (candidate, results) = match extract_transform(&response) {
                Some(source) => {
                    let candidate = Candidate::new(&self.expert.name, iteration, source);
                    let results = self.execute_training(&candidate.source).await;
                    (candidate, results)
                }
                None => {
                    debug!(iteration, "response has no transform definition");
                    let results = malformed(self.problem.train().len());
                    (Candidate::new(&self.expert.name, iteration, response), results)
                }
            };

            self.transition(LoopState::Scoring);
            let scored = ScoredCandidate::score(candidate, results, self.problem.train());
            let timeouts = scored.timeouts();
            self.budget.record(timeouts);
            METRICS.add_sandbox_timeouts(u64::from(timeouts));
            if scored.is_passer() {
                self.passers_found += 1;
                METRICS.inc_passers_found();
            }
            obs::emit_candidate_scored(
                &self.expert.name,
                iteration,
                scored.candidate.short_digest(),
                scored.aggregate(),
                scored.is_passer(),
            );

            self.transition(LoopState::Feedback);
            if let Some(evicted) = self.pool.insert(scored) {
                debug!(digest = evicted.candidate.short_digest(), "evicted from pool");
            }
            self.feedback = FeedbackRecord::from_pool(self.pool.entries(), self.problem.train());

            if self.early_success() {
                break TerminationReason::EarlySuccess;
            }
            if self.budget.is_exhausted() {
                break TerminationReason::TimeoutBudgetExhausted;
            }
        };

        self.transition(LoopState::Terminated);
        obs::emit_expert_terminated(&self.expert.name, termination, self.iterations, self.pool.len());
        self.finish(termination).await
    }

    fn transition(&mut self, next: LoopState) {
        debug!(from = ?self.state, to = ?next, "loop state transition");
        self.state = next;
    }

    fn early_success(&self) -> bool {
        match self.config.early_stop_passers {
            Some(n) => n > 0 && self.passers_found >= n,
            None => false,
        }
    }

    /// Ask the backend for the next candidate, retrying with the same feedback.
    async fn generate(
        &mut self,
        iteration: u32,
        cancel: &mut watch::Receiver<bool>,
    ) -> Option<String> {
        let attempts = self.config.generation_attempts.max(1);
        for attempt in 1..=attempts {
            let request = GenerationRequest {
                problem: self.problem.as_ref(),
                feedback: &self.feedback,
                expert: &self.expert,
                iteration,
            };
            match self.backend.generate(&request).await {
                Ok(text) => return Some(text),
                Err(err) => {
                    self.generation_failures += 1;
                    METRICS.inc_generation_failures();
                    warn!(iteration, attempt, attempts, error = %err, "generation failed");
                    if attempt < attempts && !self.wait_backoff(attempt, cancel).await {
                        debug!(iteration, attempt, "retry abandoned on cancellation");
                        return None;
                    }
                }
            }
        }
        None
    }

    /// Sleep out the retry delay. Returns `false` if cancelled first.
    async fn wait_backoff(&self, attempt: u32, cancel: &mut watch::Receiver<bool>) -> bool {
        let cancelled = *cancel.borrow();
        if cancelled {
            return false;
        }
        let delay = tokio::time::sleep(self.backoff(attempt));
        tokio::pin!(delay);
        loop {
            tokio::select! {
                _ = &mut delay => return true,
                changed = cancel.changed() => match changed {
                    Ok(()) if *cancel.borrow() => return false,
                    Ok(()) => continue,
                    // Sender gone: nobody can cancel any more.
                    Err(_) => {
                        (&mut delay).await;
                        return true;
                    }
                },
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << (attempt - 1).min(16);
        Duration::from_millis(self.config.retry_backoff_ms.saturating_mul(factor))
    }

    /// Every training example is attempted independently.
    async fn execute_training(&self, source: &str) -> Vec<ExecutionResult> {
        let runs = self
            .problem
            .train()
            .iter()
            .map(|example| self.sandbox.execute(source, &example.input));
        let results = join_all(runs).await;
        METRICS.add_sandbox_executions(results.len() as u64);
        results
    }

    async fn finish(self, termination: TerminationReason) -> ExpertResult {
        let tests = self.problem.test_inputs();
        let mut candidates = Vec::with_capacity(self.pool.len());
        for scored in self.pool.into_entries() {
            let predictions = if is_malformed(&scored) {
                malformed(tests.len())
            } else {
                let runs = tests
                    .iter()
                    .map(|input| self.sandbox.execute(&scored.candidate.source, input));
                let predictions = join_all(runs).await;
                METRICS.add_sandbox_executions(predictions.len() as u64);
                predictions
            };
            candidates.push(RetainedCandidate {
                scored,
                predictions,
            });
        }

        ExpertResult {
            expert: self.expert.name,
            candidates,
            termination,
            iterations: self.iterations,
            timeouts: self.budget.used(),
            generation_failures: self.generation_failures,
        }
    }
}

fn malformed(count: usize) -> Vec<ExecutionResult> {
    vec![
        ExecutionResult::MalformedCandidate {
            detail: "response contains no `def transform` definition".to_string(),
        };
        count
    ]
}

fn is_malformed(scored: &ScoredCandidate) -> bool {
    !scored.scores.is_empty()
        && scored
            .scores
            .iter()
            .all(|s| matches!(s.result, ExecutionResult::MalformedCandidate { .. }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use crate::domain::{Example, Grid};
    use crate::fakes::{FnSandbox, ScriptedBackend};

    fn g(rows: Vec<Vec<i64>>) -> Grid {
        Grid::new(rows).unwrap()
    }

    fn problem() -> Arc<ProblemSpec> {
        Arc::new(
            ProblemSpec::new(
                "p1",
                vec![
                    Example::new(g(vec![vec![1]]), g(vec![vec![2]])),
                    Example::new(g(vec![vec![3]]), g(vec![vec![4]])),
                ],
                vec![g(vec![vec![5]])],
            )
            .unwrap(),
        )
    }

    /// Sources containing "good" add one to every cell; "bad" echoes input.
    fn sandbox() -> Arc<dyn Sandbox> {
        Arc::new(FnSandbox::new(|source: &str, input: &Grid| {
            if source.contains("good") {
                let rows = input
                    .rows()
                    .iter()
                    .map(|r| r.iter().map(|c| c + 1).collect())
                    .collect();
                ExecutionResult::Output { grid: g(rows) }
            } else {
                ExecutionResult::Output {
                    grid: input.clone(),
                }
            }
        }))
    }

    fn code(tag: &str) -> Result<String, BackendError> {
        Ok(format!("```python\ndef transform(grid):\n    # {tag}\n    return grid\n```"))
    }

    fn config() -> RefinementConfig {
        RefinementConfig {
            retry_backoff_ms: 0,
            ..RefinementConfig::default()
        }
    }

    #[tokio::test]
    async fn test_early_success_on_first_passer() {
        let backend = Arc::new(ScriptedBackend::new(
            "scripted",
            vec![code("bad"), code("good"), code("bad")],
        ));
        let lp = RefinementLoop::new(problem(), ExpertConfig::named("e1"), backend.clone(), sandbox(), config());
        let result = lp.run().await;

        assert_eq!(result.termination, TerminationReason::EarlySuccess);
        assert_eq!(result.iterations, 2);
        assert_eq!(result.candidates.len(), 2);
        assert_eq!(result.passers().count(), 1);
        let passer = result.passers().next().unwrap();
        assert_eq!(passer.predicted_grids(), vec![Some(g(vec![vec![6]]))]);
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_feedback_grows_between_iterations() {
        let backend = Arc::new(ScriptedBackend::new("scripted", vec![code("bad"), code("bad")]));
        let cfg = RefinementConfig {
            max_iterations: 2,
            ..config()
        };
        let result = RefinementLoop::new(problem(), ExpertConfig::named("e1"), backend.clone(), sandbox(), cfg)
            .run()
            .await;

        assert_eq!(result.termination, TerminationReason::MaxIterations);
        assert_eq!(backend.feedback_sizes(), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_malformed_response_is_scored_zero() {
        let backend = Arc::new(ScriptedBackend::new(
            "scripted",
            vec![Ok("I could not find a pattern.".to_string())],
        ));
        let cfg = RefinementConfig {
            max_iterations: 1,
            ..config()
        };
        let result = RefinementLoop::new(problem(), ExpertConfig::named("e1"), backend, sandbox(), cfg)
            .run()
            .await;

        assert_eq!(result.candidates.len(), 1);
        let only = &result.candidates[0];
        assert_eq!(only.training_score(), 0.0);
        assert!(matches!(
            only.predictions[0],
            ExecutionResult::MalformedCandidate { .. }
        ));
    }

    #[tokio::test]
    async fn test_retry_recovers_within_attempts() {
        let backend = Arc::new(ScriptedBackend::new(
            "scripted",
            vec![Err(BackendError::Unavailable("503".into())), code("good")],
        ));
        let result = RefinementLoop::new(problem(), ExpertConfig::named("e1"), backend, sandbox(), config())
            .run()
            .await;

        assert_eq!(result.termination, TerminationReason::EarlySuccess);
        assert_eq!(result.generation_failures, 1);
        assert_eq!(result.iterations, 1);
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let backend = Arc::new(ScriptedBackend::new("scripted", vec![code("bad")]));
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let result = RefinementLoop::new(problem(), ExpertConfig::named("e1"), backend.clone(), sandbox(), config())
            .run_until(rx)
            .await;

        assert_eq!(result.termination, TerminationReason::Cancelled);
        assert!(result.candidates.is_empty());
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_retry_backoff() {
        let backend = Arc::new(ScriptedBackend::new(
            "scripted",
            vec![Err(BackendError::Unavailable("503".into())), code("good")],
        ));
        let cfg = RefinementConfig {
            retry_backoff_ms: 60_000,
            ..config()
        };
        let (tx, rx) = watch::channel(false);
        let lp = RefinementLoop::new(problem(), ExpertConfig::named("e1"), backend.clone(), sandbox(), cfg);
        let handle = tokio::spawn(lp.run_until(rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("backoff should not outlive cancellation")
            .unwrap();

        assert_eq!(result.termination, TerminationReason::Cancelled);
        assert_eq!(result.generation_failures, 1);
        assert_eq!(backend.calls(), 1);
        assert!(result.candidates.is_empty());
    }

    #[tokio::test]
    async fn test_zero_iterations_terminates_immediately() {
        let backend = Arc::new(ScriptedBackend::new("scripted", vec![]));
        let cfg = RefinementConfig {
            max_iterations: 0,
            ..config()
        };
        let result = RefinementLoop::new(problem(), ExpertConfig::named("e1"), backend, sandbox(), cfg)
            .run()
            .await;
        assert_eq!(result.termination, TerminationReason::MaxIterations);
        assert_eq!(result.iterations, 0);
    }

    #[test]
    fn test_backoff_doubles() {
        let backend = Arc::new(ScriptedBackend::new("scripted", vec![]));
        let lp = RefinementLoop::new(
            problem(),
            ExpertConfig::named("e1"),
            backend,
            sandbox(),
            RefinementConfig::default(),
        );
        assert_eq!(lp.state(), LoopState::Init);
        assert_eq!(lp.backoff(1), Duration::from_millis(500));
        assert_eq!(lp.backoff(2), Duration::from_millis(1000));
    }
}

//! Multi-expert orchestration.
//!
//! Each expert runs its own [`RefinementLoop`] in a spawned task. Loops share
//! nothing but the sandbox worker pool. A global wall-clock budget cancels
//! loops cooperatively; cancelled loops still contribute their partial pools.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tracing::{instrument, warn, Instrument};

use crate::backend::GenerationBackend;
use crate::domain::ProblemSpec;
use crate::obs;
use crate::refinement::{
    ExpertConfig, ExpertResult, RefinementConfig, RefinementLoop, TerminationReason,
};
use crate::sandbox::Sandbox;

/// One expert: identity plus the backend it generates with.
#[derive(Clone)]
pub struct Expert {
    pub config: ExpertConfig,
    pub backend: Arc<dyn GenerationBackend>,
}

impl Expert {
    pub fn new(config: ExpertConfig, backend: Arc<dyn GenerationBackend>) -> Self {
        Self { config, backend }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }
}

impl std::fmt::Debug for Expert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Expert")
            .field("config", &self.config)
            .field("backend", &self.backend.name())
            .finish()
    }
}

/// Configuration for an ensemble run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum number of loops running at once.
    pub max_concurrent_experts: usize,
    /// Global wall-clock budget in milliseconds. `None` waits for every loop.
    pub wall_clock_budget_ms: Option<u64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_experts: 8,
            wall_clock_budget_ms: None,
        }
    }
}

/// Every expert's result, in the order the experts were given.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnsembleResult {
    pub problem_id: String,
    pub experts: Vec<ExpertResult>,
    pub elapsed_ms: u64,
    /// The wall-clock budget ran out and in-flight loops were cancelled.
    pub budget_exhausted: bool,
}

impl EnsembleResult {
    /// Experts that retained at least one candidate.
    pub fn contributing(&self) -> usize {
        self.experts.iter().filter(|e| !e.candidates.is_empty()).count()
    }

    pub fn total_passers(&self) -> usize {
        self.experts.iter().map(|e| e.passers().count()).sum()
    }
}

/// Run every expert's loop concurrently and collect all results.
///
/// Never fails as a whole: an expert whose task dies is reported as an empty
/// result with [`TerminationReason::Aborted`].
#[instrument(skip_all, fields(problem = %problem.id(), experts = experts.len()))]
pub async fn run_experts(
    problem: Arc<ProblemSpec>,
    experts: Vec<Expert>,
    sandbox: Arc<dyn Sandbox>,
    refinement: &RefinementConfig,
    config: &OrchestratorConfig,
) -> EnsembleResult {
    let started = Instant::now();
    let (cancel_tx, cancel_rx) = watch::channel(false);

    // Semaphore enforces max_concurrent_experts
    let sem = Arc::new(Semaphore::new(config.max_concurrent_experts.max(1)));

    let names: Vec<String> = experts.iter().map(|e| e.name().to_string()).collect();
    let mut tasks = Vec::with_capacity(experts.len());

    for expert in experts {
        let problem = Arc::clone(&problem);
        let sandbox = Arc::clone(&sandbox);
        let sem = Arc::clone(&sem);
        let cancel = cancel_rx.clone();
        let refinement = refinement.clone();
        let span = obs::expert_span(expert.name());

        let task = tokio::spawn(
            async move {
                let _permit = sem.acquire_owned().await.ok();
                RefinementLoop::new(problem, expert.config, expert.backend, sandbox, refinement)
                    .run_until(cancel)
                    .await
            }
            .instrument(span),
        );
        tasks.push(task);
    }

    let mut joined = Box::pin(join_all(tasks));
    let mut budget_exhausted = false;
    let outcomes = match config.wall_clock_budget_ms {
        Some(budget_ms) => {
            match tokio::time::timeout(Duration::from_millis(budget_ms), &mut joined).await {
                Ok(outcomes) => outcomes,
                Err(_) => {
                    warn!(budget_ms, "wall-clock budget exhausted, cancelling experts");
                    budget_exhausted = true;
                    let _ = cancel_tx.send(true);
                    joined.await
                }
            }
        }
        None => joined.await,
    };

    let experts: Vec<ExpertResult> = outcomes
        .into_iter()
        .zip(names)
        .map(|(outcome, name)| match outcome {
            Ok(result) => result,
            Err(e) => {
                obs::emit_expert_aborted(&name, &e);
                ExpertResult::empty(name, TerminationReason::Aborted)
            }
        })
        .collect();

    let result = EnsembleResult {
        problem_id: problem.id().to_string(),
        experts,
        elapsed_ms: started.elapsed().as_millis() as u64,
        budget_exhausted,
    };
    obs::emit_ensemble_finished(result.experts.len(), result.contributing(), result.elapsed_ms);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orchestrator_config_default() {
        let cfg = OrchestratorConfig::default();
        assert_eq!(cfg.max_concurrent_experts, 8);
        assert!(cfg.wall_clock_budget_ms.is_none());
    }

    #[test]
    fn test_orchestrator_config_partial_toml() {
        let cfg: OrchestratorConfig = toml::from_str("wall_clock_budget_ms = 60000\n").unwrap();
        assert_eq!(cfg.wall_clock_budget_ms, Some(60_000));
        assert_eq!(cfg.max_concurrent_experts, 8);
    }
}

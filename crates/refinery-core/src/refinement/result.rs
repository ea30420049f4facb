//! Terminal output of one refinement loop.

use serde::{Deserialize, Serialize};

use crate::domain::{ExecutionResult, Grid};
use crate::scoring::ScoredCandidate;

/// Why a loop stopped. Every reason is a normal return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    MaxIterations,
    TimeoutBudgetExhausted,
    EarlySuccess,
    GenerationFailed,
    Cancelled,
    /// The expert's task died before returning; its pool is lost.
    Aborted,
}

/// A retained candidate with its predictions on the test inputs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetainedCandidate {
    pub scored: ScoredCandidate,
    /// One per test input, in order. Never scored: ground truth is unknown.
    pub predictions: Vec<ExecutionResult>,
}

impl RetainedCandidate {
    pub fn is_passer(&self) -> bool {
        self.scored.is_passer()
    }

    pub fn training_score(&self) -> f64 {
        self.scored.aggregate()
    }

    /// Predicted grids; failed predictions are `None`.
    pub fn predicted_grids(&self) -> Vec<Option<Grid>> {
        self.predictions.iter().map(|p| p.grid().cloned()).collect()
    }
}

/// Everything one expert contributes to the vote.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpertResult {
    pub expert: String,
    /// Retained pool in insertion order.
    pub candidates: Vec<RetainedCandidate>,
    pub termination: TerminationReason,
    pub iterations: u32,
    pub timeouts: u32,
    pub generation_failures: u32,
}

impl ExpertResult {
    /// An expert that contributes nothing.
    pub fn empty(expert: impl Into<String>, termination: TerminationReason) -> Self {
        Self {
            expert: expert.into(),
            candidates: Vec::new(),
            termination,
            iterations: 0,
            timeouts: 0,
            generation_failures: 0,
        }
    }

    pub fn passers(&self) -> impl Iterator<Item = &RetainedCandidate> {
        self.candidates.iter().filter(|c| c.is_passer())
    }

    /// Highest training score; earliest wins ties.
    pub fn best(&self) -> Option<&RetainedCandidate> {
        self.candidates.iter().fold(None, |best, c| match best {
            Some(b) if b.training_score() >= c.training_score() => Some(b),
            _ => Some(c),
        })
    }
}

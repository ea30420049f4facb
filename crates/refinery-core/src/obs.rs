//! Structured lifecycle events for experts, ensembles and the vote.
//!
//! Events are emitted at `info!` level with an `event` field naming them.
//! Filter with `RUST_LOG`; pass `--json` to the CLI for JSON lines.

use tracing::info;

use crate::refinement::TerminationReason;

/// Span that an expert's future is instrumented with.
///
/// Everything logged inside the loop (backend calls, sandbox failures,
/// state transitions) carries the expert name.
///
/// ```ignore
/// RefinementLoop::new(..).run().instrument(expert_span("e1")).await;
/// ```
pub fn expert_span(expert: &str) -> tracing::Span {
    tracing::info_span!("refinery.expert", expert = %expert)
}

pub fn emit_expert_started(expert: &str, backend: &str, problem: &str) {
    info!(event = "expert.started", expert = %expert, backend = %backend, problem = %problem);
}

/// Emit event: one candidate finished scoring on every training example.
pub fn emit_candidate_scored(
    expert: &str,
    iteration: u32,
    digest: &str,
    aggregate: f64,
    passer: bool,
) {
    info!(
        event = "candidate.scored",
        expert = %expert,
        iteration = iteration,
        digest = %digest,
        aggregate = aggregate,
        passer = passer,
    );
}

pub fn emit_expert_terminated(
    expert: &str,
    reason: TerminationReason,
    iterations: u32,
    retained: usize,
) {
    info!(
        event = "expert.terminated",
        expert = %expert,
        reason = ?reason,
        iterations = iterations,
        retained = retained,
    );
}

/// Emit event: every expert has returned (or been cancelled).
pub fn emit_ensemble_finished(experts: usize, contributing: usize, duration_ms: u64) {
    info!(
        event = "ensemble.finished",
        experts = experts,
        contributing = contributing,
        duration_ms = duration_ms,
    );
}

pub fn emit_consensus_ranked(groups: usize, passer_groups: usize, top_votes: usize) {
    info!(
        event = "consensus.ranked",
        groups = groups,
        passer_groups = passer_groups,
        top_votes = top_votes,
    );
}

/// Emit event: an expert's task ended abnormally (warning level).
pub fn emit_expert_aborted(expert: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "expert.aborted", expert = %expert, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expert_span_create() {
        let span = expert_span("e1");
        let _entered = span.enter();
        emit_expert_started("e1", "scripted", "p1");
    }
}

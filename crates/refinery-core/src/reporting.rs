use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::domain::{Grid, ProblemSpec};
use crate::orchestrator::EnsembleResult;
use crate::refinement::TerminationReason;
use crate::voting::Consensus;

pub const REPORT_SCHEMA_VERSION: &str = "1";

/// Per-expert line in the solve report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExpertSummary {
    pub name: String,
    pub termination: TerminationReason,
    pub iterations: u32,
    pub retained: usize,
    pub passers: usize,
    pub best_score: Option<f64>,
    pub timeouts: u32,
    pub generation_failures: u32,
}

/// One final answer in the solve report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnswerArtifact {
    pub rank: usize,
    pub expert: String,
    pub passer: bool,
    pub votes: usize,
    pub training_score: f64,
    pub source_digest: String,
    pub source: String,
    /// One per test input; `None` where the prediction failed.
    pub predictions: Vec<Option<Grid>>,
}

/// Canonical artifact written after a solve.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SolveReport {
    pub schema_version: String,
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub problem_id: String,
    pub problem_digest: String,
    pub elapsed_ms: u64,
    pub budget_exhausted: bool,
    /// The top answer passed every training example.
    pub confident: bool,
    pub experts: Vec<ExpertSummary>,
    pub answers: Vec<AnswerArtifact>,
}

impl SolveReport {
    pub fn build(
        problem: &ProblemSpec,
        ensemble: &EnsembleResult,
        consensus: &Consensus,
    ) -> Result<Self> {
        let problem_digest = problem.digest().context("digest problem")?;

        let experts = ensemble
            .experts
            .iter()
            .map(|e| ExpertSummary {
                name: e.expert.clone(),
                termination: e.termination,
                iterations: e.iterations,
                retained: e.candidates.len(),
                passers: e.passers().count(),
                best_score: e.best().map(|c| c.training_score()),
                timeouts: e.timeouts,
                generation_failures: e.generation_failures,
            })
            .collect();

        let answers = consensus
            .answers()
            .iter()
            .map(|a| AnswerArtifact {
                rank: a.rank,
                expert: a.expert.clone(),
                passer: a.passer,
                votes: a.votes,
                training_score: a.candidate.training_score(),
                source_digest: a.candidate.scored.candidate.source_digest.clone(),
                source: a.candidate.scored.candidate.source.clone(),
                predictions: a.predictions(),
            })
            .collect();

        Ok(Self {
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            problem_id: problem.id().to_string(),
            problem_digest,
            elapsed_ms: ensemble.elapsed_ms,
            budget_exhausted: ensemble.budget_exhausted,
            confident: consensus.confident(),
            experts,
            answers,
        })
    }
}

/// Write the solve report in pretty JSON format.
pub fn write_report_json(path: &Path, report: &SolveReport) -> Result<()> {
    let content = serde_json::to_string_pretty(report).context("serialize solve report")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Render a markdown summary of a solve.
pub fn render_summary_md(report: &SolveReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Solve Summary: {}\n\n", report.problem_id));
    out.push_str(&format!(
        "- confident: {}\n- elapsed: {} ms\n- budget exhausted: {}\n\n",
        if report.confident { "yes" } else { "no" },
        report.elapsed_ms,
        report.budget_exhausted
    ));

    out.push_str("## Experts\n");
    out.push_str("| expert | termination | iterations | retained | passers | best score |\n");
    out.push_str("|---|---|---|---|---|---|\n");
    for e in &report.experts {
        let best = e
            .best_score
            .map(|s| format!("{s:.3}"))
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "| {} | {:?} | {} | {} | {} | {} |\n",
            e.name, e.termination, e.iterations, e.retained, e.passers, best
        ));
    }
    out.push('\n');

    out.push_str("## Answers\n");
    if report.answers.is_empty() {
        out.push_str("_no candidates were retained_\n");
        return out;
    }
    for a in &report.answers {
        out.push_str(&format!(
            "### #{} from {} ({}, {} vote{}, training score {:.3})\n",
            a.rank,
            a.expert,
            if a.passer { "passer" } else { "non-passer" },
            a.votes,
            if a.votes == 1 { "" } else { "s" },
            a.training_score
        ));
        for (i, prediction) in a.predictions.iter().enumerate() {
            match prediction {
                Some(grid) => out.push_str(&format!("Test {}:\n```\n{}\n```\n", i + 1, grid)),
                None => out.push_str(&format!("Test {}: prediction failed\n", i + 1)),
            }
        }
    }
    out
}

/// Write the markdown summary.
pub fn write_summary_md(path: &Path, report: &SolveReport) -> Result<()> {
    std::fs::write(path, render_summary_md(report)).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

//! Grounded feedback: a faithful rendering of what past candidates did.
//!
//! Candidates are presented worst first and best last so the strongest known
//! attempt is the most recent thing a generator reads before the next
//! request. Scores are rendered as computed, never summarized.

use std::fmt::Write;

use serde::Serialize;

use crate::domain::{Example, ExecutionResult, Grid};
use crate::scoring::{ExampleScore, ScoredCandidate};

/// Ranked history of retained candidates, ascending by aggregate score.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedbackRecord {
    entries: Vec<ScoredCandidate>,
    expected: Vec<Grid>,
}

impl FeedbackRecord {
    /// Build from the retained pool (in insertion order).
    ///
    /// The sort is stable, so equal aggregates keep their pool order.
    pub fn from_pool(pool: &[ScoredCandidate], train: &[Example]) -> Self {
        let mut entries = pool.to_vec();
        entries.sort_by(|a, b| a.aggregate().total_cmp(&b.aggregate()));
        Self {
            entries,
            expected: train.iter().map(|e| e.output.clone()).collect(),
        }
    }

    pub fn entries(&self) -> &[ScoredCandidate] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render every entry: source, aggregate, per-example outcome.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let total = self.entries.len();
        for (i, entry) in self.entries.iter().enumerate() {
            let _ = writeln!(
                out,
                "<attempt {} of {}> training score {:.3}{}",
                i + 1,
                total,
                entry.aggregate(),
                if entry.is_passer() { " (passes all examples)" } else { "" }
            );
            let _ = writeln!(out, "```python\n{}\n```", entry.candidate.source.trim_end());
            for score in &entry.scores {
                self.render_example(&mut out, score);
            }
            out.push('\n');
        }
        out
    }

    fn render_example(&self, out: &mut String, score: &ExampleScore) {
        let n = score.example + 1;
        if score.passed() {
            let _ = writeln!(out, "Example {n}: passed");
            return;
        }

        match &score.result {
            ExecutionResult::Output { grid } => {
                let _ = writeln!(out, "Example {n}: wrong output (score {:.3})", score.score);
                if let Some(expected) = self.expected.get(score.example) {
                    render_mismatch(out, expected, grid);
                }
            }
            other => {
                let message = other.failure_message().unwrap_or_default();
                let _ = writeln!(out, "Example {n}: failed: {message}");
            }
        }
    }
}

fn render_mismatch(out: &mut String, expected: &Grid, actual: &Grid) {
    let (eh, ew) = expected.shape();
    let (ah, aw) = actual.shape();
    let _ = writeln!(out, "  expected ({eh}x{ew}):\n{}", indent(&expected.to_string()));
    let _ = writeln!(out, "  actual ({ah}x{aw}):\n{}", indent(&actual.to_string()));

    if (eh, ew) != (ah, aw) {
        let _ = writeln!(out, "  shape mismatch: expected {eh}x{ew}, got {ah}x{aw}");
        return;
    }

    let _ = writeln!(out, "  diff (expected/actual where they differ):");
    for (e_row, a_row) in expected.rows().iter().zip(actual.rows()) {
        let cells: Vec<String> = e_row
            .iter()
            .zip(a_row)
            .map(|(e, a)| if e == a { e.to_string() } else { format!("{e}/{a}") })
            .collect();
        let _ = writeln!(out, "    {}", cells.join(" "));
    }
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|l| format!("    {l}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Candidate;

    fn g(rows: Vec<Vec<i64>>) -> Grid {
        Grid::new(rows).unwrap()
    }

    fn train() -> Vec<Example> {
        vec![
            Example::new(g(vec![vec![0, 0]]), g(vec![vec![1, 1]])),
            Example::new(g(vec![vec![0, 1]]), g(vec![vec![1, 0]])),
        ]
    }

    fn scored(tag: &str, results: Vec<ExecutionResult>) -> ScoredCandidate {
        ScoredCandidate::score(
            Candidate::new("e", 1, format!("def transform(g):\n    # {tag}\n    return g\n")),
            results,
            &train(),
        )
    }

    fn out(rows: Vec<Vec<i64>>) -> ExecutionResult {
        ExecutionResult::Output { grid: g(rows) }
    }

    #[test]
    fn test_orders_worst_to_best_with_stable_ties() {
        let best = scored("best", vec![out(vec![vec![1, 1]]), out(vec![vec![1, 0]])]);
        let tie_a = scored("tie_a", vec![out(vec![vec![1, 1]]), ExecutionResult::Timeout { limit_ms: 5 }]);
        let worst = scored(
            "worst",
            vec![ExecutionResult::Timeout { limit_ms: 5 }, ExecutionResult::Timeout { limit_ms: 5 }],
        );
        let tie_b = scored("tie_b", vec![ExecutionResult::Timeout { limit_ms: 5 }, out(vec![vec![1, 0]])]);

        let record = FeedbackRecord::from_pool(
            &[best.clone(), tie_a.clone(), worst.clone(), tie_b.clone()],
            &train(),
        );
        let order: Vec<_> = record.entries().iter().map(|e| e.candidate.id).collect();
        assert_eq!(
            order,
            vec![worst.candidate.id, tie_a.candidate.id, tie_b.candidate.id, best.candidate.id]
        );
        for pair in record.entries().windows(2) {
            assert!(pair[0].aggregate() <= pair[1].aggregate());
        }
    }

    #[test]
    fn test_render_places_best_last() {
        let best = scored("best", vec![out(vec![vec![1, 1]]), out(vec![vec![1, 0]])]);
        let worst = scored("worst", vec![out(vec![vec![0, 0]]), out(vec![vec![0, 0]])]);
        let text = FeedbackRecord::from_pool(&[best, worst], &train()).render();
        let w = text.find("# worst").unwrap();
        let b = text.find("# best").unwrap();
        assert!(w < b);
        assert!(text.contains("(passes all examples)"));
    }

    #[test]
    fn test_render_includes_diff_and_errors() {
        let c = scored(
            "c",
            vec![
                out(vec![vec![1, 0]]),
                ExecutionResult::RuntimeError {
                    kind: "IndexError".into(),
                    message: "list index out of range".into(),
                },
            ],
        );
        let text = FeedbackRecord::from_pool(&[c], &train()).render();
        assert!(text.contains("Example 1: wrong output"));
        assert!(text.contains("1 1/0"));
        assert!(text.contains("Example 2: failed: IndexError: list index out of range"));
    }

    #[test]
    fn test_render_shape_mismatch() {
        let c = scored("c", vec![out(vec![vec![1], vec![1]]), out(vec![vec![1, 0]])]);
        let text = FeedbackRecord::from_pool(&[c], &train()).render();
        assert!(text.contains("shape mismatch: expected 1x2, got 2x1"));
        assert!(text.contains("Example 2: passed"));
    }

    #[test]
    fn test_empty_record() {
        let record = FeedbackRecord::default();
        assert!(record.is_empty());
        assert_eq!(record.render(), "");
    }
}

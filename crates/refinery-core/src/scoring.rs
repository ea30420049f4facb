//! Partial-credit scoring of candidate output against expected grids.
//!
//! `score = SHAPE_WEIGHT * shape + CELL_WEIGHT * cells`, where `shape` gives
//! half credit per matching dimension and `cells` is the fraction of equal
//! cells in the overlapping region over the larger of the two grids. Exact
//! equality always scores 1.0; anything else stays strictly below it.

use serde::Serialize;

use crate::domain::{Candidate, Example, ExecutionResult, Grid};

/// Weight of the dimension match component.
pub const SHAPE_WEIGHT: f64 = 0.25;
/// Weight of the per-cell agreement component.
pub const CELL_WEIGHT: f64 = 0.75;

/// Largest aggregate a non-passing candidate may carry.
const BELOW_PERFECT: f64 = 1.0 - f64::EPSILON;

/// Score `actual` against `expected`, in `[0, 1]`.
///
/// Pure and total: mismatched or degenerate shapes degrade to a floor, never
/// panic.
pub fn score(actual: &Grid, expected: &Grid) -> f64 {
    if actual == expected {
        return 1.0;
    }
    if actual.is_empty() || expected.is_empty() {
        return 0.0;
    }

    let (ah, aw) = actual.shape();
    let (eh, ew) = expected.shape();

    let mut shape = 0.0;
    if ah == eh {
        shape += 0.5;
    }
    if aw == ew {
        shape += 0.5;
    }

    let mut equal = 0usize;
    for (a_row, e_row) in actual.rows().iter().zip(expected.rows()) {
        equal += a_row
            .iter()
            .zip(e_row)
            .filter(|(a, e)| a == e)
            .count();
    }
    let cells = equal as f64 / actual.cell_count().max(expected.cell_count()) as f64;

    (SHAPE_WEIGHT * shape + CELL_WEIGHT * cells).clamp(0.0, BELOW_PERFECT)
}

/// Score an execution outcome. Every failure variant scores 0.0.
pub fn score_result(result: &ExecutionResult, expected: &Grid) -> f64 {
    match result.grid() {
        Some(grid) => score(grid, expected),
        None => 0.0,
    }
}

/// Score of one candidate on one training example.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExampleScore {
    /// Index into the problem's training examples.
    pub example: usize,
    pub score: f64,
    pub result: ExecutionResult,
}

impl ExampleScore {
    pub fn passed(&self) -> bool {
        self.score == 1.0
    }
}

/// A candidate with its per-example scores, computed once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub scores: Vec<ExampleScore>,
    aggregate: f64,
}

impl ScoredCandidate {
    /// Score `results` (one per training example, same order) for `candidate`.
    pub fn score(candidate: Candidate, results: Vec<ExecutionResult>, train: &[Example]) -> Self {
        let scores: Vec<ExampleScore> = results
            .into_iter()
            .zip(train)
            .enumerate()
            .map(|(index, (result, example))| ExampleScore {
                example: index,
                score: score_result(&result, &example.output),
                result,
            })
            .collect();
        let aggregate = aggregate(&scores);
        Self {
            candidate,
            scores,
            aggregate,
        }
    }

    /// Mean training score; exactly 1.0 if and only if every example passed.
    pub fn aggregate(&self) -> f64 {
        self.aggregate
    }

    /// Perfect on every training example.
    pub fn is_passer(&self) -> bool {
        self.aggregate == 1.0
    }

    pub fn timeouts(&self) -> u32 {
        self.scores.iter().filter(|s| s.result.is_timeout()).count() as u32
    }
}

fn aggregate(scores: &[ExampleScore]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    if scores.iter().all(ExampleScore::passed) {
        return 1.0;
    }
    let mean = scores.iter().map(|s| s.score).sum::<f64>() / scores.len() as f64;
    mean.min(BELOW_PERFECT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn g(rows: Vec<Vec<i64>>) -> Grid {
        Grid::new(rows).unwrap()
    }

    #[test]
    fn test_exact_match_scores_one() {
        let a = g(vec![vec![1, 2], vec![3, 4]]);
        assert_eq!(score(&a, &a.clone()), 1.0);
        assert_eq!(score(&Grid::empty(), &Grid::empty()), 1.0);
    }

    #[test]
    fn test_same_shape_partial_credit() {
        let expected = g(vec![vec![1, 2], vec![3, 4]]);
        let actual = g(vec![vec![1, 2], vec![3, 0]]);
        let s = score(&actual, &expected);
        // shape 1.0 * 0.25 + 3/4 * 0.75
        assert!((s - (0.25 + 0.5625)).abs() < 1e-12);
        assert!(s < 1.0);
    }

    #[test]
    fn test_disjoint_shape_and_values_hit_floor() {
        let expected = g(vec![vec![1, 1], vec![1, 1]]);
        let actual = g(vec![vec![0, 0, 0]]);
        assert_eq!(score(&actual, &expected), 0.0);
    }

    #[test]
    fn test_one_dimension_match() {
        let expected = g(vec![vec![1, 2, 3]]);
        let actual = g(vec![vec![1, 2, 3], vec![0, 0, 0]]);
        // cols match: shape 0.5; overlap 3 equal over max(6, 3)
        let s = score(&actual, &expected);
        assert!((s - (0.25 * 0.5 + 0.75 * 0.5)).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_inputs_do_not_panic() {
        let expected = g(vec![vec![1]]);
        assert_eq!(score(&Grid::empty(), &expected), 0.0);
        assert_eq!(score(&expected, &Grid::empty()), 0.0);
        let zero_width = g(vec![vec![], vec![]]);
        assert_eq!(score(&zero_width, &Grid::empty()), 0.0);
    }

    #[test]
    fn test_bounds_hold_across_shapes() {
        let grids = vec![
            Grid::empty(),
            g(vec![vec![0]]),
            g(vec![vec![1, 2], vec![3, 4]]),
            g(vec![vec![1, 2, 3]]),
            g(vec![vec![1], vec![3]]),
            g(vec![vec![9; 5]; 5]),
        ];
        for a in &grids {
            for e in &grids {
                let s = score(a, e);
                assert!((0.0..=1.0).contains(&s), "score {s} out of range");
                assert_eq!(s == 1.0, a == e);
                assert_eq!(s, score(a, e), "scoring must be deterministic");
            }
        }
    }

    #[test]
    fn test_failures_score_zero() {
        let expected = g(vec![vec![1]]);
        let failures = [
            ExecutionResult::Timeout { limit_ms: 10 },
            ExecutionResult::RuntimeError {
                kind: "ValueError".into(),
                message: "x".into(),
            },
            ExecutionResult::InvalidOutput {
                raw: "[1]".into(),
                detail: "not a grid".into(),
            },
        ];
        for f in &failures {
            assert_eq!(score_result(f, &expected), 0.0);
        }
    }

    #[test]
    fn test_passer_iff_aggregate_is_one() {
        let train = vec![
            Example::new(g(vec![vec![0]]), g(vec![vec![1]])),
            Example::new(g(vec![vec![1]]), g(vec![vec![0]])),
        ];
        let ok = |v: i64| ExecutionResult::Output {
            grid: g(vec![vec![v]]),
        };

        let perfect = ScoredCandidate::score(Candidate::new("e", 1, "src"), vec![ok(1), ok(0)], &train);
        assert!(perfect.is_passer());
        assert_eq!(perfect.aggregate(), 1.0);

        let partial = ScoredCandidate::score(Candidate::new("e", 2, "src"), vec![ok(1), ok(1)], &train);
        assert!(!partial.is_passer());
        assert!(partial.aggregate() < 1.0);
        assert!((partial.aggregate() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_all_timeouts_aggregate_zero() {
        let train = vec![Example::new(g(vec![vec![0]]), g(vec![vec![1]])); 3];
        let results = vec![ExecutionResult::Timeout { limit_ms: 1500 }; 3];
        let scored = ScoredCandidate::score(Candidate::new("e", 1, "src"), results, &train);
        assert_eq!(scored.aggregate(), 0.0);
        assert!(!scored.is_passer());
        assert_eq!(scored.timeouts(), 3);
    }
}

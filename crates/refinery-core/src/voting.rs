//! Voting and consensus over every expert's retained candidates.
//!
//! Candidates are grouped by exact equality of their test predictions.
//! Ranking is diversity-first:
//!
//! 1. one representative per passer group, by votes then training score
//! 2. the remaining passer-group members
//! 3. one representative per failure group, by votes then mean training score
//! 4. the remaining failure-group members
//!
//! No failure ever ranks above a passer. Ties fall back to first-seen order
//! (expert order, then pool order), so identical input ranks identically.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::Grid;
use crate::obs;
use crate::refinement::{ExpertResult, RetainedCandidate};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VotingConfig {
    /// Length of the final answer list.
    pub max_answers: usize,
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self { max_answers: 2 }
    }
}

/// A retained candidate tagged with its first-seen position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ballot {
    /// Position across all experts' pools, in expert then pool order.
    pub seen: usize,
    pub expert: String,
    pub candidate: RetainedCandidate,
}

/// Candidates whose test predictions are identical.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoteGroup {
    /// Shared predictions; `None` where a prediction failed.
    pub predictions: Vec<Option<Grid>>,
    pub passer: bool,
    /// Members ordered by training score, then first-seen.
    pub members: Vec<Ballot>,
}

impl VoteGroup {
    pub fn votes(&self) -> usize {
        self.members.len()
    }

    pub fn mean_score(&self) -> f64 {
        if self.members.is_empty() {
            return 0.0;
        }
        let total: f64 = self.members.iter().map(|b| b.candidate.training_score()).sum();
        total / self.members.len() as f64
    }

    /// Every prediction produced a grid.
    pub fn is_complete(&self) -> bool {
        self.predictions.iter().all(Option::is_some)
    }

    pub fn representative(&self) -> Option<&Ballot> {
        self.members.first()
    }

    fn first_seen(&self) -> usize {
        self.members.iter().map(|b| b.seen).min().unwrap_or(usize::MAX)
    }
}

/// One entry of the final ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedCandidate {
    /// 1-based.
    pub rank: usize,
    /// Index into [`Consensus::groups`].
    pub group: usize,
    pub votes: usize,
    pub passer: bool,
    /// First pick from its group rather than a secondary member.
    pub representative: bool,
    pub expert: String,
    pub candidate: RetainedCandidate,
}

impl RankedCandidate {
    pub fn predictions(&self) -> Vec<Option<Grid>> {
        self.candidate.predicted_grids()
    }
}

/// Outcome of a vote.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Consensus {
    /// Passer groups first, then failure groups, each in rank order.
    pub groups: Vec<VoteGroup>,
    /// Every candidate, best first.
    pub ranked: Vec<RankedCandidate>,
    pub max_answers: usize,
}

impl Consensus {
    /// The top `max_answers` of the ranking.
    pub fn answers(&self) -> &[RankedCandidate] {
        &self.ranked[..self.ranked.len().min(self.max_answers)]
    }

    /// The top answer passed every training example.
    pub fn confident(&self) -> bool {
        self.ranked.first().is_some_and(|r| r.passer)
    }

    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }
}

/// Group and rank every retained candidate from every expert.
///
/// Returns a best-effort ranking even when nobody passed; only an ensemble
/// with no retained candidates at all yields an empty consensus.
pub fn vote(results: &[ExpertResult], config: &VotingConfig) -> Consensus {
    let ballots = results.iter().flat_map(|r| {
        r.candidates
            .iter()
            .map(move |c| (r.expert.clone(), c.clone()))
    });

    let mut groups: Vec<VoteGroup> = Vec::new();
    let mut index: HashMap<(bool, Vec<Option<Grid>>), usize> = HashMap::new();
    for (seen, (expert, candidate)) in ballots.enumerate() {
        let key = (candidate.is_passer(), candidate.predicted_grids());
        let slot = *index.entry(key.clone()).or_insert_with(|| {
            groups.push(VoteGroup {
                predictions: key.1,
                passer: key.0,
                members: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].members.push(Ballot {
            seen,
            expert,
            candidate,
        });
    }

    for group in &mut groups {
        group.members.sort_by(|a, b| {
            b.candidate
                .training_score()
                .total_cmp(&a.candidate.training_score())
                .then(a.seen.cmp(&b.seen))
        });
    }
    groups.sort_by(compare_groups);

    let ranked = rank(&groups);
    obs::emit_consensus_ranked(
        groups.len(),
        groups.iter().filter(|g| g.passer).count(),
        groups.first().map_or(0, VoteGroup::votes),
    );

    Consensus {
        groups,
        ranked,
        max_answers: config.max_answers,
    }
}

/// Passers before failures, then votes, then score. Complete predictions
/// beat partial ones only among otherwise equal groups; first-seen decides
/// the rest.
fn compare_groups(a: &VoteGroup, b: &VoteGroup) -> Ordering {
    b.passer
        .cmp(&a.passer)
        .then(b.votes().cmp(&a.votes()))
        .then_with(|| {
            if a.passer {
                let score = |g: &VoteGroup| g.representative().map_or(0.0, |r| r.candidate.training_score());
                score(b).total_cmp(&score(a))
            } else {
                b.mean_score().total_cmp(&a.mean_score())
            }
        })
        .then(b.is_complete().cmp(&a.is_complete()))
        .then(a.first_seen().cmp(&b.first_seen()))
}

fn rank(groups: &[VoteGroup]) -> Vec<RankedCandidate> {
    let mut ranked = Vec::new();
    for passer in [true, false] {
        let class: Vec<(usize, &VoteGroup)> = groups
            .iter()
            .enumerate()
            .filter(|(_, g)| g.passer == passer)
            .collect();

        for &(i, group) in &class {
            if let Some(rep) = group.representative() {
                ranked.push(entry(i, group, rep, true));
            }
        }
        for &(i, group) in &class {
            for member in group.members.iter().skip(1) {
                ranked.push(entry(i, group, member, false));
            }
        }
    }

    for (pos, r) in ranked.iter_mut().enumerate() {
        r.rank = pos + 1;
    }
    ranked
}

fn entry(group_index: usize, group: &VoteGroup, ballot: &Ballot, representative: bool) -> RankedCandidate {
    RankedCandidate {
        rank: 0,
        group: group_index,
        votes: group.votes(),
        passer: group.passer,
        representative,
        expert: ballot.expert.clone(),
        candidate: ballot.candidate.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Candidate, Example, ExecutionResult};
    use crate::refinement::TerminationReason;
    use crate::scoring::ScoredCandidate;

    fn g(v: i64) -> Grid {
        Grid::new(vec![vec![v]]).unwrap()
    }

    fn retained(passer: bool, prediction: Option<i64>) -> RetainedCandidate {
        let train = vec![Example::new(g(0), g(1))];
        let output = if passer { g(1) } else { g(0) };
        let scored = ScoredCandidate::score(
            Candidate::new("e", 1, "def transform(g): return g"),
            vec![ExecutionResult::Output { grid: output }],
            &train,
        );
        let prediction = match prediction {
            Some(v) => ExecutionResult::Output { grid: g(v) },
            None => ExecutionResult::Timeout { limit_ms: 1 },
        };
        RetainedCandidate {
            scored,
            predictions: vec![prediction],
        }
    }

    fn expert(name: &str, candidates: Vec<RetainedCandidate>) -> ExpertResult {
        ExpertResult {
            candidates,
            ..ExpertResult::empty(name, TerminationReason::MaxIterations)
        }
    }

    #[test]
    fn test_empty_vote() {
        let consensus = vote(&[], &VotingConfig::default());
        assert!(consensus.is_empty());
        assert!(consensus.answers().is_empty());
        assert!(!consensus.confident());
    }

    #[test]
    fn test_passer_and_failure_never_share_a_group() {
        let results = vec![expert("a", vec![retained(true, Some(5)), retained(false, Some(5))])];
        let consensus = vote(&results, &VotingConfig::default());
        assert_eq!(consensus.groups.len(), 2);
        assert!(consensus.groups[0].passer);
        assert!(!consensus.groups[1].passer);
    }

    #[test]
    fn test_representatives_before_secondaries() {
        let results = vec![
            expert("a", vec![retained(true, Some(1)), retained(true, Some(1))]),
            expert("b", vec![retained(true, Some(2))]),
        ];
        let consensus = vote(&results, &VotingConfig { max_answers: 3 });
        let picks: Vec<(Option<Grid>, bool)> = consensus
            .ranked
            .iter()
            .map(|r| (r.predictions()[0].clone(), r.representative))
            .collect();
        assert_eq!(
            picks,
            vec![(Some(g(1)), true), (Some(g(2)), true), (Some(g(1)), false)]
        );
        assert_eq!(consensus.answers().len(), 3);
        assert_eq!(consensus.ranked[2].rank, 3);
    }

    #[test]
    fn test_complete_predictions_break_ties_between_equal_groups() {
        let results = vec![expert(
            "a",
            vec![retained(false, None), retained(false, Some(3))],
        )];
        let consensus = vote(&results, &VotingConfig::default());
        assert_eq!(consensus.ranked[0].predictions(), vec![Some(g(3))]);
        assert_eq!(consensus.ranked[1].predictions(), vec![None]);
        assert!(!consensus.confident());
    }

    #[test]
    fn test_votes_outrank_completeness() {
        let results = vec![expert(
            "a",
            vec![
                retained(false, Some(3)),
                retained(false, None),
                retained(false, None),
            ],
        )];
        let consensus = vote(&results, &VotingConfig::default());
        assert_eq!(consensus.ranked[0].predictions(), vec![None]);
        assert_eq!(consensus.ranked[0].votes, 2);
    }
}

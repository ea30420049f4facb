//! Bounded pool of the best candidates seen by one loop.

use crate::scoring::ScoredCandidate;

/// Insertion-ordered, capacity-bounded candidate pool.
///
/// Owned by exactly one loop. When full, the lowest aggregate is evicted;
/// among equal lowest scores the oldest goes first.
#[derive(Debug, Clone)]
pub struct CandidatePool {
    capacity: usize,
    entries: Vec<ScoredCandidate>,
}

impl CandidatePool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Vec::with_capacity(capacity + 1),
        }
    }

    /// Insert a candidate; returns the evicted one, if any.
    pub fn insert(&mut self, candidate: ScoredCandidate) -> Option<ScoredCandidate> {
        self.entries.push(candidate);
        if self.entries.len() <= self.capacity {
            return None;
        }

        let mut worst = 0;
        for (i, entry) in self.entries.iter().enumerate().skip(1) {
            if entry.aggregate() < self.entries[worst].aggregate() {
                worst = i;
            }
        }
        Some(self.entries.remove(worst))
    }

    pub fn entries(&self) -> &[ScoredCandidate] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<ScoredCandidate> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn passers(&self) -> usize {
        self.entries.iter().filter(|c| c.is_passer()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Candidate, Example, ExecutionResult, Grid};

    fn with_score(tag: u32, hits: usize) -> ScoredCandidate {
        let target = Grid::new(vec![vec![1]]).unwrap();
        let train = vec![Example::new(target.clone(), target.clone()); 4];
        let results = (0..4)
            .map(|i| {
                if i < hits {
                    ExecutionResult::Output {
                        grid: target.clone(),
                    }
                } else {
                    ExecutionResult::Timeout { limit_ms: 1 }
                }
            })
            .collect();
        ScoredCandidate::score(Candidate::new("e", tag, "src"), results, &train)
    }

    #[test]
    fn test_pool_under_capacity_keeps_everything() {
        let mut pool = CandidatePool::new(3);
        assert!(pool.insert(with_score(1, 1)).is_none());
        assert!(pool.insert(with_score(2, 2)).is_none());
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_pool_evicts_lowest() {
        let mut pool = CandidatePool::new(2);
        pool.insert(with_score(1, 3));
        pool.insert(with_score(2, 1));
        let evicted = pool.insert(with_score(3, 2)).unwrap();
        assert_eq!(evicted.candidate.iteration, 2);
        let kept: Vec<u32> = pool.entries().iter().map(|c| c.candidate.iteration).collect();
        assert_eq!(kept, vec![1, 3]);
    }

    #[test]
    fn test_pool_evicts_oldest_among_ties() {
        let mut pool = CandidatePool::new(2);
        pool.insert(with_score(1, 1));
        pool.insert(with_score(2, 1));
        let evicted = pool.insert(with_score(3, 1)).unwrap();
        assert_eq!(evicted.candidate.iteration, 1);
    }

    #[test]
    fn test_new_candidate_can_be_evicted_immediately() {
        let mut pool = CandidatePool::new(1);
        pool.insert(with_score(1, 4));
        let evicted = pool.insert(with_score(2, 0)).unwrap();
        assert_eq!(evicted.candidate.iteration, 2);
        assert_eq!(pool.passers(), 1);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let pool = CandidatePool::new(0);
        assert_eq!(pool.capacity(), 1);
    }
}

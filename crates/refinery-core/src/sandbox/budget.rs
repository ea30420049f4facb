//! Cumulative timeout budget for one refinement loop.

/// Counts sandbox timeouts across iterations and trips once the limit is reached.
///
/// Owned by a single loop, so no atomics are needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutBudget {
    used: u32,
    limit: u32,
}

impl TimeoutBudget {
    pub fn new(limit: u32) -> Self {
        Self { used: 0, limit }
    }

    /// Record `count` new timeouts. Returns the cumulative total.
    pub fn record(&mut self, count: u32) -> u32 {
        self.used = self.used.saturating_add(count);
        self.used
    }

    /// Returns `true` once the cumulative count has reached the limit.
    pub fn is_exhausted(&self) -> bool {
        self.used >= self.limit
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.used)
    }
}

//! Global atomic counters for refinement observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a solve).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters, no allocations and no locking.
pub struct Metrics {
    candidates_generated: AtomicU64,
    sandbox_executions: AtomicU64,
    sandbox_timeouts: AtomicU64,
    generation_failures: AtomicU64,
    passers_found: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            candidates_generated: AtomicU64::new(0),
            sandbox_executions: AtomicU64::new(0),
            sandbox_timeouts: AtomicU64::new(0),
            generation_failures: AtomicU64::new(0),
            passers_found: AtomicU64::new(0),
        }
    }

    pub fn inc_candidates_generated(&self) {
        self.candidates_generated.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "candidates_generated", "counter incremented");
    }

    /// Add `n` sandbox executions.
    pub fn add_sandbox_executions(&self, n: u64) {
        self.sandbox_executions.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "sandbox_executions", n, "counter incremented");
    }

    pub fn add_sandbox_timeouts(&self, n: u64) {
        if n == 0 {
            return;
        }
        self.sandbox_timeouts.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "sandbox_timeouts", n, "counter incremented");
    }

    pub fn inc_generation_failures(&self) {
        self.generation_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "generation_failures", "counter incremented");
    }

    pub fn inc_passers_found(&self) {
        self.passers_found.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "passers_found", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    ///
    /// Call this at natural boundaries (end of a solve) rather than on every
    /// increment.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            candidates_generated = self.candidates_generated(),
            sandbox_executions = self.sandbox_executions(),
            sandbox_timeouts = self.sandbox_timeouts(),
            generation_failures = self.generation_failures(),
            passers_found = self.passers_found(),
        );
    }

    pub fn candidates_generated(&self) -> u64 {
        self.candidates_generated.load(Ordering::Relaxed)
    }

    pub fn sandbox_executions(&self) -> u64 {
        self.sandbox_executions.load(Ordering::Relaxed)
    }

    pub fn sandbox_timeouts(&self) -> u64 {
        self.sandbox_timeouts.load(Ordering::Relaxed)
    }

    pub fn generation_failures(&self) -> u64 {
        self.generation_failures.load(Ordering::Relaxed)
    }

    pub fn passers_found(&self) -> u64 {
        self.passers_found.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.candidates_generated.store(0, Ordering::Relaxed);
        self.sandbox_executions.store(0, Ordering::Relaxed);
        self.sandbox_timeouts.store(0, Ordering::Relaxed);
        self.generation_failures.store(0, Ordering::Relaxed);
        self.passers_found.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_candidates_generated();
        m.inc_candidates_generated();
        assert_eq!(m.candidates_generated(), 2);

        m.add_sandbox_executions(3);
        m.add_sandbox_timeouts(2);
        m.add_sandbox_timeouts(0);
        assert_eq!(m.sandbox_executions(), 3);
        assert_eq!(m.sandbox_timeouts(), 2);

        m.inc_generation_failures();
        m.inc_passers_found();
        assert_eq!(m.generation_failures(), 1);
        assert_eq!(m.passers_found(), 1);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_candidates_generated();
        m.add_sandbox_executions(4);
        m.add_sandbox_timeouts(1);
        m.inc_generation_failures();
        m.inc_passers_found();
        m.reset();
        assert_eq!(m.candidates_generated(), 0);
        assert_eq!(m.sandbox_executions(), 0);
        assert_eq!(m.sandbox_timeouts(), 0);
        assert_eq!(m.generation_failures(), 0);
        assert_eq!(m.passers_found(), 0);
    }
}

//! Refinement loop limits and expert identity.

use serde::{Deserialize, Serialize};

/// Bounds for one single-expert refinement loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RefinementConfig {
    /// Generate/execute/score cycles before giving up.
    pub max_iterations: u32,
    /// Retained candidates; the lowest scorer is evicted beyond this.
    pub pool_size: usize,
    /// Cumulative sandbox timeouts after which the loop stops.
    pub max_total_timeouts: u32,
    /// Backend calls per iteration (1 = no retry).
    pub generation_attempts: u32,
    /// Base delay for exponential backoff between backend attempts (milliseconds).
    pub retry_backoff_ms: u64,
    /// Stop once this many passers have been found. `None` disables early stop.
    pub early_stop_passers: Option<u32>,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            pool_size: 5,
            max_total_timeouts: 15,
            generation_attempts: 2,
            retry_backoff_ms: 500,
            early_stop_passers: Some(1),
        }
    }
}

/// Identity and sampling settings of one expert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExpertConfig {
    /// Unique within an ensemble; also the provenance tag on candidates.
    pub name: String,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Model override forwarded to the backend.
    #[serde(default)]
    pub model: Option<String>,
}

impl ExpertConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            seed: None,
            temperature: None,
            model: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refinement_config_default() {
        let cfg = RefinementConfig::default();
        assert_eq!(cfg.max_iterations, 10);
        assert_eq!(cfg.pool_size, 5);
        assert_eq!(cfg.max_total_timeouts, 15);
        assert_eq!(cfg.generation_attempts, 2);
        assert_eq!(cfg.early_stop_passers, Some(1));
    }

    #[test]
    fn test_expert_config_builder() {
        let e = ExpertConfig::named("gpt-a")
            .with_seed(7)
            .with_temperature(0.7)
            .with_model("gpt-4.1");
        assert_eq!(e.seed, Some(7));
        assert_eq!(e.temperature, Some(0.7));
        assert_eq!(e.model.as_deref(), Some("gpt-4.1"));
    }

    #[test]
    fn test_expert_config_minimal_toml() {
        let e: ExpertConfig = toml::from_str("name = \"solo\"\n").unwrap();
        assert_eq!(e, ExpertConfig::named("solo"));
    }
}

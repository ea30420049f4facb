//! Top-level configuration for a solve, loaded from TOML.
//!
//! ```toml
//! [sandbox]
//! timeout_ms = 1500
//!
//! [refinement]
//! max_iterations = 10
//!
//! [[experts]]
//! name = "alpha"
//! seed = 1
//!
//! [[experts]]
//! name = "beta"
//! temperature = 0.7
//! ```
//!
//! Every section is optional. `REFINERY_API_KEY`, `REFINERY_BASE_URL` and
//! `REFINERY_MODEL` override the `[backend]` section.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::backend::HttpBackendConfig;
use crate::domain::{RefineryError, Result};
use crate::orchestrator::OrchestratorConfig;
use crate::refinement::{ExpertConfig, RefinementConfig};
use crate::sandbox::SandboxConfig;
use crate::voting::VotingConfig;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RefineryConfig {
    pub sandbox: SandboxConfig,
    pub refinement: RefinementConfig,
    pub orchestrator: OrchestratorConfig,
    pub voting: VotingConfig,
    pub backend: HttpBackendConfig,
    pub experts: Vec<ExpertConfig>,
}

impl Default for RefineryConfig {
    fn default() -> Self {
        Self {
            sandbox: SandboxConfig::default(),
            refinement: RefinementConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            voting: VotingConfig::default(),
            backend: HttpBackendConfig::default(),
            experts: vec![ExpertConfig::named("expert-1")],
        }
    }
}

impl RefineryConfig {
    /// Parse, apply environment overrides, validate.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load `path` if given, otherwise defaults (still env-overridden and validated).
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => {
                let mut config = Self::default();
                config.apply_env_overrides();
                config.validate()?;
                Ok(config)
            }
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("REFINERY_API_KEY") {
            self.backend.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("REFINERY_BASE_URL") {
            self.backend.base_url = url;
        }
        if let Ok(model) = std::env::var("REFINERY_MODEL") {
            self.backend.model = model;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.refinement.pool_size == 0 {
            return Err(invalid("refinement.pool_size must be >= 1"));
        }
        if self.refinement.generation_attempts == 0 {
            return Err(invalid("refinement.generation_attempts must be >= 1"));
        }
        if self.sandbox.timeout_ms == 0 {
            return Err(invalid("sandbox.timeout_ms must be > 0"));
        }
        if self.sandbox.max_workers == 0 {
            return Err(invalid("sandbox.max_workers must be >= 1"));
        }
        if let Some(path) = self.sandbox.masked_paths.iter().find(|p| !p.is_absolute()) {
            return Err(RefineryError::Config(format!(
                "sandbox.masked_paths entry '{}' must be absolute",
                path.display()
            )));
        }
        if self.sandbox.limits.memory_mb == Some(0) {
            return Err(invalid("sandbox.limits.memory_mb must be > 0"));
        }
        if self.orchestrator.max_concurrent_experts == 0 {
            return Err(invalid("orchestrator.max_concurrent_experts must be >= 1"));
        }
        if self.voting.max_answers == 0 {
            return Err(invalid("voting.max_answers must be >= 1"));
        }
        if self.experts.is_empty() {
            return Err(invalid("at least one [[experts]] entry is required"));
        }

        let mut seen = HashSet::new();
        for expert in &self.experts {
            if expert.name.trim().is_empty() {
                return Err(invalid("expert names must not be empty"));
            }
            if !seen.insert(expert.name.as_str()) {
                return Err(RefineryError::Config(format!(
                    "duplicate expert name '{}'",
                    expert.name
                )));
            }
        }
        Ok(())
    }
}

fn invalid(message: &str) -> RefineryError {
    RefineryError::Config(message.to_string())
}

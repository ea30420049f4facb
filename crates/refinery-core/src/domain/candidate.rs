//! Generated candidate programs and their provenance.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// One generated solution attempt.
///
/// Created once by the loop that requested it and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: Uuid,
    /// Name of the expert that produced this candidate.
    pub expert: String,
    /// 1-based iteration of the producing loop.
    pub iteration: u32,
    /// Program text defining `transform(grid)`.
    pub source: String,
    /// SHA-256 hex digest of `source`.
    pub source_digest: String,
}

impl Candidate {
    pub fn new(expert: impl Into<String>, iteration: u32, source: impl Into<String>) -> Self {
        let source = source.into();
        let source_digest = digest_source(&source);
        Self {
            id: Uuid::new_v4(),
            expert: expert.into(),
            iteration,
            source,
            source_digest,
        }
    }

    /// First 12 hex chars of the source digest, for logs.
    pub fn short_digest(&self) -> &str {
        &self.source_digest[..12.min(self.source_digest.len())]
    }
}

fn digest_source(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hex::encode(hasher.finalize())
}

//! Problem specification: training pairs plus test inputs with hidden outputs.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::ProblemError;
use super::grid::Grid;

/// One input/output training pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    pub input: Grid,
    pub output: Grid,
}

impl Example {
    pub fn new(input: Grid, output: Grid) -> Self {
        Self { input, output }
    }
}

/// Wire form of a test entry. Any `output` key in the document is dropped.
#[derive(Debug, Deserialize)]
struct TestEntry {
    input: Grid,
}

#[derive(Debug, Deserialize)]
struct ProblemDocument {
    train: Vec<Example>,
    test: Vec<TestEntry>,
}

/// Immutable problem handed to every expert.
///
/// Fields are private so the training set cannot be mutated after
/// construction and test ground truth has no slot to live in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProblemSpec {
    id: String,
    train: Vec<Example>,
    test: Vec<Grid>,
}

impl ProblemSpec {
    /// Build and validate a problem.
    pub fn new(
        id: impl Into<String>,
        train: Vec<Example>,
        test: Vec<Grid>,
    ) -> Result<Self, ProblemError> {
        let id = id.into();
        if train.is_empty() {
            return Err(ProblemError::NoTrainingExamples { id });
        }
        if test.is_empty() {
            return Err(ProblemError::NoTestInputs { id });
        }
        Ok(Self { id, train, test })
    }

    /// Parse an ARC-style document: `{"train": [{input, output}], "test": [{input}]}`.
    pub fn from_json_str(id: impl Into<String>, json: &str) -> Result<Self, ProblemError> {
        let doc: ProblemDocument = serde_json::from_str(json)?;
        let test = doc.test.into_iter().map(|t| t.input).collect();
        Self::new(id, doc.train, test)
    }

    /// Load a problem file; the id is the file stem.
    pub fn load(path: &Path) -> Result<Self, ProblemError> {
        let content = std::fs::read_to_string(path)?;
        let id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "problem".to_string());
        Self::from_json_str(id, &content)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn train(&self) -> &[Example] {
        &self.train
    }

    pub fn test_inputs(&self) -> &[Grid] {
        &self.test
    }

    /// SHA-256 hex digest of the problem's JSON form.
    pub fn digest(&self) -> Result<String, ProblemError> {
        let bytes = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }
}

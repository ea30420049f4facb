//! Domain-level error taxonomy for refinery.

/// Errors produced while validating grid values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    #[error("ragged grid: row {row} has {found} cells, expected {expected}")]
    Ragged {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("not a grid: {detail}")]
    NotAGrid { detail: String },

    #[error("cell ({row}, {col}) is not an integer: {value}")]
    NonIntegerCell {
        row: usize,
        col: usize,
        value: String,
    },
}

/// Errors produced while loading or validating a problem.
#[derive(Debug, thiserror::Error)]
pub enum ProblemError {
    #[error("problem {id} has no training examples")]
    NoTrainingExamples { id: String },

    #[error("problem {id} has no test inputs")]
    NoTestInputs { id: String },

    #[error("problem parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Refinery crate-level errors.
#[derive(Debug, thiserror::Error)]
pub enum RefineryError {
    #[error("invalid problem: {0}")]
    Problem(#[from] ProblemError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for refinery operations.
pub type Result<T> = std::result::Result<T, RefineryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_error_display() {
        let err = GridError::Ragged {
            row: 2,
            expected: 3,
            found: 1,
        };
        let msg = err.to_string();
        assert!(msg.contains("row 2"));
        assert!(msg.contains("expected 3"));
    }

    #[test]
    fn test_problem_error_wraps_into_refinery_error() {
        let err: RefineryError = ProblemError::NoTestInputs {
            id: "abc".to_string(),
        }
        .into();
        assert!(err.to_string().contains("invalid problem"));
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn test_config_error() {
        let err = RefineryError::Config("pool_size must be >= 1".to_string());
        assert!(err.to_string().contains("invalid configuration"));
        assert!(err.to_string().contains("pool_size"));
    }
}

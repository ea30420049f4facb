//! Domain models for refinery.
//!
//! Canonical definitions for the core entities:
//! - `Grid`: the rectangular integer value every transform consumes and produces
//! - `ProblemSpec`: training pairs plus test inputs whose outputs stay hidden
//! - `Candidate`: one generated program with provenance
//! - `ExecutionResult`: tagged outcome of one sandbox run

pub mod candidate;
pub mod error;
pub mod execution;
pub mod grid;
pub mod problem;

pub use candidate::Candidate;
pub use error::{GridError, ProblemError, RefineryError, Result};
pub use execution::{ExecutionResult, Violation};
pub use grid::Grid;
pub use problem::{Example, ProblemSpec};

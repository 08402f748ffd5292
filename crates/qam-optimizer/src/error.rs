//! Optimizer error kinds.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OptimizerError {
    /// Numerical degeneracy (singular covariance, non-finite statistics).
    /// Callers suppress the adaptation and keep current parameters.
    #[error("learner degenerate: {0}")]
    LearnerDegenerate(String),

    #[error("unknown arm index {index} (arm count {count})")]
    UnknownArm { index: usize, count: usize },

    #[error("context dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

//! LinUCB contextual bandit.
//!
//! Per arm `a`: `A_a ← A_a + x xᵀ`, `b_a ← b_a + r x`, `θ_a = A_a⁻¹ b_a`.
//! Selection is argmax of `θ_aᵀ x + α √(xᵀ A_a⁻¹ x)`. `A_a` starts as the
//! identity so it stays positive definite, and rewards are clamped to [0, 1]
//! so running averages cannot leave the unit interval.

use serde::{Deserialize, Serialize};

use crate::error::OptimizerError;
use crate::linalg::{dot, quadratic_form, Matrix};

/// Sufficient statistics for one arm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinUcbArm {
    pub a: Matrix,
    pub b: Vec<f64>,
    pub theta: Vec<f64>,
    pub reward_sum: f64,
    pub pulls: u64,
}

impl LinUcbArm {
    fn new(dim: usize) -> Self {
        Self {
            a: Matrix::identity(dim),
            b: vec![0.0; dim],
            theta: vec![0.0; dim],
            reward_sum: 0.0,
            pulls: 0,
        }
    }

    pub fn mean_reward(&self) -> f64 {
        if self.pulls == 0 {
            0.0
        } else {
            self.reward_sum / self.pulls as f64
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinUcbLearner {
    dim: usize,
    alpha: f64,
    arms: Vec<LinUcbArm>,
}

impl LinUcbLearner {
    pub fn new(arm_count: usize, dim: usize, alpha: f64) -> Self {
        Self {
            dim,
            alpha,
            arms: (0..arm_count).map(|_| LinUcbArm::new(dim)).collect(),
        }
    }

    pub fn arm_count(&self) -> usize {
        self.arms.len()
    }

    pub fn arm(&self, index: usize) -> Option<&LinUcbArm> {
        self.arms.get(index)
    }

    fn check_context(&self, x: &[f64]) -> Result<(), OptimizerError> {
        if x.len() != self.dim {
            return Err(OptimizerError::DimensionMismatch {
                expected: self.dim,
                got: x.len(),
            });
        }
        Ok(())
    }

    /// Observe reward `r` for `arm` under context `x`.
    pub fn update(&mut self, arm: usize, x: &[f64], r: f64) -> Result<(), OptimizerError> {
        self.check_context(x)?;
        let count = self.arms.len();
        let arm_state = self
            .arms
            .get_mut(arm)
            .ok_or(OptimizerError::UnknownArm { index: arm, count })?;
        let r = r.clamp(0.0, 1.0);

        arm_state.a.add_outer(x);
        for (bi, xi) in arm_state.b.iter_mut().zip(x.iter()) {
            *bi += r * xi;
        }
        let inv = arm_state.a.inverse()?;
        arm_state.theta = inv.mul_vec(&arm_state.b);
        arm_state.reward_sum += r;
        arm_state.pulls += 1;
        Ok(())
    }

    /// Pick the arm maximizing the upper confidence bound for `x`.
    pub fn select(&self, x: &[f64]) -> Result<usize, OptimizerError> {
        self.check_context(x)?;
        let mut best = 0usize;
        let mut best_score = f64::NEG_INFINITY;
        for (index, arm) in self.arms.iter().enumerate() {
            let inv = arm.a.inverse()?;
            let exploration = quadratic_form(&inv, x).max(0.0).sqrt();
            let score = dot(&arm.theta, x) + self.alpha * exploration;
            if !score.is_finite() {
                return Err(OptimizerError::LearnerDegenerate(format!(
                    "non-finite UCB score on arm {index}"
                )));
            }
            if score > best_score {
                best_score = score;
                best = index;
            }
        }
        Ok(best)
    }

    /// Positive-definiteness probe used by health checks: every A_a must be
    /// symmetric, finite, and invertible.
    pub fn is_well_conditioned(&self) -> bool {
        self.arms
            .iter()
            .all(|arm| arm.a.is_symmetric_finite() && arm.a.inverse().is_ok())
    }
}

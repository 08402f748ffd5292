//! Thompson Sampling over Bayesian linear regression.
//!
//! Per arm: Gaussian prior N(0, I), per-observation noise variance 1. The
//! posterior precision accumulates `x xᵀ`, giving `Σ_a = B_a⁻¹` and
//! `μ_a = Σ_a b_a`. Each round samples `θ̃_a ~ N(μ_a, Σ_a)` through the
//! Cholesky factor and picks argmax `θ̃_aᵀ x`. Draws come from a seedable
//! RNG so runs are reproducible in tests.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::error::OptimizerError;
use crate::linalg::{dot, Matrix};

/// Posterior state for one arm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThompsonArm {
    /// Posterior precision `B_a = I + Σ x xᵀ`.
    pub precision: Matrix,
    pub b: Vec<f64>,
    pub reward_sum: f64,
    pub pulls: u64,
}

impl ThompsonArm {
    fn new(dim: usize) -> Self {
        Self {
            precision: Matrix::identity(dim),
            b: vec![0.0; dim],
            reward_sum: 0.0,
            pulls: 0,
        }
    }

    /// Posterior mean and covariance.
    pub fn posterior(&self) -> Result<(Vec<f64>, Matrix), OptimizerError> {
        let covariance = self.precision.inverse()?;
        let mean = covariance.mul_vec(&self.b);
        Ok((mean, covariance))
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
pub struct ThompsonLearner {
    dim: usize,
    seed: u64,
    arms: Vec<ThompsonArm>,
    /// Runtime RNG; rebuilt from `seed` after deserialization.
    #[serde(skip)]
    rng: Option<StdRng>,
}

impl ThompsonLearner {
    pub fn new(arm_count: usize, dim: usize, seed: u64) -> Self {
        Self {
            dim,
            seed,
            arms: (0..arm_count).map(|_| ThompsonArm::new(dim)).collect(),
            rng: None,
        }
    }

    pub fn arm_count(&self) -> usize {
        self.arms.len()
    }

    pub fn arm(&self, index: usize) -> Option<&ThompsonArm> {
        self.arms.get(index)
    }

    fn rng(&mut self) -> &mut StdRng {
        let seed = self.seed;
        self.rng.get_or_insert_with(|| StdRng::seed_from_u64(seed))
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

    pub fn update(&mut self, arm: usize, x: &[f64], r: f64) -> Result<(), OptimizerError> {
        self.check_context(x)?;
        let count = self.arms.len();
        let arm_state = self
            .arms
            .get_mut(arm)
            .ok_or(OptimizerError::UnknownArm { index: arm, count })?;
        let r = r.clamp(0.0, 1.0);
        arm_state.precision.add_outer(x);
        for (bi, xi) in arm_state.b.iter_mut().zip(x.iter()) {
            *bi += r * xi;
        }
        arm_state.reward_sum += r;
        arm_state.pulls += 1;
        Ok(())
    }

    /// Sample a parameter vector per arm and pick the best for `x`.
    pub fn select(&mut self, x: &[f64]) -> Result<usize, OptimizerError> {
        self.check_context(x)?;
        let dim = self.dim;
        let mut best = 0usize;
        let mut best_score = f64::NEG_INFINITY;

        // Posterior factors computed up front so the RNG borrow stays local.
        let mut factors = Vec::with_capacity(self.arms.len());
        for arm in &self.arms {
            let (mean, covariance) = arm.posterior()?;
            let chol = covariance.cholesky()?;
            factors.push((mean, chol));
        }

        for (index, (mean, chol)) in factors.into_iter().enumerate() {
            let z: Vec<f64> = (0..dim)
                .map(|_| self.rng().sample::<f64, _>(StandardNormal))
                .collect();
            let perturbation = chol.mul_vec(&z);
            let theta: Vec<f64> = mean
                .iter()
                .zip(perturbation.iter())
                .map(|(m, p)| m + p)
                .collect();
            let score = dot(&theta, x);
            if !score.is_finite() {
                return Err(OptimizerError::LearnerDegenerate(format!(
                    "non-finite Thompson score on arm {index}"
                )));
            }
            if score > best_score {
                best_score = score;
                best = index;
            }
        }
        Ok(best)
    }

    /// Posterior covariance health probe: symmetric, finite, factorizable.
    pub fn is_well_conditioned(&self) -> bool {
        self.arms.iter().all(|arm| {
            arm.precision.is_symmetric_finite()
                && arm
                    .posterior()
                    .map(|(_, cov)| cov.is_symmetric_finite() && cov.cholesky().is_ok())
                    .unwrap_or(false)
        })
    }
}

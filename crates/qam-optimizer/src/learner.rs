//! Algorithm facade.
//!
//! One enum over the four learner algorithms so the optimizer and its
//! snapshots are generic over the configured choice.

use serde::{Deserialize, Serialize};

use crate::baseline::{EpsilonGreedy, Ucb1};
use crate::context::CONTEXT_DIM;
use crate::error::OptimizerError;
use crate::linucb::LinUcbLearner;
use crate::thompson::ThompsonLearner;
use qam_core::{OptimizerAlgorithm, OptimizerConfig};

/// Exploration rate for the epsilon-greedy baseline.
const DEFAULT_EPSILON: f64 = 0.1;

/// Seed used when the configuration does not pin one.
const DEFAULT_SEED: u64 = 0x51414d_u64;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Learner {
    Linucb(LinUcbLearner),
    Thompson(ThompsonLearner),
    EpsilonGreedy(EpsilonGreedy),
    Ucb1(Ucb1),
}

impl Learner {
    pub fn from_config(config: &OptimizerConfig) -> Self {
        let seed = config.rng_seed.unwrap_or(DEFAULT_SEED);
        match config.algorithm {
            OptimizerAlgorithm::Linucb => Self::Linucb(LinUcbLearner::new(
                config.arm_count,
                CONTEXT_DIM,
                config.alpha,
            )),
            OptimizerAlgorithm::Thompson => {
                Self::Thompson(ThompsonLearner::new(config.arm_count, CONTEXT_DIM, seed))
            }
            OptimizerAlgorithm::EpsilonGreedy => {
                Self::EpsilonGreedy(EpsilonGreedy::new(config.arm_count, DEFAULT_EPSILON, seed))
            }
            OptimizerAlgorithm::Ucb1 => Self::Ucb1(Ucb1::new(config.arm_count)),
        }
    }

    pub fn algorithm(&self) -> OptimizerAlgorithm {
        match self {
            Self::Linucb(_) => OptimizerAlgorithm::Linucb,
            Self::Thompson(_) => OptimizerAlgorithm::Thompson,
            Self::EpsilonGreedy(_) => OptimizerAlgorithm::EpsilonGreedy,
            Self::Ucb1(_) => OptimizerAlgorithm::Ucb1,
        }
    }

    pub fn arm_count(&self) -> usize {
        match self {
            Self::Linucb(l) => l.arm_count(),
            Self::Thompson(l) => l.arm_count(),
            Self::EpsilonGreedy(l) => l.arm_count(),
            Self::Ucb1(l) => l.arm_count(),
        }
    }

    pub fn select(&mut self, x: &[f64]) -> Result<usize, OptimizerError> {
        match self {
            Self::Linucb(l) => l.select(x),
            Self::Thompson(l) => l.select(x),
            Self::EpsilonGreedy(l) => Ok(l.select()),
            Self::Ucb1(l) => Ok(l.select()),
        }
    }

    pub fn update(&mut self, arm: usize, x: &[f64], r: f64) -> Result<(), OptimizerError> {
        match self {
            Self::Linucb(l) => l.update(arm, x, r),
            Self::Thompson(l) => l.update(arm, x, r),
            Self::EpsilonGreedy(l) => l.update(arm, r),
            Self::Ucb1(l) => l.update(arm, r),
        }
    }

    pub fn mean_reward(&self, arm: usize) -> f64 {
        match self {
            Self::Linucb(l) => l.arm(arm).map(|a| a.mean_reward()).unwrap_or(0.0),
            Self::Thompson(l) => l.arm(arm).map(|a| a.mean_reward()).unwrap_or(0.0),
            Self::EpsilonGreedy(l) => l.mean_reward(arm),
            Self::Ucb1(l) => l.mean_reward(arm),
        }
    }

    /// Numerical health probe; context-free learners cannot degenerate.
    pub fn is_well_conditioned(&self) -> bool {
        match self {
            Self::Linucb(l) => l.is_well_conditioned(),
            Self::Thompson(l) => l.is_well_conditioned(),
            Self::EpsilonGreedy(_) | Self::Ucb1(_) => true,
        }
    }
}

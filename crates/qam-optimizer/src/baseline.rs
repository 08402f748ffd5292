//! Context-free baseline learners: epsilon-greedy and UCB1.
//!
//! Kept alongside the contextual algorithms for templates whose reward
//! surface is flat in context, and as regression baselines in evaluation.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::OptimizerError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpsilonGreedy {
    epsilon: f64,
    seed: u64,
    counts: Vec<u64>,
    means: Vec<f64>,
    #[serde(skip)]
    rng: Option<StdRng>,
}

impl EpsilonGreedy {
    pub fn new(arm_count: usize, epsilon: f64, seed: u64) -> Self {
        Self {
            epsilon: epsilon.clamp(0.0, 1.0),
            seed,
            counts: vec![0; arm_count],
            means: vec![0.0; arm_count],
            rng: None,
        }
    }

    fn rng(&mut self) -> &mut StdRng {
        let seed = self.seed;
        self.rng.get_or_insert_with(|| StdRng::seed_from_u64(seed))
    }

    pub fn arm_count(&self) -> usize {
        self.counts.len()
    }

    pub fn mean_reward(&self, arm: usize) -> f64 {
        self.means.get(arm).copied().unwrap_or(0.0)
    }

    pub fn update(&mut self, arm: usize, r: f64) -> Result<(), OptimizerError> {
        let count = self.counts.len();
        if arm >= count {
            return Err(OptimizerError::UnknownArm { index: arm, count });
        }
        let r = r.clamp(0.0, 1.0);
        self.counts[arm] += 1;
        let n = self.counts[arm] as f64;
        self.means[arm] += (r - self.means[arm]) / n;
        Ok(())
    }

    pub fn select(&mut self) -> usize {
        let n = self.counts.len();
        let explore: f64 = self.rng().gen();
        if explore < self.epsilon {
            return self.rng().gen_range(0..n);
        }
        self.means
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ucb1 {
    counts: Vec<u64>,
    means: Vec<f64>,
    total_pulls: u64,
}

impl Ucb1 {
    pub fn new(arm_count: usize) -> Self {
        Self {
            counts: vec![0; arm_count],
            means: vec![0.0; arm_count],
            total_pulls: 0,
        }
    }

    pub fn arm_count(&self) -> usize {
        self.counts.len()
    }

    pub fn mean_reward(&self, arm: usize) -> f64 {
        self.means.get(arm).copied().unwrap_or(0.0)
    }

    pub fn update(&mut self, arm: usize, r: f64) -> Result<(), OptimizerError> {
        let count = self.counts.len();
        if arm >= count {
            return Err(OptimizerError::UnknownArm { index: arm, count });
        }
        let r = r.clamp(0.0, 1.0);
        self.counts[arm] += 1;
        self.total_pulls += 1;
        let n = self.counts[arm] as f64;
        self.means[arm] += (r - self.means[arm]) / n;
        Ok(())
    }

    /// Each unpulled arm is tried once before the bound applies.
    pub fn select(&self) -> usize {
        if let Some(unpulled) = self.counts.iter().position(|c| *c == 0) {
            return unpulled;
        }
        let t = self.total_pulls.max(1) as f64;
        self.means
            .iter()
            .zip(self.counts.iter())
            .map(|(mean, count)| mean + (2.0 * t.ln() / *count as f64).sqrt())
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }
}

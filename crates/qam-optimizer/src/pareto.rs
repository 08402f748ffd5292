//! Pareto layer.
//!
//! Reward observations live in five-dimensional objective space over a rolling
//! window. Dominance is recomputed on demand: Pareto rank is the count of
//! dominators, the front is the rank-0 set, hypervolume is the mean product of
//! the front's objectives, and spread is the average per-objective range
//! across the front.

use serde::{Deserialize, Serialize};

use crate::reward::RewardObjectives;

/// Default rolling window length.
pub const DEFAULT_WINDOW: usize = 200;

/// One observation plus its computed rank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParetoPoint {
    pub objectives: RewardObjectives,
    pub composite: f64,
    pub at_ms: i64,
    /// Count of observations in the window that dominate this one.
    pub rank: usize,
}

/// Summary of the current front.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontMetrics {
    pub front_size: usize,
    pub window_size: usize,
    pub hypervolume: f64,
    pub spread: f64,
}

/// Rolling window of observations with dominance bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParetoWindow {
    capacity: usize,
    points: Vec<ParetoPoint>,
}

impl ParetoWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            points: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Add an observation, evicting the oldest past capacity, and recompute
    /// ranks over the window.
    pub fn push(&mut self, objectives: RewardObjectives, composite: f64, at_ms: i64) {
        if self.points.len() >= self.capacity {
            self.points.remove(0);
        }
        self.points.push(ParetoPoint {
            objectives,
            composite,
            at_ms,
            rank: 0,
        });
        self.recompute_ranks();
    }

    fn recompute_ranks(&mut self) {
        let objectives: Vec<RewardObjectives> =
            self.points.iter().map(|p| p.objectives).collect();
        for (i, point) in self.points.iter_mut().enumerate() {
            point.rank = objectives
                .iter()
                .enumerate()
                .filter(|(j, other)| *j != i && other.dominates(&point.objectives))
                .count();
        }
    }

    /// The rank-0 set.
    pub fn front(&self) -> Vec<&ParetoPoint> {
        self.points.iter().filter(|p| p.rank == 0).collect()
    }

    /// Hypervolume: mean over the front of the product of the five normalized
    /// objectives. Spread: average per-objective range across the front.
    pub fn front_metrics(&self) -> FrontMetrics {
        let front = self.front();
        if front.is_empty() {
            return FrontMetrics {
                front_size: 0,
                window_size: self.points.len(),
                hypervolume: 0.0,
                spread: 0.0,
            };
        }

        let hypervolume = front
            .iter()
            .map(|p| p.objectives.as_array().iter().product::<f64>())
            .sum::<f64>()
            / front.len() as f64;

        let mut spread = 0.0;
        for axis in 0..5 {
            let values: Vec<f64> = front.iter().map(|p| p.objectives.as_array()[axis]).collect();
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            spread += max - min;
        }
        spread /= 5.0;

        FrontMetrics {
            front_size: front.len(),
            window_size: self.points.len(),
            hypervolume,
            spread,
        }
    }

    pub fn points(&self) -> &[ParetoPoint] {
        &self.points
    }
}

impl Default for ParetoWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(v: f64) -> RewardObjectives {
        RewardObjectives {
            latency: v,
            cost: v,
            quality: v,
            reliability: v,
            security: v,
        }
    }

    #[test]
    fn dominated_points_get_positive_rank() {
        let mut window = ParetoWindow::new(10);
        window.push(obj(0.9), 0.9, 0);
        window.push(obj(0.5), 0.5, 1);
        window.push(obj(0.7), 0.7, 2);

        let ranks: Vec<usize> = window.points().iter().map(|p| p.rank).collect();
        assert_eq!(ranks, vec![0, 2, 1]);
        assert_eq!(window.front().len(), 1);
    }

    #[test]
    fn incomparable_points_share_the_front() {
        let mut window = ParetoWindow::new(10);
        let mut a = obj(0.9);
        a.cost = 0.2;
        let mut b = obj(0.2);
        b.cost = 0.9;
        window.push(a, 0.6, 0);
        window.push(b, 0.6, 1);
        assert_eq!(window.front().len(), 2);
    }

    #[test]
    fn front_never_contains_dominated_pair() {
        let mut window = ParetoWindow::new(50);
        // A spread of points along a tradeoff curve plus dominated noise.
        for i in 0..10 {
            let x = i as f64 / 10.0;
            let mut p = obj(x);
            p.cost = 1.0 - x;
            window.push(p, x, i);
            window.push(obj(0.05), 0.05, 100 + i);
        }
        let front = window.front();
        for a in &front {
            for b in &front {
                assert!(!a.objectives.dominates(&b.objectives) || std::ptr::eq(*a, *b));
            }
        }
    }

    #[test]
    fn window_evicts_oldest() {
        let mut window = ParetoWindow::new(3);
        for i in 0..5 {
            window.push(obj(0.1 * i as f64), 0.0, i);
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.points()[0].at_ms, 2);
    }

    #[test]
    fn hypervolume_and_spread() {
        let mut window = ParetoWindow::new(10);
        window.push(obj(1.0), 1.0, 0);
        let m = window.front_metrics();
        assert!((m.hypervolume - 1.0).abs() < 1e-12);
        assert_eq!(m.spread, 0.0);
        assert_eq!(m.front_size, 1);

        let mut half = obj(0.5);
        half.cost = 1.0; // incomparable with the first point? (1.0 beats 0.5 except cost)
        half.latency = 1.0;
        window.push(half, 0.7, 1);
        let m = window.front_metrics();
        assert_eq!(m.window_size, 2);
        assert!(m.front_size >= 1);
    }

    #[test]
    fn empty_window_metrics_are_zero() {
        let window = ParetoWindow::default();
        let m = window.front_metrics();
        assert_eq!(m.front_size, 0);
        assert_eq!(m.hypervolume, 0.0);
    }
}

//! Multi-objective reward aggregation.
//!
//! Five objectives, each normalized into [0, 1], folded to a composite scalar
//! with context-aware weights: criticality boosts reliability and security,
//! low priority boosts cost. Weights always renormalize to sum 1.

use serde::{Deserialize, Serialize};

use qam_core::PriorityClass;

/// Normalization ceilings for raw latency and cost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardScales {
    pub max_latency_ms: f64,
    pub max_cost: f64,
}

impl Default for RewardScales {
    fn default() -> Self {
        Self {
            max_latency_ms: 60_000.0,
            max_cost: 100.0,
        }
    }
}

/// One observation in objective space, all components in [0, 1]
/// (higher is better for every objective).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardObjectives {
    pub latency: f64,
    pub cost: f64,
    pub quality: f64,
    pub reliability: f64,
    pub security: f64,
}

impl RewardObjectives {
    /// Build from raw measurements. Latency and cost invert against their
    /// ceilings (`max(0, 1 − raw/ceiling)`); the rest pass through clamped.
    pub fn from_raw(
        latency_ms: f64,
        cost: f64,
        quality: f64,
        reliability: f64,
        security: f64,
        scales: &RewardScales,
    ) -> Self {
        Self {
            latency: (1.0 - latency_ms / scales.max_latency_ms).max(0.0),
            cost: (1.0 - cost / scales.max_cost).max(0.0),
            quality: quality.clamp(0.0, 1.0),
            reliability: reliability.clamp(0.0, 1.0),
            security: security.clamp(0.0, 1.0),
        }
    }

    pub fn as_array(&self) -> [f64; 5] {
        [
            self.latency,
            self.cost,
            self.quality,
            self.reliability,
            self.security,
        ]
    }

    /// `self` dominates `other` when it is ≥ in every objective and strictly
    /// greater in at least one.
    pub fn dominates(&self, other: &RewardObjectives) -> bool {
        let a = self.as_array();
        let b = other.as_array();
        let mut strictly_better = false;
        for (x, y) in a.iter().zip(b.iter()) {
            if x < y {
                return false;
            }
            if x > y {
                strictly_better = true;
            }
        }
        strictly_better
    }
}

/// Objective weights, kept normalized to sum 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardWeights {
    pub latency: f64,
    pub cost: f64,
    pub quality: f64,
    pub reliability: f64,
    pub security: f64,
}

impl RewardWeights {
    /// Base weights adjusted for the tenant's priority class.
    pub fn for_priority(priority: PriorityClass) -> Self {
        let mut w = Self {
            latency: 0.25,
            cost: 0.2,
            quality: 0.3,
            reliability: 0.15,
            security: 0.1,
        };
        match priority {
            PriorityClass::Critical => {
                w.reliability += 0.15;
                w.security += 0.1;
            }
            PriorityClass::High => {
                w.reliability += 0.1;
            }
            PriorityClass::Low => {
                w.cost += 0.15;
            }
            PriorityClass::Standard => {}
        }
        w.normalized()
    }

    fn normalized(mut self) -> Self {
        let sum = self.latency + self.cost + self.quality + self.reliability + self.security;
        if sum > 0.0 {
            self.latency /= sum;
            self.cost /= sum;
            self.quality /= sum;
            self.reliability /= sum;
            self.security /= sum;
        }
        self
    }

    pub fn sum(&self) -> f64 {
        self.latency + self.cost + self.quality + self.reliability + self.security
    }
}

/// Weighted composite scalar in [0, 1].
pub fn composite(objectives: &RewardObjectives, weights: &RewardWeights) -> f64 {
    (objectives.latency * weights.latency
        + objectives.cost * weights.cost
        + objectives.quality * weights.quality
        + objectives.reliability * weights.reliability
        + objectives.security * weights.security)
        .clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_conversion_inverts_latency_and_cost() {
        let scales = RewardScales::default();
        let r = RewardObjectives::from_raw(30_000.0, 50.0, 0.9, 0.95, 1.0, &scales);
        assert!((r.latency - 0.5).abs() < 1e-12);
        assert!((r.cost - 0.5).abs() < 1e-12);
        // Past the ceiling floors at zero.
        let r = RewardObjectives::from_raw(120_000.0, 500.0, 2.0, -1.0, 0.5, &scales);
        assert_eq!(r.latency, 0.0);
        assert_eq!(r.cost, 0.0);
        assert_eq!(r.quality, 1.0);
        assert_eq!(r.reliability, 0.0);
    }

    #[test]
    fn weights_always_sum_to_one() {
        for priority in [
            PriorityClass::Low,
            PriorityClass::Standard,
            PriorityClass::High,
            PriorityClass::Critical,
        ] {
            let w = RewardWeights::for_priority(priority);
            assert!((w.sum() - 1.0).abs() < 1e-12, "{priority:?}");
        }
    }

    #[test]
    fn criticality_boosts_reliability_and_security() {
        let standard = RewardWeights::for_priority(PriorityClass::Standard);
        let critical = RewardWeights::for_priority(PriorityClass::Critical);
        assert!(critical.reliability > standard.reliability);
        assert!(critical.security > standard.security);
        let low = RewardWeights::for_priority(PriorityClass::Low);
        assert!(low.cost > standard.cost);
    }

    #[test]
    fn composite_stays_in_unit_interval() {
        let w = RewardWeights::for_priority(PriorityClass::Standard);
        let best = RewardObjectives {
            latency: 1.0,
            cost: 1.0,
            quality: 1.0,
            reliability: 1.0,
            security: 1.0,
        };
        let worst = RewardObjectives {
            latency: 0.0,
            cost: 0.0,
            quality: 0.0,
            reliability: 0.0,
            security: 0.0,
        };
        assert!((composite(&best, &w) - 1.0).abs() < 1e-12);
        assert_eq!(composite(&worst, &w), 0.0);
    }

    #[test]
    fn dominance_requires_strict_improvement() {
        let a = RewardObjectives {
            latency: 0.9,
            cost: 0.8,
            quality: 0.9,
            reliability: 0.9,
            security: 0.9,
        };
        let b = RewardObjectives {
            latency: 0.5,
            cost: 0.8,
            quality: 0.9,
            reliability: 0.9,
            security: 0.9,
        };
        assert!(a.dominates(&b));
        assert!(!b.dominates(&a));
        assert!(!a.dominates(&a));
    }
}

//! Arm catalog.
//!
//! Arms discretize the parameter space as depth-bin × shot-bin × backend
//! index. The arm count is a per-template configuration value; the catalog
//! derives each arm's bins from its index deterministically so a learner's
//! statistics stay meaningful across restarts.

use serde::{Deserialize, Serialize};

/// Backend slots an arm can point at (classical, emulator, QPU).
pub const BACKEND_SLOTS: usize = 3;

/// One discrete parameter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmSpec {
    pub id: usize,
    /// Depth multiplier bin in [0.5, 2.0].
    pub depth_scale: f64,
    /// Shot multiplier bin in [0.5, 4.0].
    pub shot_scale: f64,
    /// Preferred backend slot, 0-based.
    pub backend_index: usize,
    /// Normalized parameter vector for logging and serialization.
    pub parameter_vector: Vec<f64>,
}

/// Fixed catalog of `count` arms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmCatalog {
    arms: Vec<ArmSpec>,
}

impl ArmCatalog {
    pub fn new(count: usize) -> Self {
        let count = count.clamp(2, 1000);
        // Split the non-backend dimensions as evenly as possible.
        let per_backend = count.div_ceil(BACKEND_SLOTS).max(1);
        let depth_bins = (per_backend as f64).sqrt().ceil() as usize;
        let shot_bins = per_backend.div_ceil(depth_bins).max(1);

        let arms = (0..count)
            .map(|id| {
                let backend_index = id % BACKEND_SLOTS;
                let rest = id / BACKEND_SLOTS;
                let depth_bin = rest % depth_bins;
                let shot_bin = (rest / depth_bins) % shot_bins;

                let depth_frac = if depth_bins > 1 {
                    depth_bin as f64 / (depth_bins - 1) as f64
                } else {
                    0.0
                };
                let shot_frac = if shot_bins > 1 {
                    shot_bin as f64 / (shot_bins - 1) as f64
                } else {
                    0.0
                };

                ArmSpec {
                    id,
                    depth_scale: 0.5 + 1.5 * depth_frac,
                    shot_scale: 0.5 + 3.5 * shot_frac,
                    backend_index,
                    parameter_vector: vec![
                        depth_frac,
                        shot_frac,
                        backend_index as f64 / (BACKEND_SLOTS - 1) as f64,
                    ],
                }
            })
            .collect();
        Self { arms }
    }

    pub fn len(&self) -> usize {
        self.arms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arms.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<&ArmSpec> {
        self.arms.get(id)
    }

    pub fn arms(&self) -> &[ArmSpec] {
        &self.arms
    }
}

//! Context vectors.
//!
//! Fixed dimension, every feature normalized into [0, 1]. The learner's
//! sufficient statistics are only comparable when the feature layout never
//! changes, so the layout is a const and the builder is the single place that
//! produces vectors.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Context dimension shared by every learner.
pub const CONTEXT_DIM: usize = 12;

/// Normalization ceilings for raw features.
const MAX_DEPTH: f64 = 1000.0;
const MAX_QUBITS: f64 = 128.0;
const MAX_SHOTS: f64 = 1_000_000.0;
const MAX_OPT_LEVEL: f64 = 3.0;
const MAX_GATES: f64 = 100_000.0;
const MAX_LATENCY_MS: f64 = 600_000.0;
const MAX_BACKENDS: f64 = 3.0;

/// Raw observation the context vector is built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub circuit_depth: u32,
    pub qubits: u32,
    pub shots: u64,
    pub optimization_level: u8,
    pub gate_count: u32,
    /// Index of the chosen backend in the preference list.
    pub backend_index: u32,
    /// Rolling mean composite reward in [0, 1].
    pub recent_avg_reward: f64,
    pub recent_avg_latency_ms: f64,
    /// Recent execution success rate in [0, 1].
    pub recent_success_rate: f64,
    /// Current exploration rate in [0, 1].
    pub exploration_rate: f64,
    /// Observations seen, saturating toward 1.
    pub experience: u64,
    pub observed_at: DateTime<Utc>,
}

impl ContextSnapshot {
    /// Build the fixed-layout feature vector, every entry clamped to [0, 1].
    pub fn to_vector(&self) -> Vec<f64> {
        let experience_factor = 1.0 - (-(self.experience as f64) / 100.0).exp();
        let hour = self.observed_at.hour() as f64 + self.observed_at.minute() as f64 / 60.0;
        let diurnal = hour / 24.0;

        let raw = [
            self.circuit_depth as f64 / MAX_DEPTH,
            self.qubits as f64 / MAX_QUBITS,
            self.shots as f64 / MAX_SHOTS,
            self.optimization_level as f64 / MAX_OPT_LEVEL,
            self.gate_count as f64 / MAX_GATES,
            self.backend_index as f64 / MAX_BACKENDS,
            self.recent_avg_reward,
            self.recent_avg_latency_ms / MAX_LATENCY_MS,
            self.recent_success_rate,
            self.exploration_rate,
            experience_factor,
            diurnal,
        ];
        debug_assert_eq!(raw.len(), CONTEXT_DIM);
        raw.iter().map(|v| v.clamp(0.0, 1.0)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot() -> ContextSnapshot {
        ContextSnapshot {
            circuit_depth: 40,
            qubits: 12,
            shots: 10_000,
            optimization_level: 2,
            gate_count: 900,
            backend_index: 1,
            recent_avg_reward: 0.8,
            recent_avg_latency_ms: 1500.0,
            recent_success_rate: 0.95,
            exploration_rate: 0.1,
            experience: 50,
            observed_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn vector_has_fixed_dimension_in_unit_range() {
        let v = snapshot().to_vector();
        assert_eq!(v.len(), CONTEXT_DIM);
        assert!(v.iter().all(|x| (0.0..=1.0).contains(x)));
    }

    #[test]
    fn oversized_features_clamp() {
        let mut s = snapshot();
        s.circuit_depth = 100_000;
        s.recent_avg_latency_ms = f64::MAX;
        let v = s.to_vector();
        assert_eq!(v[0], 1.0);
        assert_eq!(v[7], 1.0);
    }

    #[test]
    fn diurnal_component_tracks_clock() {
        let mut s = snapshot();
        s.observed_at = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(s.to_vector()[11], 0.0);
        s.observed_at = Utc.with_ymd_and_hms(2026, 3, 1, 18, 0, 0).unwrap();
        assert!((s.to_vector()[11] - 0.75).abs() < 1e-9);
    }

    #[test]
    fn experience_saturates() {
        let mut s = snapshot();
        s.experience = 0;
        assert_eq!(s.to_vector()[10], 0.0);
        s.experience = 10_000;
        assert!(s.to_vector()[10] > 0.999);
    }
}

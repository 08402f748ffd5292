//! Bounded adaptation with rollback.
//!
//! Parameter changes are proposed only when enough samples exist, recent
//! improvement clears the threshold, and the cooldown has elapsed. A change is
//! bounded relative to the current value, clipped to the parameter's min/max,
//! and applied atomically with the pre-change reward baseline captured.
//! Rollback restores the prior value after N consecutive rewards below the
//! baseline minus tolerance, or after a CRITICAL violation inside the rollback
//! window.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::OptimizerError;
use qam_core::OptimizerConfig;

/// Risk at or above which automatic rollback is armed.
const RISK_ARM_THRESHOLD: f64 = 0.25;

/// A tunable parameter with hard bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundedParameter {
    pub name: String,
    pub value: f64,
    pub min: f64,
    pub max: f64,
}

impl BoundedParameter {
    pub fn new(name: impl Into<String>, value: f64, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            value: value.clamp(min, max),
            min,
            max,
        }
    }
}

/// Gating and rollback settings, derived from the optimizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptationSettings {
    pub max_parameter_change: f64,
    /// Fraction of the desired delta taken per adaptation step.
    pub learning_rate: f64,
    pub min_samples: usize,
    pub improvement_threshold: f64,
    pub cooldown_secs: i64,
    pub convergence_window: usize,
    /// Reward shortfall vs. baseline that counts against a change.
    pub rollback_tolerance: f64,
    /// Consecutive below-baseline rewards that trigger rollback.
    pub rollback_consecutive: usize,
    /// Window after an applied change in which a CRITICAL violation rolls back.
    pub rollback_window_secs: i64,
}

impl AdaptationSettings {
    pub fn from_config(config: &OptimizerConfig) -> Self {
        Self {
            max_parameter_change: config.max_parameter_change,
            learning_rate: config.learning_rate.clamp(0.0, 1.0),
            min_samples: config.min_samples,
            improvement_threshold: config.improvement_threshold,
            cooldown_secs: config.cooldown_seconds as i64,
            convergence_window: config.convergence_window.max(2),
            rollback_tolerance: 0.05,
            rollback_consecutive: 3,
            rollback_window_secs: 3600,
        }
    }
}

/// What happened to the parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdaptationEventKind {
    Applied,
    RollbackExecuted,
    Suppressed,
}

/// Adaptation event for the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptationEvent {
    pub kind: AdaptationEventKind,
    pub parameter: String,
    pub previous: f64,
    pub applied: f64,
    pub risk: f64,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// A change that passed gating, not yet applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedChange {
    pub parameter: String,
    pub previous: f64,
    /// Desired target before bounding.
    pub desired: f64,
    /// Target after the relative bound and min/max clip.
    pub bounded: f64,
    /// Aggregate of relative magnitude and update confidence, in [0, 1].
    pub risk: f64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AppliedChange {
    parameter: String,
    previous: f64,
    applied: f64,
    baseline_reward: f64,
    armed: bool,
    at: DateTime<Utc>,
}

/// Per-(template, tenant) adaptation state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptationManager {
    settings: AdaptationSettings,
    parameters: BTreeMap<String, BoundedParameter>,
    samples: u64,
    recent_rewards: VecDeque<f64>,
    last_adaptation_at: Option<DateTime<Utc>>,
    pending: Option<AppliedChange>,
    consecutive_below: usize,
    events: Vec<AdaptationEvent>,
}

impl AdaptationManager {
    pub fn new(settings: AdaptationSettings, parameters: Vec<BoundedParameter>) -> Self {
        Self {
            settings,
            parameters: parameters
                .into_iter()
                .map(|p| (p.name.clone(), p))
                .collect(),
            samples: 0,
            recent_rewards: VecDeque::new(),
            last_adaptation_at: None,
            pending: None,
            consecutive_below: 0,
            events: Vec::new(),
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&BoundedParameter> {
        self.parameters.get(name)
    }

    pub fn parameters(&self) -> Vec<BoundedParameter> {
        self.parameters.values().cloned().collect()
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn events(&self) -> &[AdaptationEvent] {
        &self.events
    }

    /// Mean reward over the most recent half of the window minus the mean of
    /// the preceding half. Positive when things are getting better.
    pub fn recent_improvement(&self) -> f64 {
        let window = self.settings.convergence_window;
        if self.recent_rewards.len() < window {
            return 0.0;
        }
        let recent: Vec<f64> = self
            .recent_rewards
            .iter()
            .rev()
            .take(window)
            .copied()
            .collect();
        let half = window / 2;
        let newer: f64 = recent[..half].iter().sum::<f64>() / half as f64;
        let older: f64 = recent[half..].iter().sum::<f64>() / (window - half) as f64;
        newer - older
    }

    /// Record a composite reward. Returns a rollback event when the pending
    /// change just failed its reward check.
    pub fn record_reward(&mut self, reward: f64, at: DateTime<Utc>) -> Option<AdaptationEvent> {
        let reward = reward.clamp(0.0, 1.0);
        self.samples += 1;
        self.recent_rewards.push_back(reward);
        let cap = self.settings.convergence_window * 2;
        while self.recent_rewards.len() > cap {
            self.recent_rewards.pop_front();
        }

        let pending = self.pending.as_ref()?;
        if !pending.armed {
            return None;
        }
        if reward < pending.baseline_reward - self.settings.rollback_tolerance {
            self.consecutive_below += 1;
        } else {
            self.consecutive_below = 0;
        }
        if self.consecutive_below >= self.settings.rollback_consecutive {
            return Some(self.rollback(at, "consecutive rewards below pre-change baseline"));
        }
        None
    }

    /// A CRITICAL violation rolls back any change applied inside the window.
    pub fn record_critical_violation(&mut self, at: DateTime<Utc>) -> Option<AdaptationEvent> {
        let pending = self.pending.as_ref()?;
        if at - pending.at <= Duration::seconds(self.settings.rollback_window_secs) {
            Some(self.rollback(at, "critical SLA violation inside rollback window"))
        } else {
            None
        }
    }

    /// Gate a proposed change. `confidence` is the learner's confidence in the
    /// update, in [0, 1].
    pub fn propose(
        &self,
        parameter: &str,
        desired: f64,
        confidence: f64,
        at: DateTime<Utc>,
    ) -> Result<Option<ProposedChange>, OptimizerError> {
        let current = self.parameters.get(parameter).ok_or_else(|| {
            OptimizerError::LearnerDegenerate(format!("unknown parameter '{parameter}'"))
        })?;

        if (self.samples as usize) < self.settings.min_samples {
            return Ok(None);
        }
        if self.recent_improvement() < self.settings.improvement_threshold {
            return Ok(None);
        }
        if let Some(last) = self.last_adaptation_at {
            if at - last < Duration::seconds(self.settings.cooldown_secs) {
                return Ok(None);
            }
        }

        // Learning-rate damping, relative bound, then hard clip.
        let scale = current.value.abs().max(1e-9);
        let step = (desired - current.value) * self.settings.learning_rate;
        let max_delta = self.settings.max_parameter_change * scale;
        let delta = step.clamp(-max_delta, max_delta);
        let bounded = (current.value + delta).clamp(current.min, current.max);
        if (bounded - current.value).abs() < 1e-12 {
            return Ok(None);
        }

        let relative_magnitude = ((bounded - current.value).abs() / scale).min(1.0);
        let risk = (0.5 * relative_magnitude + 0.5 * (1.0 - confidence.clamp(0.0, 1.0)))
            .clamp(0.0, 1.0);

        Ok(Some(ProposedChange {
            parameter: parameter.to_string(),
            previous: current.value,
            desired,
            bounded,
            risk,
            at,
        }))
    }

    /// Apply a gated change atomically, capturing the pre-change baseline.
    pub fn apply(&mut self, change: ProposedChange) -> AdaptationEvent {
        let baseline = if self.recent_rewards.is_empty() {
            0.0
        } else {
            self.recent_rewards.iter().sum::<f64>() / self.recent_rewards.len() as f64
        };
        let armed = change.risk >= RISK_ARM_THRESHOLD;
        if let Some(p) = self.parameters.get_mut(&change.parameter) {
            p.value = change.bounded;
        }
        self.last_adaptation_at = Some(change.at);
        self.consecutive_below = 0;
        self.pending = Some(AppliedChange {
            parameter: change.parameter.clone(),
            previous: change.previous,
            applied: change.bounded,
            baseline_reward: baseline,
            armed,
            at: change.at,
        });

        let event = AdaptationEvent {
            kind: AdaptationEventKind::Applied,
            parameter: change.parameter,
            previous: change.previous,
            applied: change.bounded,
            risk: change.risk,
            reason: format!(
                "applied with baseline {baseline:.3}, rollback {}",
                if armed { "armed" } else { "not armed" }
            ),
            at: change.at,
        };
        info!(
            target: "qam::optimizer",
            parameter = %event.parameter,
            previous = event.previous,
            applied = event.applied,
            risk = event.risk,
            "Adaptation applied"
        );
        self.events.push(event.clone());
        event
    }

    fn rollback(&mut self, at: DateTime<Utc>, reason: &str) -> AdaptationEvent {
        let pending = self.pending.take().expect("rollback requires pending change");
        if let Some(p) = self.parameters.get_mut(&pending.parameter) {
            p.value = pending.previous;
        }
        self.consecutive_below = 0;
        let event = AdaptationEvent {
            kind: AdaptationEventKind::RollbackExecuted,
            parameter: pending.parameter.clone(),
            previous: pending.applied,
            applied: pending.previous,
            risk: 0.0,
            reason: reason.to_string(),
            at,
        };
        warn!(
            target: "qam::optimizer",
            parameter = %event.parameter,
            restored = event.applied,
            reason,
            "Adaptation rolled back"
        );
        self.events.push(event.clone());
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> AdaptationSettings {
        AdaptationSettings {
            max_parameter_change: 1.0,
            learning_rate: 1.0,
            min_samples: 4,
            improvement_threshold: 0.0,
            cooldown_secs: 0,
            convergence_window: 4,
            rollback_tolerance: 0.05,
            rollback_consecutive: 3,
            rollback_window_secs: 3600,
        }
    }

    fn manager() -> AdaptationManager {
        AdaptationManager::new(
            settings(),
            vec![BoundedParameter::new("depth", 5.0, 1.0, 20.0)],
        )
    }

    fn feed(manager: &mut AdaptationManager, rewards: &[f64]) {
        let now = Utc::now();
        for r in rewards {
            manager.record_reward(*r, now);
        }
    }

    #[test]
    fn proposal_gated_on_min_samples() {
        let manager = manager();
        let none = manager
            .propose("depth", 8.0, 0.9, Utc::now())
            .unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn proposal_bounded_and_clipped() {
        let mut manager = AdaptationManager::new(
            AdaptationSettings {
                max_parameter_change: 0.2,
                ..settings()
            },
            vec![BoundedParameter::new("depth", 5.0, 1.0, 20.0)],
        );
        feed(&mut manager, &[0.5, 0.5, 0.6, 0.7]);
        let change = manager
            .propose("depth", 8.0, 0.9, Utc::now())
            .unwrap()
            .unwrap();
        // |Δ| ≤ 0.2 × 5.0 = 1.0 even though 8.0 was desired.
        assert!((change.bounded - 6.0).abs() < 1e-9);
        assert_eq!(change.previous, 5.0);
    }

    #[test]
    fn learning_rate_damps_the_step() {
        let mut manager = AdaptationManager::new(
            AdaptationSettings {
                learning_rate: 0.1,
                ..settings()
            },
            vec![BoundedParameter::new("depth", 5.0, 1.0, 20.0)],
        );
        feed(&mut manager, &[0.5, 0.5, 0.6, 0.7]);
        let change = manager
            .propose("depth", 15.0, 0.9, Utc::now())
            .unwrap()
            .unwrap();
        // Step = 0.1 × (15 − 5) = 1.0.
        assert!((change.bounded - 6.0).abs() < 1e-9);
    }

    #[test]
    fn apply_is_atomic_and_captures_baseline() {
        let mut manager = manager();
        feed(&mut manager, &[0.8, 0.8, 0.8, 0.8]);
        let change = manager
            .propose("depth", 8.0, 0.9, Utc::now())
            .unwrap()
            .unwrap();
        let event = manager.apply(change);
        assert_eq!(event.kind, AdaptationEventKind::Applied);
        assert_eq!(manager.parameter("depth").unwrap().value, 8.0);
        assert!(event.reason.contains("baseline 0.800"));
    }

    #[test]
    fn consecutive_bad_rewards_roll_back() {
        let mut manager = manager();
        feed(&mut manager, &[0.8, 0.8, 0.8, 0.8]);
        let change = manager
            .propose("depth", 8.0, 0.5, Utc::now())
            .unwrap()
            .unwrap();
        assert!(change.risk >= 0.25, "risk {} should arm rollback", change.risk);
        manager.apply(change);

        let now = Utc::now();
        assert!(manager.record_reward(0.5, now).is_none());
        assert!(manager.record_reward(0.5, now).is_none());
        let rollback = manager.record_reward(0.5, now).expect("third strike");
        assert_eq!(rollback.kind, AdaptationEventKind::RollbackExecuted);
        assert_eq!(manager.parameter("depth").unwrap().value, 5.0);
    }

    #[test]
    fn good_rewards_keep_the_change() {
        let mut manager = manager();
        feed(&mut manager, &[0.8, 0.8, 0.8, 0.8]);
        let change = manager
            .propose("depth", 8.0, 0.5, Utc::now())
            .unwrap()
            .unwrap();
        manager.apply(change);
        let now = Utc::now();
        for _ in 0..10 {
            assert!(manager.record_reward(0.85, now).is_none());
        }
        assert_eq!(manager.parameter("depth").unwrap().value, 8.0);
    }

    #[test]
    fn critical_violation_rolls_back_inside_window() {
        let mut manager = manager();
        feed(&mut manager, &[0.8, 0.8, 0.8, 0.8]);
        let change = manager
            .propose("depth", 8.0, 0.9, Utc::now())
            .unwrap()
            .unwrap();
        manager.apply(change);
        let rollback = manager
            .record_critical_violation(Utc::now())
            .expect("rollback on critical violation");
        assert_eq!(rollback.kind, AdaptationEventKind::RollbackExecuted);
        assert_eq!(manager.parameter("depth").unwrap().value, 5.0);
        // No pending change left: a second violation is a no-op.
        assert!(manager.record_critical_violation(Utc::now()).is_none());
    }

    #[test]
    fn cooldown_blocks_back_to_back_changes() {
        let mut manager = AdaptationManager::new(
            AdaptationSettings {
                cooldown_secs: 300,
                ..settings()
            },
            vec![BoundedParameter::new("depth", 5.0, 1.0, 20.0)],
        );
        feed(&mut manager, &[0.5, 0.5, 0.7, 0.8]);
        let now = Utc::now();
        let change = manager.propose("depth", 8.0, 0.9, now).unwrap().unwrap();
        manager.apply(change);
        feed(&mut manager, &[0.5, 0.5, 0.7, 0.8]);
        assert!(manager
            .propose("depth", 10.0, 0.9, now + Duration::seconds(10))
            .unwrap()
            .is_none());
        assert!(manager
            .propose("depth", 10.0, 0.9, now + Duration::seconds(301))
            .unwrap()
            .is_some());
    }
}

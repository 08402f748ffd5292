//! The adaptive optimizer.
//!
//! One learner state per (template, tenant): bandit learner, arm catalog,
//! Pareto window, and adaptation manager. State is mutated only through this
//! type; readers get copies. Degenerate learner updates are suppressed and
//! logged, and current parameters stay in force.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::adaptation::{
    AdaptationEvent, AdaptationManager, AdaptationSettings, BoundedParameter, ProposedChange,
};
use crate::arms::{ArmCatalog, ArmSpec};
use crate::context::ContextSnapshot;
use crate::error::OptimizerError;
use crate::learner::Learner;
use crate::pareto::{FrontMetrics, ParetoWindow};
use crate::reward::{composite, RewardObjectives, RewardWeights};
use qam_core::{OptimizerConfig, PriorityClass};

/// Serializable learner state for one (template, tenant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnerState {
    pub template_id: String,
    pub tenant_id: String,
    pub learner: Learner,
    pub catalog: ArmCatalog,
    pub pareto: ParetoWindow,
    pub adaptation: AdaptationManager,
    pub observations: u64,
}

/// Arm recommendation for the next execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub arm: ArmSpec,
    pub expected_reward: f64,
    pub parameters: Vec<BoundedParameter>,
}

/// Outcome of feeding one observation.
#[derive(Debug, Clone)]
pub struct ObservationOutcome {
    pub composite: f64,
    /// Rollback fired by this observation, if any.
    pub rollback: Option<AdaptationEvent>,
}

/// Owns every learner keyed by (template, tenant).
pub struct AdaptiveOptimizer {
    config: OptimizerConfig,
    states: DashMap<(String, String), LearnerState>,
}

impl AdaptiveOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            config,
            states: DashMap::new(),
        }
    }

    fn key(template_id: &str, tenant_id: &str) -> (String, String) {
        (template_id.to_string(), tenant_id.to_string())
    }

    /// Create the learner for (template, tenant) if absent, seeding the
    /// adaptation manager with the template's tunable parameters.
    pub fn ensure_learner(
        &self,
        template_id: &str,
        tenant_id: &str,
        parameters: Vec<BoundedParameter>,
    ) {
        let key = Self::key(template_id, tenant_id);
        self.states.entry(key).or_insert_with(|| {
            debug!(
                target: "qam::optimizer",
                template = template_id,
                tenant = tenant_id,
                algorithm = self.config.algorithm.as_str(),
                arms = self.config.arm_count,
                "Learner created"
            );
            LearnerState {
                template_id: template_id.to_string(),
                tenant_id: tenant_id.to_string(),
                learner: Learner::from_config(&self.config),
                catalog: ArmCatalog::new(self.config.arm_count),
                pareto: ParetoWindow::default(),
                adaptation: AdaptationManager::new(
                    AdaptationSettings::from_config(&self.config),
                    parameters,
                ),
                observations: 0,
            }
        });
    }

    pub fn learner_count(&self) -> usize {
        self.states.len()
    }

    /// (template, tenant) keys of every live learner.
    pub fn learner_keys(&self) -> Vec<(String, String)> {
        self.states.iter().map(|s| s.key().clone()).collect()
    }

    /// Recommend the next arm for the context.
    pub fn recommend(
        &self,
        template_id: &str,
        tenant_id: &str,
        snapshot: &ContextSnapshot,
    ) -> Result<Recommendation, OptimizerError> {
        let key = Self::key(template_id, tenant_id);
        let mut state = self.states.get_mut(&key).ok_or_else(|| {
            OptimizerError::LearnerDegenerate(format!(
                "no learner for ({template_id}, {tenant_id})"
            ))
        })?;
        let x = snapshot.to_vector();
        let arm_index = state.learner.select(&x)?;
        let arm = state
            .catalog
            .get(arm_index)
            .ok_or(OptimizerError::UnknownArm {
                index: arm_index,
                count: state.catalog.len(),
            })?
            .clone();
        let expected_reward = state.learner.mean_reward(arm_index);
        Ok(Recommendation {
            arm,
            expected_reward,
            parameters: state.adaptation.parameters(),
        })
    }

    /// Feed an observed multi-objective reward for an executed arm.
    ///
    /// A degenerate learner update is suppressed (logged, parameters kept);
    /// the Pareto window and adaptation bookkeeping still advance.
    pub fn observe(
        &self,
        template_id: &str,
        tenant_id: &str,
        arm_index: usize,
        snapshot: &ContextSnapshot,
        objectives: RewardObjectives,
        priority: PriorityClass,
        at: DateTime<Utc>,
    ) -> Result<ObservationOutcome, OptimizerError> {
        let key = Self::key(template_id, tenant_id);
        let mut state = self.states.get_mut(&key).ok_or_else(|| {
            OptimizerError::LearnerDegenerate(format!(
                "no learner for ({template_id}, {tenant_id})"
            ))
        })?;

        let weights = RewardWeights::for_priority(priority);
        let scalar = composite(&objectives, &weights);
        let x = snapshot.to_vector();

        if let Err(e) = state.learner.update(arm_index, &x, scalar) {
            match e {
                OptimizerError::LearnerDegenerate(ref detail) => {
                    warn!(
                        target: "qam::optimizer",
                        template = template_id,
                        tenant = tenant_id,
                        detail = %detail,
                        "Degenerate learner update suppressed"
                    );
                }
                other => return Err(other),
            }
        }

        state
            .pareto
            .push(objectives, scalar, at.timestamp_millis());
        state.observations += 1;
        let rollback = state.adaptation.record_reward(scalar, at);

        Ok(ObservationOutcome {
            composite: scalar,
            rollback,
        })
    }

    /// Propose and apply a bounded parameter change, subject to gating.
    pub fn try_adapt(
        &self,
        template_id: &str,
        tenant_id: &str,
        parameter: &str,
        desired: f64,
        confidence: f64,
        at: DateTime<Utc>,
    ) -> Result<Option<AdaptationEvent>, OptimizerError> {
        let key = Self::key(template_id, tenant_id);
        let mut state = self.states.get_mut(&key).ok_or_else(|| {
            OptimizerError::LearnerDegenerate(format!(
                "no learner for ({template_id}, {tenant_id})"
            ))
        })?;
        let proposal: Option<ProposedChange> =
            state.adaptation.propose(parameter, desired, confidence, at)?;
        Ok(proposal.map(|change| state.adaptation.apply(change)))
    }

    /// Report a CRITICAL violation; rolls back a fresh adaptation if one is
    /// inside its rollback window.
    pub fn critical_violation(
        &self,
        template_id: &str,
        tenant_id: &str,
        at: DateTime<Utc>,
    ) -> Option<AdaptationEvent> {
        let key = Self::key(template_id, tenant_id);
        let mut state = self.states.get_mut(&key)?;
        state.adaptation.record_critical_violation(at)
    }

    /// Current adapted parameters, as copies.
    pub fn parameters(&self, template_id: &str, tenant_id: &str) -> Vec<BoundedParameter> {
        self.states
            .get(&Self::key(template_id, tenant_id))
            .map(|s| s.adaptation.parameters())
            .unwrap_or_default()
    }

    pub fn front_metrics(&self, template_id: &str, tenant_id: &str) -> Option<FrontMetrics> {
        self.states
            .get(&Self::key(template_id, tenant_id))
            .map(|s| s.pareto.front_metrics())
    }

    /// Serialize a learner's full state for the snapshot store.
    pub fn snapshot(&self, template_id: &str, tenant_id: &str) -> Option<Vec<u8>> {
        self.states
            .get(&Self::key(template_id, tenant_id))
            .and_then(|s| serde_json::to_vec(s.value()).ok())
    }

    /// Restore a learner from a snapshot produced by [`snapshot`](Self::snapshot).
    pub fn load_snapshot(&self, bytes: &[u8]) -> Result<(), OptimizerError> {
        let state: LearnerState = serde_json::from_slice(bytes)
            .map_err(|e| OptimizerError::LearnerDegenerate(format!("snapshot decode: {e}")))?;
        let key = Self::key(&state.template_id, &state.tenant_id);
        self.states.insert(key, state);
        Ok(())
    }
}

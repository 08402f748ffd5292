//! Remediation planning.
//!
//! Plans are deterministic from the violated metric: an ordered action list,
//! each step paired with a rollback plan armed on failure, score regression,
//! or timeout.

use serde::{Deserialize, Serialize};

use qam_core::registry::SlaMetric;

/// A corrective action the supervisor can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemediationAction {
    BackendSwitch,
    ErrorMitigation,
    CircuitSimplification,
    ShotIncrease,
    RecalibrationRequest,
    ParameterReset,
}

impl RemediationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BackendSwitch => "BACKEND_SWITCH",
            Self::ErrorMitigation => "ERROR_MITIGATION",
            Self::CircuitSimplification => "CIRCUIT_SIMPLIFICATION",
            Self::ShotIncrease => "SHOT_INCREASE",
            Self::RecalibrationRequest => "RECALIBRATION_REQUEST",
            Self::ParameterReset => "PARAMETER_RESET",
        }
    }
}

/// Conditions that trigger the rollback plan of an applied step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackTrigger {
    RemediationFailed,
    ScoreRegressed,
    Timeout,
}

/// One step of a remediation plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationStep {
    pub action: RemediationAction,
    pub rollback_triggers: Vec<RollbackTrigger>,
}

impl RemediationStep {
    fn new(action: RemediationAction) -> Self {
        Self {
            action,
            rollback_triggers: vec![
                RollbackTrigger::RemediationFailed,
                RollbackTrigger::ScoreRegressed,
                RollbackTrigger::Timeout,
            ],
        }
    }
}

/// Ordered remediation plan for one violated metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationPlan {
    pub metric: SlaMetric,
    pub steps: Vec<RemediationStep>,
}

impl RemediationPlan {
    /// The deterministic plan for a violated metric.
    pub fn for_metric(metric: SlaMetric) -> Self {
        use RemediationAction::*;
        let actions: &[RemediationAction] = match metric {
            SlaMetric::ErrorRate => &[BackendSwitch, ErrorMitigation, CircuitSimplification],
            SlaMetric::Fidelity => &[ErrorMitigation, BackendSwitch, ShotIncrease],
            SlaMetric::SuccessProbability => &[ShotIncrease, ErrorMitigation, BackendSwitch],
            SlaMetric::QuantumVolume => &[BackendSwitch, CircuitSimplification],
            SlaMetric::GateErrorRate => &[RecalibrationRequest, BackendSwitch],
            SlaMetric::CoherenceTime => &[BackendSwitch, RecalibrationRequest],
        };
        Self {
            metric,
            steps: actions.iter().copied().map(RemediationStep::new).collect(),
        }
    }

    pub fn first_action(&self) -> Option<RemediationAction> {
        self.steps.first().map(|s| s.action)
    }
}

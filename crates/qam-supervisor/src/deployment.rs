//! Deployment and execution records.
//!
//! A deployment owns its executions as child records; executions refer back by
//! id only. Transition legality lives on the shared state enums; this module
//! adds the entity data and the per-deployment metric aggregates.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use qam_core::{
    prefixed_id, BackendKind, DeploymentState, ExecutionStatus, RawResults, Reservation,
    TenantContext,
};
use qam_policy::Actor;
use qam_core::registry::SlaRequirement;

/// Input to `deploy`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployInput {
    pub template_id: String,
    pub tenant: TenantContext,
    pub parameters: BTreeMap<String, serde_json::Value>,
    /// Overrides the template's preferred backend kinds when set.
    #[serde(default)]
    pub backend_preferences: Option<Vec<BackendKind>>,
    /// Destination jurisdiction for the policy gate.
    pub destination: String,
    pub end_use: String,
    pub actor: Actor,
    /// Allow more than one in-flight execution.
    #[serde(default)]
    pub allow_concurrent: bool,
    /// Replaces the template's SLA requirements when set.
    #[serde(default)]
    pub sla_overrides: Option<Vec<SlaRequirement>>,
}

/// Per-execution request parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    pub shots: u64,
    pub optimization_level: u8,
    pub error_mitigation: bool,
    /// Hard deadline for the backend round-trip.
    pub deadline_ms: u64,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            shots: 1000,
            optimization_level: 1,
            error_mitigation: false,
            deadline_ms: 60_000,
        }
    }
}

/// Timing observed for one execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionPerf {
    pub queue_ms: u64,
    pub execution_ms: u64,
}

/// One run of a deployment against a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub deployment_id: String,
    pub backend_selected: Option<String>,
    pub shots: u64,
    pub optimization_level: u8,
    pub error_mitigation: bool,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub results: Option<RawResults>,
    /// Correctness score from SLA validation, in [0, 1].
    #[serde(default)]
    pub correctness: Option<f64>,
    #[serde(default)]
    pub perf: ExecutionPerf,
    #[serde(default)]
    pub cost: f64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Execution {
    pub fn new(deployment_id: &str, config: &ExecConfig) -> Self {
        Self {
            id: prefixed_id("exe"),
            deployment_id: deployment_id.to_string(),
            backend_selected: None,
            shots: config.shots,
            optimization_level: config.optimization_level,
            error_mitigation: config.error_mitigation,
            status: ExecutionStatus::Queued,
            results: None,
            correctness: None,
            perf: ExecutionPerf::default(),
            cost: 0.0,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Move to `next` if legal; terminal states absorb everything else.
    pub fn set_status(&mut self, next: ExecutionStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        true
    }
}

/// Running aggregates over a deployment's executions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentMetrics {
    pub executions: u64,
    pub successes: u64,
    pub total_cost: f64,
    pub avg_execution_ms: f64,
}

impl DeploymentMetrics {
    pub fn record(&mut self, success: bool, execution_ms: u64, cost: f64) {
        self.executions += 1;
        if success {
            self.successes += 1;
        }
        self.total_cost += cost;
        let n = self.executions as f64;
        self.avg_execution_ms += (execution_ms as f64 - self.avg_execution_ms) / n;
    }

    pub fn success_rate(&self) -> f64 {
        if self.executions == 0 {
            1.0
        } else {
            self.successes as f64 / self.executions as f64
        }
    }
}

/// A per-tenant instantiation of a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub template_id: String,
    pub tenant: TenantContext,
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub backend_preferences: Vec<BackendKind>,
    pub allow_concurrent: bool,
    pub destination: String,
    pub end_use: String,
    /// SLA requirements replacing the template's when set at deploy time.
    #[serde(default)]
    pub sla_overrides: Option<Vec<SlaRequirement>>,
    pub agreement_id: Option<String>,
    pub reservation: Option<Reservation>,
    pub approval_id: Option<String>,
    pub state: DeploymentState,
    pub executions: Vec<Execution>,
    #[serde(default)]
    pub metrics: DeploymentMetrics,
    /// Last failure description, for user-visible error messages.
    #[serde(default)]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deployment {
    pub fn new(input: &DeployInput, backend_preferences: Vec<BackendKind>) -> Self {
        let now = Utc::now();
        Self {
            id: prefixed_id("dep"),
            template_id: input.template_id.clone(),
            tenant: input.tenant.clone(),
            parameters: input.parameters.clone(),
            backend_preferences,
            allow_concurrent: input.allow_concurrent,
            destination: input.destination.clone(),
            end_use: input.end_use.clone(),
            sla_overrides: input.sla_overrides.clone(),
            agreement_id: None,
            reservation: None,
            approval_id: None,
            state: DeploymentState::Pending,
            executions: Vec::new(),
            metrics: DeploymentMetrics::default(),
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn execution(&self, execution_id: &str) -> Option<&Execution> {
        self.executions.iter().find(|e| e.id == execution_id)
    }

    pub fn active_execution_count(&self) -> usize {
        self.executions
            .iter()
            .filter(|e| !e.status.is_terminal())
            .count()
    }
}

//! The deployment supervisor.
//!
//! Composes the template registry, policy gate, approval workflow, reservation
//! ledger, backend selector, SLA engine, adaptive optimizer, and the receipt
//! log. A deployment's transitions are linearized through its record here;
//! different deployments advance concurrently.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::deployment::{DeployInput, Deployment, ExecConfig, Execution};
use crate::error::SupervisorError;
use crate::executor::{run_with_fallback, RunOutcome};
use qam_core::registry::Template;
use qam_core::{
    AuditLog, BackendKind, BackendSelector, CircuitSpec, DeploymentState, EventBus,
    ExecutionStatus, MetricBuffer, MetricPoint, MetricSink, NotificationSink, QamConfig,
    QamEvent, QamStore, ReservationLedger, ReservationOutcome, Severity, SubmitOptions,
    TemplateRegistry,
};
use qam_optimizer::{AdaptiveOptimizer, BoundedParameter, ContextSnapshot, RewardObjectives, RewardScales};
use qam_policy::{
    ApprovalStatus, ApprovalTransition, ApprovalWorkflow, PolicyError, PolicyGate,
    PolicyOutcome, ReviewerVote,
};
use qam_sla::{
    identify_violations, validate, AlertManager, ComplianceTracker, ExecutionEvidence,
    SlaAgreement, SlaReport, Violation,
};

/// Initial backoff for contended reservations.
const ALLOCATION_BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Backoff cap for contended reservations.
const ALLOCATION_BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Actor recorded on engine-initiated receipts.
const ENGINE_ACTOR: &str = "supervisor";

/// Result of one execution round-trip.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub execution: Execution,
    pub report: SlaReport,
    pub violations: Vec<Violation>,
}

/// Point-in-time engine status snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub deployments_by_state: BTreeMap<String, usize>,
    pub pending_approvals: usize,
    pub reservation_quantum_minutes_in_use: f64,
    pub learner_count: usize,
    pub alert_suppressed_total: u64,
}

pub struct DeploymentSupervisor {
    config: QamConfig,
    registry: Arc<TemplateRegistry>,
    gate: Arc<PolicyGate>,
    approvals: Arc<ApprovalWorkflow>,
    ledger: Arc<ReservationLedger>,
    selector: Arc<BackendSelector>,
    compliance: Arc<ComplianceTracker>,
    alerts: Arc<AlertManager>,
    optimizer: Arc<AdaptiveOptimizer>,
    audit: Arc<AuditLog>,
    store: Arc<QamStore>,
    events: EventBus,
    metric_buffer: MetricBuffer,
    metric_sink: Arc<dyn MetricSink>,
    deployments: DashMap<String, Deployment>,
    exec_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl DeploymentSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: QamConfig,
        registry: Arc<TemplateRegistry>,
        gate: Arc<PolicyGate>,
        selector: Arc<BackendSelector>,
        notification_sink: Arc<dyn NotificationSink>,
        metric_sink: Arc<dyn MetricSink>,
        store: QamStore,
    ) -> Self {
        let events = EventBus::new();
        let store = Arc::new(store);
        let alerts = Arc::new(AlertManager::new(
            &config.sla,
            notification_sink,
            events.clone(),
        ));
        Self {
            approvals: Arc::new(ApprovalWorkflow::new(config.approval.clone())),
            ledger: Arc::new(ReservationLedger::new(&config.reservation)),
            compliance: Arc::new(ComplianceTracker::new(&config.sla)),
            optimizer: Arc::new(AdaptiveOptimizer::new(config.optimizer.clone())),
            audit: Arc::new(AuditLog::new(store.clone())),
            store,
            metric_buffer: MetricBuffer::new(4096),
            metric_sink,
            alerts,
            events,
            config,
            registry,
            gate,
            selector,
            deployments: DashMap::new(),
            exec_locks: DashMap::new(),
        }
    }

    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    pub fn audit(&self) -> Arc<AuditLog> {
        self.audit.clone()
    }

    pub fn approvals(&self) -> Arc<ApprovalWorkflow> {
        self.approvals.clone()
    }

    pub fn compliance(&self) -> Arc<ComplianceTracker> {
        self.compliance.clone()
    }

    pub fn alerts(&self) -> Arc<AlertManager> {
        self.alerts.clone()
    }

    pub fn optimizer(&self) -> Arc<AdaptiveOptimizer> {
        self.optimizer.clone()
    }

    pub fn ledger(&self) -> Arc<ReservationLedger> {
        self.ledger.clone()
    }

    pub fn deployment(&self, id: &str) -> Result<Deployment, SupervisorError> {
        self.deployments
            .get(id)
            .map(|d| d.clone())
            .ok_or_else(|| SupervisorError::DeploymentNotFound(id.to_string()))
    }

    // -----------------------------------------------------------------------
    // Deploy
    // -----------------------------------------------------------------------

    /// Run the deployment pipeline: CONFIGURING → VALIDATING_EXPORT_CONTROL →
    /// ALLOCATING_RESOURCES → DEPLOYED.
    ///
    /// A manual-review decision leaves the deployment parked in
    /// `VALIDATING_EXPORT_CONTROL` with a pending approval; the monitoring
    /// loop (or an explicit vote) moves it on.
    pub async fn deploy(&self, input: DeployInput) -> Result<Deployment, SupervisorError> {
        let template = self.registry.get_deployable(&input.template_id)?;

        let preferences = input
            .backend_preferences
            .clone()
            .unwrap_or_else(|| template.preferred_backends());
        let deployment = Deployment::new(&input, preferences.clone());
        let deployment_id = deployment.id.clone();
        self.deployments
            .insert(deployment_id.clone(), deployment);
        self.append_receipt(
            &deployment_id,
            "deployment_created",
            json!({"template": input.template_id, "tenant": input.tenant.tenant_id}),
        );

        // CONFIGURING: parameter and backend-preference checks.
        self.set_state(&deployment_id, DeploymentState::Configuring)?;
        if let Err(e) = self.configure(&deployment_id, &template, &input, &preferences) {
            self.fail_deployment(&deployment_id, &e.to_string());
            return Err(e);
        }

        // VALIDATING_EXPORT_CONTROL.
        self.set_state(&deployment_id, DeploymentState::ValidatingExportControl)?;
        let decision = match self
            .gate
            .evaluate(&template, &input.actor, &input.destination, &input.end_use)
            .await
        {
            Ok(decision) => decision,
            Err(e) => {
                self.fail_deployment(&deployment_id, &e.to_string());
                return Err(e.into());
            }
        };
        self.append_receipt(
            &deployment_id,
            "policy_decision",
            json!({
                "outcome": decision.outcome,
                "level": decision.level.as_str(),
                "reasoning": decision.reasoning,
            }),
        );

        match decision.outcome {
            PolicyOutcome::Denied => {
                let err = PolicyError::PolicyDenied {
                    subject_id: deployment_id.clone(),
                    reason: decision
                        .restrictions
                        .first()
                        .cloned()
                        .unwrap_or_else(|| "policy denied".into()),
                };
                self.fail_deployment(&deployment_id, &err.to_string());
                return Err(err.into());
            }
            PolicyOutcome::NeedsApproval => {
                let approval = self
                    .approvals
                    .open(Some(deployment_id.clone()), decision.required_approvals);
                let approval_id = approval.id.clone();
                self.with_deployment_mut(&deployment_id, |d| {
                    d.approval_id = Some(approval_id.clone());
                })?;
                self.events.publish(QamEvent::ApprovalTransition {
                    approval_id: approval.id.clone(),
                    deployment_id: Some(deployment_id.clone()),
                    from: "NONE".into(),
                    to: "PENDING".into(),
                });
                self.append_receipt(
                    &deployment_id,
                    "approval_opened",
                    json!({"approval": approval.id, "valid_until": approval.valid_until}),
                );
                info!(
                    target: "qam::supervisor",
                    deployment = %deployment_id,
                    approval = %approval.id,
                    "Deployment parked pending manual approval"
                );
                return self.deployment(&deployment_id);
            }
            PolicyOutcome::AutoApproved => {}
        }

        self.allocate_and_deploy(&deployment_id, &template).await?;
        self.deployment(&deployment_id)
    }

    fn configure(
        &self,
        deployment_id: &str,
        template: &Template,
        input: &DeployInput,
        preferences: &[BackendKind],
    ) -> Result<(), SupervisorError> {
        let mut parameters = input.parameters.clone();
        qam_core::apply_defaults(&template.parameter_schema, &mut parameters);
        qam_core::validate_parameters(&template.parameter_schema, &parameters)?;

        if preferences.is_empty() {
            return Err(SupervisorError::Core(qam_core::CoreError::ParameterInvalid {
                name: "backend_preferences".into(),
                reason: "no backend kinds declared".into(),
            }));
        }
        let supported = template.preferred_backends();
        if let Some(unsupported) = preferences.iter().find(|k| !supported.contains(k)) {
            return Err(SupervisorError::Core(qam_core::CoreError::ParameterInvalid {
                name: "backend_preferences".into(),
                reason: format!(
                    "{} is not in any SLA fallback chain of this template",
                    unsupported.as_str()
                ),
            }));
        }

        self.with_deployment_mut(deployment_id, |d| {
            d.parameters = parameters;
        })?;
        Ok(())
    }

    /// ALLOCATING_RESOURCES → DEPLOYED, with capped exponential backoff while
    /// the ledger queue drains.
    async fn allocate_and_deploy(
        &self,
        deployment_id: &str,
        template: &Template,
    ) -> Result<(), SupervisorError> {
        self.set_state(deployment_id, DeploymentState::AllocatingResources)?;

        // SLA agreement and learner exist before the first execution.
        let deployment = self.deployment(deployment_id)?;
        let requirements = deployment
            .sla_overrides
            .clone()
            .unwrap_or_else(|| template.sla_requirements.clone());
        let agreement = SlaAgreement::from_requirements(
            &template.id,
            deployment.tenant.resolved_tenant_id(),
            requirements,
            Utc::now() + chrono::Duration::days(365),
        );
        let agreement_id = agreement.id.clone();
        self.compliance.register(agreement);
        let (_qubits, depth, _gates) = template.max_circuit_shape();
        let tenant_id = deployment.tenant.resolved_tenant_id().to_string();
        // A fresh-enough snapshot restores the learner; otherwise start new.
        let snapshot_key = format!("{}/{}", template.id, tenant_id);
        let ttl_ms = self.config.optimizer.snapshot_ttl_hours as i64 * 3_600_000;
        let restored = self
            .store
            .get_learner_snapshot(&snapshot_key, ttl_ms)
            .ok()
            .flatten()
            .map(|bytes| self.optimizer.load_snapshot(&bytes).is_ok())
            .unwrap_or(false);
        if !restored {
            self.optimizer.ensure_learner(
                &template.id,
                &tenant_id,
                vec![
                    BoundedParameter::new(
                        "depth",
                        depth as f64,
                        1.0,
                        (depth as f64 * 2.0).max(2.0),
                    ),
                    BoundedParameter::new("shots", 1000.0, 100.0, 1_000_000.0),
                ],
            );
        }
        self.with_deployment_mut(deployment_id, |d| {
            d.agreement_id = Some(agreement_id.clone());
        })?;

        let amounts = template.resource_estimate;
        let priority = deployment.tenant.priority;
        let outcome = self
            .ledger
            .request(deployment_id, amounts, priority)
            .map_err(|e| {
                self.fail_deployment(deployment_id, &e.to_string());
                SupervisorError::Core(e)
            })?;

        let reservation = match outcome {
            ReservationOutcome::Granted(r) => r,
            ReservationOutcome::Queued { position } => {
                info!(
                    target: "qam::supervisor",
                    deployment = deployment_id,
                    position,
                    "Waiting for contended resources"
                );
                let deadline = tokio::time::Instant::now()
                    + Duration::from_secs(self.config.reservation.retry_deadline_secs);
                let mut backoff = ALLOCATION_BACKOFF_BASE;
                loop {
                    if tokio::time::Instant::now() >= deadline {
                        if let Err(e) = self.ledger.abandon(deployment_id) {
                            warn!(target: "qam::supervisor", error = %e, "Ledger abandon failed");
                        }
                        let err = SupervisorError::AllocationTimeout {
                            deployment_id: deployment_id.to_string(),
                        };
                        self.fail_deployment(deployment_id, &err.to_string());
                        return Err(err);
                    }
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(ALLOCATION_BACKOFF_CAP);
                    match self.ledger.try_claim(deployment_id) {
                        Ok(Some(r)) => break r,
                        Ok(None) => {}
                        Err(e) => {
                            self.fail_deployment(deployment_id, &e.to_string());
                            return Err(SupervisorError::Core(e));
                        }
                    }
                }
            }
        };

        self.events.publish(QamEvent::ReservationChanged {
            subject_id: deployment_id.to_string(),
            reserved: true,
            quantum_minutes: reservation.amounts.quantum_minutes,
        });
        self.append_receipt(
            deployment_id,
            "reservation_granted",
            json!({"quantum_minutes": reservation.amounts.quantum_minutes}),
        );
        self.with_deployment_mut(deployment_id, |d| {
            d.reservation = Some(reservation);
        })?;
        self.set_state(deployment_id, DeploymentState::Deployed)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Approvals
    // -----------------------------------------------------------------------

    /// Record a reviewer vote and apply its effect on the gated deployment.
    pub async fn vote(
        &self,
        approval_id: &str,
        vote: ReviewerVote,
    ) -> Result<(), SupervisorError> {
        let transition = self.approvals.vote(approval_id, vote)?;
        if let Some(transition) = transition {
            self.apply_approval_transition(transition).await;
        }
        Ok(())
    }

    /// Apply an approval transition to the deployment it gates.
    pub async fn apply_approval_transition(&self, transition: ApprovalTransition) {
        self.events.publish(QamEvent::ApprovalTransition {
            approval_id: transition.approval_id.clone(),
            deployment_id: transition.deployment_id.clone(),
            from: transition.from.as_str().to_string(),
            to: transition.to.as_str().to_string(),
        });
        let Some(deployment_id) = transition.deployment_id.clone() else {
            return;
        };
        self.append_receipt(
            &deployment_id,
            "approval_transition",
            json!({"approval": transition.approval_id, "to": transition.to.as_str()}),
        );

        match transition.to {
            ApprovalStatus::Approved | ApprovalStatus::Conditional => {
                let template = match self
                    .deployment(&deployment_id)
                    .and_then(|d| Ok(self.registry.get(&d.template_id)?))
                {
                    Ok(t) => t,
                    Err(e) => {
                        error!(
                            target: "qam::supervisor",
                            deployment = %deployment_id,
                            error = %e,
                            "Approved deployment lost its template"
                        );
                        return;
                    }
                };
                if let Err(e) = self.allocate_and_deploy(&deployment_id, &template).await {
                    warn!(
                        target: "qam::supervisor",
                        deployment = %deployment_id,
                        error = %e,
                        "Allocation failed after approval"
                    );
                }
            }
            ApprovalStatus::Denied | ApprovalStatus::Expired => {
                self.fail_deployment(
                    &deployment_id,
                    &format!("approval {}", transition.to.as_str()),
                );
            }
            ApprovalStatus::Revoked => {
                // A revoked approval suspends a live deployment.
                let _ = self.suspend(&deployment_id);
            }
            ApprovalStatus::Pending => {}
        }
    }

    // -----------------------------------------------------------------------
    // Execute
    // -----------------------------------------------------------------------

    /// Run one execution. Valid only in `DEPLOYED`; without `allow_concurrent`
    /// subsequent calls queue on the deployment's execution lock.
    pub async fn execute(
        &self,
        deployment_id: &str,
        exec_config: ExecConfig,
    ) -> Result<ExecutionReport, SupervisorError> {
        let deployment = self.deployment(deployment_id)?;
        let lock = self
            .exec_locks
            .entry(deployment_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = if deployment.allow_concurrent {
            None
        } else {
            Some(lock.lock_owned().await)
        };

        // Re-check under the lock: a queued call may find the deployment gone
        // elsewhere.
        let deployment = self.deployment(deployment_id)?;
        if deployment.state != DeploymentState::Deployed {
            return Err(SupervisorError::InvalidState {
                deployment_id: deployment_id.to_string(),
                state: deployment.state.as_str().to_string(),
                action: "execute requires DEPLOYED; resume or redeploy first".into(),
            });
        }

        let template = self.registry.get(&deployment.template_id)?;
        let tenant_id = deployment.tenant.resolved_tenant_id().to_string();

        let mut execution = Execution::new(deployment_id, &exec_config);
        let execution_id = execution.id.clone();
        self.with_deployment_mut(deployment_id, |d| {
            d.executions.push(execution.clone());
        })?;
        self.publish_execution_transition(&execution_id, deployment_id, "none", "queued");
        self.set_state(deployment_id, DeploymentState::Executing)?;

        let result = self
            .run_execution(
                deployment_id,
                &mut execution,
                &template,
                &tenant_id,
                &exec_config,
            )
            .await;

        // Whatever happened, the record ends in a terminal state.
        if result.is_err() && !execution.status.is_terminal() {
            execution.set_status(ExecutionStatus::Failed);
        }

        // Persist the execution's final shape on the deployment record.
        self.with_deployment_mut(deployment_id, |d| {
            if let Some(slot) = d.executions.iter_mut().find(|e| e.id == execution.id) {
                *slot = execution.clone();
            }
            d.metrics.record(
                matches!(execution.status, ExecutionStatus::Completed),
                execution.perf.execution_ms,
                execution.cost,
            );
        })?;

        match result {
            Ok(report) => {
                // A finished execution returns the deployment to DEPLOYED.
                self.set_state(deployment_id, DeploymentState::Deployed)?;
                Ok(report)
            }
            Err(e) => {
                self.append_receipt(
                    deployment_id,
                    "execution_failed",
                    json!({"execution": execution_id, "error": e.to_string()}),
                );
                self.set_state(deployment_id, DeploymentState::Deployed)?;
                Err(e)
            }
        }
    }

    async fn run_execution(
        &self,
        deployment_id: &str,
        execution: &mut Execution,
        template: &Template,
        tenant_id: &str,
        exec_config: &ExecConfig,
    ) -> Result<ExecutionReport, SupervisorError> {
        let deployment = self.deployment(deployment_id)?;

        execution.set_status(ExecutionStatus::Validating);
        self.publish_execution_transition(&execution.id, deployment_id, "queued", "validating");
        qam_core::validate_parameters(&template.parameter_schema, &deployment.parameters)?;

        // Adapted parameters drive the circuit shape.
        let adapted = self.optimizer.parameters(&template.id, tenant_id);
        let adapted_depth = adapted
            .iter()
            .find(|p| p.name == "depth")
            .map(|p| p.value.round() as u32);
        let algorithm = template.algorithms.first().ok_or_else(|| {
            SupervisorError::Core(qam_core::CoreError::ParameterInvalid {
                name: template.id.clone(),
                reason: "template declares no algorithms".into(),
            })
        })?;
        let depth = adapted_depth.unwrap_or(algorithm.depth);

        execution.set_status(ExecutionStatus::Allocating);
        let snapshot = ContextSnapshot {
            circuit_depth: depth,
            qubits: algorithm.qubits,
            shots: exec_config.shots,
            optimization_level: exec_config.optimization_level,
            gate_count: algorithm.gate_count,
            backend_index: 0,
            recent_avg_reward: deployment.metrics.success_rate(),
            recent_avg_latency_ms: deployment.metrics.avg_execution_ms,
            recent_success_rate: deployment.metrics.success_rate(),
            exploration_rate: 0.1,
            experience: deployment.metrics.executions,
            observed_at: Utc::now(),
        };
        let recommendation = self
            .optimizer
            .recommend(&template.id, tenant_id, &snapshot)
            .ok();

        // The arm's backend slot gets first preference when the deployment
        // allows that kind at all.
        let mut preferences = deployment.backend_preferences.clone();
        if let Some(rec) = &recommendation {
            let kind = match rec.arm.backend_index {
                0 => BackendKind::Classical,
                1 => BackendKind::Emulator,
                _ => BackendKind::Qpu,
            };
            if let Some(pos) = preferences.iter().position(|k| *k == kind) {
                preferences.remove(pos);
                preferences.insert(0, kind);
            }
        }
        let chain = self.selector.rank(&preferences);
        if chain.is_empty() {
            execution.set_status(ExecutionStatus::Failed);
            self.publish_execution_transition(&execution.id, deployment_id, "allocating", "failed");
            return Err(SupervisorError::NoBackendAvailable {
                deployment_id: deployment_id.to_string(),
            });
        }

        execution.set_status(ExecutionStatus::Executing);
        self.publish_execution_transition(&execution.id, deployment_id, "allocating", "executing");
        let circuit = CircuitSpec {
            template_id: template.id.clone(),
            algorithm: algorithm.name.clone(),
            qubits: algorithm.qubits,
            depth,
            gate_count: algorithm.gate_count,
            parameters: deployment.parameters.clone(),
        };
        let opts = SubmitOptions {
            optimization_level: exec_config.optimization_level,
            error_mitigation: exec_config.error_mitigation,
            deadline_ms: exec_config.deadline_ms,
        };
        let outcome = match run_with_fallback(
            &execution.id,
            &chain,
            &circuit,
            exec_config.shots,
            &opts,
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                execution.set_status(ExecutionStatus::Failed);
                self.publish_execution_transition(
                    &execution.id,
                    deployment_id,
                    "executing",
                    "failed",
                );
                return Err(e);
            }
        };

        execution.backend_selected = Some(outcome.backend.name.clone());
        execution.perf.queue_ms = outcome.queue_ms;
        execution.perf.execution_ms = outcome.execution_ms;
        execution.cost = outcome.cost;
        execution.results = Some(outcome.results.clone());
        execution.set_status(ExecutionStatus::PostProcessing);
        self.publish_execution_transition(
            &execution.id,
            deployment_id,
            "executing",
            "post_processing",
        );

        // SLA validation happens before any violation or adaptation effects.
        let agreement_id =
            deployment
                .agreement_id
                .clone()
                .ok_or_else(|| SupervisorError::InvalidState {
                    deployment_id: deployment_id.to_string(),
                    state: deployment.state.as_str().to_string(),
                    action: "no SLA agreement attached; redeploy".into(),
                })?;
        let agreement = self.compliance.get(&agreement_id).map_err(|e| {
            SupervisorError::InvalidState {
                deployment_id: deployment_id.to_string(),
                state: deployment.state.as_str().to_string(),
                action: e.to_string(),
            }
        })?;
        let evidence = ExecutionEvidence {
            execution_id: execution.id.clone(),
            results: outcome.results.clone(),
            backend: outcome.backend.clone(),
            qubits: algorithm.qubits,
            depth,
            shots: exec_config.shots,
            execution_ms: outcome.execution_ms,
            queue_ms: outcome.queue_ms,
            cost: outcome.cost,
        };
        let report = validate(&evidence, &agreement);
        execution.correctness = Some(report.score);
        for result in &report.results {
            self.compliance
                .record_metric_sample(&agreement_id, result.metric, result.value);
        }
        let violations = identify_violations(&report);
        self.apply_violations(&template.id, tenant_id, &violations);

        self.feed_optimizer(
            &template.id,
            tenant_id,
            &deployment,
            recommendation.as_ref().map(|r| r.arm.id),
            &snapshot,
            &outcome,
            &report,
            &violations,
        );

        execution.set_status(ExecutionStatus::Completed);
        self.publish_execution_transition(
            &execution.id,
            deployment_id,
            "post_processing",
            "completed",
        );
        self.append_receipt(
            deployment_id,
            "execution_completed",
            json!({
                "execution": execution.id,
                "backend": outcome.backend.name,
                "score": report.score,
                "violations": violations.len(),
            }),
        );

        Ok(ExecutionReport {
            execution: execution.clone(),
            report,
            violations,
        })
    }

    fn apply_violations(&self, template_id: &str, tenant_id: &str, violations: &[Violation]) {
        for violation in violations {
            if let Err(e) = self.compliance.record_violation(violation.clone()) {
                warn!(target: "qam::supervisor", error = %e, "Violation on unknown agreement");
                continue;
            }
            if let Err(e) = self.alerts.ingest(violation) {
                warn!(target: "qam::supervisor", error = %e, "Alert ingest failed");
            }
            self.events.publish(QamEvent::ViolationRaised {
                violation_id: violation.id.clone(),
                agreement_id: violation.agreement_id.clone(),
                metric: violation.metric.clone(),
                severity: violation.severity,
                threshold: violation.threshold,
                actual: violation.actual,
            });
            self.append_receipt(
                &violation.agreement_id,
                "violation_raised",
                json!({
                    "violation": violation.id,
                    "metric": violation.metric,
                    "severity": violation.severity.as_str(),
                    "first_action": violation.remediation.first_action().map(|a| a.as_str()),
                }),
            );
        }

        if violations.iter().any(|v| v.severity == Severity::Critical) {
            if let Some(event) = self
                .optimizer
                .critical_violation(template_id, tenant_id, Utc::now())
            {
                self.publish_rollback(template_id, tenant_id, &event.reason);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn feed_optimizer(
        &self,
        template_id: &str,
        tenant_id: &str,
        deployment: &Deployment,
        arm_id: Option<usize>,
        snapshot: &ContextSnapshot,
        outcome: &RunOutcome,
        report: &SlaReport,
        violations: &[Violation],
    ) {
        let Some(arm_id) = arm_id else {
            return;
        };
        let worst = violations.iter().map(|v| v.severity).max();
        let security = match worst {
            None => 1.0,
            Some(Severity::Critical) => 0.0,
            Some(_) => 0.7,
        };
        let objectives = RewardObjectives::from_raw(
            outcome.execution_ms as f64,
            outcome.cost,
            report.score,
            deployment.metrics.success_rate(),
            security,
            &RewardScales::default(),
        );
        match self.optimizer.observe(
            template_id,
            tenant_id,
            arm_id,
            snapshot,
            objectives,
            deployment.tenant.priority,
            Utc::now(),
        ) {
            Ok(observation) => {
                if let Some(rollback) = observation.rollback {
                    self.publish_rollback(template_id, tenant_id, &rollback.reason);
                }
            }
            Err(e) => {
                // Degenerate learner: keep current parameters, log, move on.
                warn!(
                    target: "qam::supervisor",
                    template = template_id,
                    tenant = tenant_id,
                    error = %e,
                    "Optimizer observation suppressed"
                );
            }
        }
    }

    fn publish_rollback(&self, template_id: &str, tenant_id: &str, reason: &str) {
        self.events.publish(QamEvent::RollbackExecuted {
            template_id: template_id.to_string(),
            tenant_id: tenant_id.to_string(),
            reason: reason.to_string(),
        });
        self.append_receipt(
            template_id,
            "rollback_executed",
            json!({"tenant": tenant_id, "reason": reason}),
        );
    }

    /// Cancel an in-flight or queued execution.
    pub fn cancel_execution(
        &self,
        deployment_id: &str,
        execution_id: &str,
    ) -> Result<(), SupervisorError> {
        let cancelled = self.with_deployment_mut(deployment_id, |d| {
            if let Some(e) = d.executions.iter_mut().find(|e| e.id == execution_id) {
                e.set_status(ExecutionStatus::Cancelled)
            } else {
                false
            }
        })?;
        if cancelled {
            self.publish_execution_transition(execution_id, deployment_id, "executing", "cancelled");
            let deployment = self.deployment(deployment_id)?;
            if deployment.state == DeploymentState::Executing {
                self.set_state(deployment_id, DeploymentState::Deployed)?;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lifecycle operations
    // -----------------------------------------------------------------------

    /// Idempotent DEPLOYED → SUSPENDED.
    pub fn suspend(&self, deployment_id: &str) -> Result<(), SupervisorError> {
        if self.deployment(deployment_id)?.state == DeploymentState::Suspended {
            return Ok(());
        }
        self.set_state(deployment_id, DeploymentState::Suspended)
    }

    /// Idempotent SUSPENDED → DEPLOYED.
    pub fn resume(&self, deployment_id: &str) -> Result<(), SupervisorError> {
        if self.deployment(deployment_id)?.state == DeploymentState::Deployed {
            return Ok(());
        }
        self.set_state(deployment_id, DeploymentState::Deployed)
    }

    /// DEPLOYED → COMPLETED; releases the reservation.
    pub fn complete(&self, deployment_id: &str) -> Result<(), SupervisorError> {
        if self.deployment(deployment_id)?.state == DeploymentState::Completed {
            return Ok(());
        }
        self.set_state(deployment_id, DeploymentState::Completed)
    }

    /// Terminal → ARCHIVED (also legal from SUSPENDED).
    pub fn archive(&self, deployment_id: &str) -> Result<(), SupervisorError> {
        if self.deployment(deployment_id)?.state == DeploymentState::Archived {
            return Ok(());
        }
        self.set_state(deployment_id, DeploymentState::Archived)
    }

    /// Force the deployment to FAILED, releasing any partial reservation.
    pub fn fail_deployment(&self, deployment_id: &str, reason: &str) {
        let _ = self.with_deployment_mut(deployment_id, |d| {
            d.failure_reason = Some(reason.to_string());
        });
        if let Err(e) = self.set_state(deployment_id, DeploymentState::Failed) {
            warn!(
                target: "qam::supervisor",
                deployment = deployment_id,
                error = %e,
                "Could not fail deployment"
            );
        }
        if let Err(e) = self.ledger.abandon(deployment_id) {
            warn!(target: "qam::supervisor", error = %e, "Ledger abandon failed");
        }
    }

    fn set_state(
        &self,
        deployment_id: &str,
        next: DeploymentState,
    ) -> Result<(), SupervisorError> {
        let (from, tenant_id) = self.with_deployment_mut(deployment_id, |d| {
            (d.state, d.tenant.tenant_id.clone())
        })?;
        if from == next {
            return Ok(());
        }
        if !from.can_transition_to(next) {
            return Err(SupervisorError::InvalidState {
                deployment_id: deployment_id.to_string(),
                state: from.as_str().to_string(),
                action: format!("cannot move to {}", next.as_str()),
            });
        }
        self.with_deployment_mut(deployment_id, |d| {
            d.state = next;
            d.updated_at = Utc::now();
            if next.is_terminal() {
                if let Some(r) = &mut d.reservation {
                    r.reserved = false;
                }
            }
        })?;
        info!(
            target: "qam::supervisor",
            deployment = deployment_id,
            from = from.as_str(),
            to = next.as_str(),
            "Deployment transition"
        );
        self.events.publish(QamEvent::DeploymentTransition {
            deployment_id: deployment_id.to_string(),
            tenant_id,
            from: from.as_str().to_string(),
            to: next.as_str().to_string(),
        });
        self.append_receipt(
            deployment_id,
            "deployment_transition",
            json!({"from": from.as_str(), "to": next.as_str()}),
        );
        if let Ok(d) = self.deployment(deployment_id) {
            if let Err(e) = self.store.put_entity("deployment", deployment_id, &d) {
                warn!(target: "qam::supervisor", error = %e, "Deployment snapshot failed");
            }
        }
        if next.is_terminal() {
            match self.ledger.release(deployment_id) {
                Ok(true) => {
                    self.events.publish(QamEvent::ReservationChanged {
                        subject_id: deployment_id.to_string(),
                        reserved: false,
                        quantum_minutes: 0.0,
                    });
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(target: "qam::supervisor", error = %e, "Ledger release failed");
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Monitoring steps (driven by the loops in `monitoring`)
    // -----------------------------------------------------------------------

    /// Metric collection pass: engine gauges into the buffered sink. Also the
    /// safety net that releases reservations left behind by terminal
    /// deployments.
    pub async fn collect_metrics_once(&self) {
        let now = qam_core::now_epoch_ms();
        let status = self.status();
        let mut points: Vec<MetricPoint> = status
            .deployments_by_state
            .iter()
            .map(|(state, count)| MetricPoint {
                namespace: "qam".into(),
                name: format!("deployments_{state}"),
                value: *count as f64,
                labels: BTreeMap::new(),
                ts_ms: now,
            })
            .collect();
        points.push(MetricPoint {
            namespace: "qam".into(),
            name: "reservation_qmins_in_use".into(),
            value: status.reservation_quantum_minutes_in_use,
            labels: BTreeMap::new(),
            ts_ms: now,
        });
        for point in points {
            if let Err(e) = self.metric_buffer.push(point) {
                warn!(target: "qam::supervisor", error = %e, "Metric buffer push failed");
                break;
            }
        }

        match self.ledger.active_subjects() {
            Ok(subjects) => {
                for subject in subjects {
                    if let Ok(d) = self.deployment(&subject) {
                        if d.state.is_terminal()
                            && self.ledger.release(&subject).unwrap_or(false)
                        {
                            warn!(
                                target: "qam::supervisor",
                                deployment = %subject,
                                "Released reservation left by terminal deployment"
                            );
                        }
                    }
                }
            }
            Err(e) => warn!(target: "qam::supervisor", error = %e, "Ledger scan failed"),
        }

        // Durable snapshots: ledger utilization and learner state.
        match self.ledger.utilization() {
            Ok(utilization) => {
                if let Err(e) = self.store.put_ledger(&utilization) {
                    warn!(target: "qam::supervisor", error = %e, "Ledger snapshot failed");
                }
            }
            Err(e) => warn!(target: "qam::supervisor", error = %e, "Ledger read failed"),
        }
        for (template_id, tenant_id) in self.optimizer.learner_keys() {
            if let Some(bytes) = self.optimizer.snapshot(&template_id, &tenant_id) {
                let key = format!("{template_id}/{tenant_id}");
                if let Err(e) = self.store.put_learner_snapshot(&key, &bytes) {
                    warn!(target: "qam::supervisor", error = %e, learner = %key, "Learner snapshot failed");
                }
            }
        }

        if let Err(e) = self.metric_buffer.flush(self.metric_sink.as_ref()).await {
            warn!(target: "qam::supervisor", error = %e, "Metric flush failed");
        }
    }

    /// Compliance pass: recompute every agreement so scores repair as
    /// violations age out of the window.
    pub fn validate_compliance_once(&self) {
        let now = Utc::now();
        for id in self.compliance.agreement_ids() {
            if let Err(e) = self.compliance.recompute(&id, now) {
                warn!(target: "qam::supervisor", agreement = %id, error = %e, "Compliance recompute failed");
            }
        }
    }

    /// Alert pass: drain the queue through dedup, correlation, delivery.
    pub async fn process_alerts_once(&self) {
        if let Err(e) = self.alerts.process(Utc::now()).await {
            warn!(target: "qam::supervisor", error = %e, "Alert processing failed");
        }
    }

    /// Approval pass: escalate and expire pending approvals, then apply the
    /// transitions to the deployments they gate.
    pub async fn scan_approvals_once(&self) {
        for transition in self.approvals.scan_deadlines(Utc::now()) {
            self.apply_approval_transition(transition).await;
        }
    }

    pub fn status(&self) -> EngineStatus {
        let mut by_state: BTreeMap<String, usize> = BTreeMap::new();
        for d in self.deployments.iter() {
            *by_state.entry(d.state.as_str().to_string()).or_default() += 1;
        }
        EngineStatus {
            deployments_by_state: by_state,
            pending_approvals: self.approvals.pending_count(),
            reservation_quantum_minutes_in_use: self
                .ledger
                .utilization()
                .map(|u| u.quantum_minutes)
                .unwrap_or(0.0),
            learner_count: self.optimizer.learner_count(),
            alert_suppressed_total: self.alerts.suppressed_count(),
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn with_deployment_mut<R>(
        &self,
        deployment_id: &str,
        f: impl FnOnce(&mut Deployment) -> R,
    ) -> Result<R, SupervisorError> {
        let mut entry = self
            .deployments
            .get_mut(deployment_id)
            .ok_or_else(|| SupervisorError::DeploymentNotFound(deployment_id.to_string()))?;
        Ok(f(entry.value_mut()))
    }

    fn publish_execution_transition(
        &self,
        execution_id: &str,
        deployment_id: &str,
        from: &str,
        to: &str,
    ) {
        self.events.publish(QamEvent::ExecutionTransition {
            execution_id: execution_id.to_string(),
            deployment_id: deployment_id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        });
    }

    fn append_receipt(&self, subject_id: &str, event: &str, details: serde_json::Value) {
        if let Err(e) = self.audit.append(subject_id, ENGINE_ACTOR, event, details) {
            // A broken chain halts that subject's stream; surface loudly.
            error!(
                target: "qam::supervisor",
                subject = subject_id,
                event,
                error = %e,
                "Receipt append failed"
            );
            self.events.publish(QamEvent::AuditHalted {
                subject_id: subject_id.to_string(),
                seq: 0,
            });
        }
    }
}

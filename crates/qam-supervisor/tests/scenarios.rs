//! End-to-end control-plane scenarios against in-process fakes.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;

use qam_core::registry::{
    AlgorithmFamily, AlgorithmSpec, MeasurementMethod, ParamType, ParameterSpec, SlaMetric,
    SlaRequirement, TemplateStatus,
};
use qam_core::{
    BackendDescriptor, BackendDriver, BackendError, BackendKind, BackendMetadata,
    BackendSelector, CircuitSpec, DeploymentState, ExecutionHandle, ExecutionStatus,
    NotificationSink, NotifyError, PollStatus, QamConfig, QamStore, RawResults, ResourceAmounts,
    Severity, SubmitOptions, Template, TemplateRegistry, TenantContext, TracingMetricSink,
};
use qam_policy::{
    Actor, ActorType, ApprovalStatus, DenyListScreener, InMemoryLicenseDirectory, PolicyError,
    PolicyGate, ReviewerRole, ReviewerVote, RuleSnapshot,
};
use qam_sla::ComplianceStatus;
use qam_supervisor::{
    DeployInput, DeploymentSupervisor, ExecConfig, SupervisorError,
};

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Backend driver that completes immediately with a scripted error rate.
struct FakeBackend {
    descriptor: BackendDescriptor,
    /// Fraction of shots reported with per-shot confidence below 0.5.
    error_rate: std::sync::Mutex<f64>,
}

impl FakeBackend {
    fn new(name: &str, kind: BackendKind, cost_per_shot: f64, error_rate: f64) -> Arc<Self> {
        Arc::new(Self {
            descriptor: BackendDescriptor {
                name: name.to_string(),
                kind,
                provider: "test".into(),
                region: "local".into(),
                availability: 0.99,
                cost_per_shot,
                avg_queue_time_ms: 5,
                coherence_time_us: 120.0,
                gate_error_rate: 0.001,
            },
            error_rate: std::sync::Mutex::new(error_rate),
        })
    }

    fn set_error_rate(&self, rate: f64) {
        *self.error_rate.lock().unwrap() = rate;
    }
}

#[async_trait]
impl BackendDriver for FakeBackend {
    async fn submit(
        &self,
        _circuit: &CircuitSpec,
        _shots: u64,
        _opts: &SubmitOptions,
    ) -> Result<ExecutionHandle, BackendError> {
        Ok(ExecutionHandle {
            backend: self.descriptor.name.clone(),
            token: "token".into(),
        })
    }

    async fn poll(&self, _handle: &ExecutionHandle) -> Result<PollStatus, BackendError> {
        let error_rate = *self.error_rate.lock().unwrap();
        let shots = 100usize;
        let low = (error_rate * shots as f64).round() as usize;
        let mut per_shot_confidence = vec![0.3; low];
        per_shot_confidence.extend(vec![0.95; shots - low]);
        let mut counts = BTreeMap::new();
        counts.insert("0000".to_string(), (shots - low) as u64);
        counts.insert("1111".to_string(), low as u64);
        Ok(PollStatus::Done(RawResults {
            counts,
            per_shot_confidence,
            metadata: BackendMetadata {
                kind: self.descriptor.kind,
                gate_error_rate: self.descriptor.gate_error_rate,
                coherence_time_us: self.descriptor.coherence_time_us,
            },
        }))
    }

    async fn cancel(&self, _handle: &ExecutionHandle) -> Result<(), BackendError> {
        Ok(())
    }

    fn describe(&self) -> BackendDescriptor {
        self.descriptor.clone()
    }
}

struct CountingSink {
    delivered: AtomicUsize,
}

#[async_trait]
impl NotificationSink for CountingSink {
    async fn deliver(
        &self,
        _channel: &str,
        _severity: Severity,
        _subject: &str,
        _body: &str,
    ) -> Result<(), NotifyError> {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn risk_template() -> Template {
    let mut schema = BTreeMap::new();
    schema.insert(
        "portfolio_size".to_string(),
        ParameterSpec {
            kind: Some(ParamType::Integer),
            required: true,
            min: Some(1.0),
            max: Some(500.0),
            ..Default::default()
        },
    );
    schema.insert(
        "confidence_level".to_string(),
        ParameterSpec {
            kind: Some(ParamType::Number),
            required: true,
            min: Some(0.5),
            max: Some(0.999),
            ..Default::default()
        },
    );
    schema.insert(
        "simulation_samples".to_string(),
        ParameterSpec {
            kind: Some(ParamType::Integer),
            required: true,
            min: Some(100.0),
            max: Some(1_000_000.0),
            ..Default::default()
        },
    );
    Template {
        id: "qt-risk-v1".to_string(),
        version: "1.0.0".to_string(),
        name: "Portfolio risk".to_string(),
        description: "Monte-Carlo portfolio risk analysis".to_string(),
        category: "finance".to_string(),
        tags: vec!["risk".to_string()],
        algorithms: vec![AlgorithmSpec {
            name: "amplitude-estimation".to_string(),
            qubits: 12,
            depth: 5,
            gate_count: 400,
            family: AlgorithmFamily::Sampling {
                distribution: "lognormal".to_string(),
            },
        }],
        parameter_schema: schema,
        export_classification: qam_core::ExportControlLevel::Unrestricted,
        sla_requirements: vec![
            SlaRequirement {
                metric: SlaMetric::ErrorRate,
                threshold: 0.05,
                method: MeasurementMethod::Sampling,
                fallback_chain: vec![BackendKind::Emulator, BackendKind::Classical],
            },
            SlaRequirement {
                metric: SlaMetric::Fidelity,
                threshold: 0.9,
                method: MeasurementMethod::Sampling,
                fallback_chain: vec![BackendKind::Emulator, BackendKind::Classical],
            },
        ],
        resource_estimate: ResourceAmounts {
            quantum_minutes: 8.0,
            classical_cpu: 2.0,
            memory_gb: 8.0,
            storage_gb: 1.0,
        },
        status: TemplateStatus::Available,
        extras: Default::default(),
    }
}

fn crypto_template() -> Template {
    let mut t = risk_template();
    t.id = "qt-crypto-v1".to_string();
    t.name = "Key recovery".to_string();
    t.algorithms = vec![AlgorithmSpec {
        name: "period-finding".to_string(),
        qubits: 24,
        depth: 200,
        gate_count: 5000,
        family: AlgorithmFamily::Cryptographic {
            target_scheme: "rsa-2048".to_string(),
        },
    }];
    t
}

fn dual_use_template() -> Template {
    let mut t = risk_template();
    t.id = "qt-optimizer-v1".to_string();
    t.name = "Route optimizer".to_string();
    t.algorithms = vec![AlgorithmSpec {
        name: "qaoa".to_string(),
        qubits: 25,
        depth: 5,
        gate_count: 800,
        family: AlgorithmFamily::Optimization {
            ansatz: "qaoa".to_string(),
            max_iterations: 100,
        },
    }];
    t
}

struct Harness {
    supervisor: Arc<DeploymentSupervisor>,
    emulator: Arc<FakeBackend>,
    sink: Arc<CountingSink>,
}

fn build_harness(mut config: QamConfig, templates: Vec<Template>) -> Harness {
    // Fast tests: short allocation retry, loose optimizer gating.
    config.reservation.retry_deadline_secs = config.reservation.retry_deadline_secs.min(30);
    config.optimizer.min_samples = 3;
    config.optimizer.improvement_threshold = -1.0;
    config.optimizer.cooldown_seconds = 0;
    config.optimizer.max_parameter_change = 1.0;
    config.optimizer.learning_rate = 1.0;
    config.optimizer.convergence_window = 4;
    config.optimizer.rng_seed = Some(7);

    let registry = Arc::new(TemplateRegistry::new());
    for t in templates {
        registry.publish(t).unwrap();
    }

    let licenses = InMemoryLicenseDirectory::new();
    licenses.grant("acme", "EAR-DU-001");
    let gate = Arc::new(PolicyGate::new(
        config.policy.classification_ttl_days,
        RuleSnapshot::builtin_default(),
        Arc::new(DenyListScreener::default()),
        Arc::new(licenses),
    ));

    let emulator = FakeBackend::new("emu-local", BackendKind::Emulator, 0.001, 0.01);
    let classical = FakeBackend::new("sim-local", BackendKind::Classical, 0.002, 0.0);
    let qpu = FakeBackend::new("qpu-east", BackendKind::Qpu, 0.05, 0.05);
    let selector = Arc::new(BackendSelector::new(vec![
        emulator.clone(),
        classical.clone(),
        qpu,
    ]));

    let sink = Arc::new(CountingSink {
        delivered: AtomicUsize::new(0),
    });

    let supervisor = Arc::new(DeploymentSupervisor::new(
        config,
        registry,
        gate,
        selector,
        sink.clone(),
        Arc::new(TracingMetricSink),
        QamStore::temporary().unwrap(),
    ));

    Harness {
        supervisor,
        emulator,
        sink,
    }
}

fn actor(id: &str) -> Actor {
    Actor {
        id: id.to_string(),
        actor_type: ActorType::Organization,
        jurisdiction: "US".to_string(),
        documentation: vec![],
    }
}

fn deploy_input(template_id: &str, destination: &str, end_use: &str) -> DeployInput {
    let mut parameters = BTreeMap::new();
    parameters.insert("portfolio_size".to_string(), json!(25));
    parameters.insert("confidence_level".to_string(), json!(0.95));
    parameters.insert("simulation_samples".to_string(), json!(10_000));
    DeployInput {
        template_id: template_id.to_string(),
        tenant: TenantContext::new("acme"),
        parameters,
        backend_preferences: None,
        destination: destination.to_string(),
        end_use: end_use.to_string(),
        actor: actor("acme"),
        allow_concurrent: false,
        sla_overrides: None,
    }
}

// ---------------------------------------------------------------------------
// S1: happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s1_happy_path_auto_approval_and_clean_execution() {
    let h = build_harness(QamConfig::default(), vec![risk_template()]);
    let deployment = h
        .supervisor
        .deploy(deploy_input("qt-risk-v1", "US", "research"))
        .await
        .unwrap();

    assert_eq!(deployment.state, DeploymentState::Deployed);
    // Auto-approval: no manual workflow opened.
    assert!(deployment.approval_id.is_none());
    // Reservation of 8 quantum-minutes held.
    let reservation = deployment.reservation.as_ref().unwrap();
    assert!((reservation.amounts.quantum_minutes - 8.0).abs() < 1e-9);
    assert!(reservation.reserved);

    let outcome = h
        .supervisor
        .execute(&deployment.id, ExecConfig::default())
        .await
        .unwrap();

    assert_eq!(outcome.execution.status, ExecutionStatus::Completed);
    // Cheapest available kind in the chain is the emulator.
    assert_eq!(outcome.execution.backend_selected.as_deref(), Some("emu-local"));
    assert!(outcome.report.score >= 0.95, "score {}", outcome.report.score);
    assert!(outcome.violations.is_empty());

    let after = h.supervisor.deployment(&deployment.id).unwrap();
    assert_eq!(after.state, DeploymentState::Deployed);
    assert_eq!(after.metrics.executions, 1);

    // Receipt chain for the deployment verifies end-to-end.
    assert!(h.supervisor.audit().verify(&deployment.id).unwrap() >= 4);
}

// ---------------------------------------------------------------------------
// S2: classification denial
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s2_itar_template_without_license_fails_closed() {
    let h = build_harness(QamConfig::default(), vec![crypto_template()]);
    let err = h
        .supervisor
        .deploy(deploy_input("qt-crypto-v1", "CN", "commercial"))
        .await
        .unwrap_err();

    match err {
        SupervisorError::Policy(PolicyError::LicenseMissing { missing, .. }) => {
            assert!(missing.contains(&"ITAR-CRYPTO-001".to_string()));
        }
        other => panic!("expected LicenseMissing, got {other:?}"),
    }

    // The deployment failed and no review was ever opened.
    assert_eq!(h.supervisor.approvals().pending_count(), 0);
    let status = h.supervisor.status();
    assert_eq!(status.deployments_by_state.get("failed"), Some(&1));
    // Nothing left reserved.
    assert_eq!(status.reservation_quantum_minutes_in_use, 0.0);
}

// ---------------------------------------------------------------------------
// S3: SLA violation, remediation, alert, compliance status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s3_sla_violation_raises_remediation_and_alert() {
    let h = build_harness(QamConfig::default(), vec![risk_template()]);
    let deployment = h
        .supervisor
        .deploy(deploy_input("qt-risk-v1", "US", "research"))
        .await
        .unwrap();

    // Degrade the backend: error_rate 0.18 against threshold 0.05.
    h.emulator.set_error_rate(0.18);
    let outcome = h
        .supervisor
        .execute(&deployment.id, ExecConfig::default())
        .await
        .unwrap();

    let violation = outcome
        .violations
        .iter()
        .find(|v| v.metric == "ERROR_RATE")
        .expect("error-rate violation");
    // Deviation (0.18-0.05)/0.05 = 2.6 ≥ 0.5 → CRITICAL.
    assert_eq!(violation.severity, Severity::Critical);
    assert_eq!(
        violation.remediation.first_action().unwrap().as_str(),
        "BACKEND_SWITCH"
    );

    // The alert loop delivers exactly one alert for the batch.
    h.supervisor.process_alerts_once().await;
    assert_eq!(h.sink.delivered.load(Ordering::Relaxed), 1);

    // A critical violation marks the agreement VIOLATED.
    let agreement_id = h
        .supervisor
        .deployment(&deployment.id)
        .unwrap()
        .agreement_id
        .unwrap();
    let agreement = h.supervisor.compliance().get(&agreement_id).unwrap();
    assert_eq!(agreement.compliance.status, ComplianceStatus::Violated);
    assert!(agreement.compliance.score < 1.0);
}

#[tokio::test]
async fn s3b_three_noncritical_violations_move_agreement_at_risk() {
    let h = build_harness(QamConfig::default(), vec![risk_template()]);
    let deployment = h
        .supervisor
        .deploy(deploy_input("qt-risk-v1", "US", "research"))
        .await
        .unwrap();

    // 0.07 vs 0.05: deviation 0.4 → HIGH, not critical.
    h.emulator.set_error_rate(0.07);
    for _ in 0..3 {
        let outcome = h
            .supervisor
            .execute(&deployment.id, ExecConfig::default())
            .await
            .unwrap();
        assert!(outcome
            .violations
            .iter()
            .all(|v| v.severity < Severity::Critical));
    }

    let agreement_id = h
        .supervisor
        .deployment(&deployment.id)
        .unwrap()
        .agreement_id
        .unwrap();
    let agreement = h.supervisor.compliance().get(&agreement_id).unwrap();
    assert_eq!(agreement.compliance.status, ComplianceStatus::AtRisk);
    // Service credits issued for the HIGH violations.
    assert!(!agreement.compliance.credits.is_empty());
}

// ---------------------------------------------------------------------------
// S4: adaptation and rollback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s4_adaptation_rolls_back_after_reward_regression() {
    let h = build_harness(QamConfig::default(), vec![risk_template()]);
    let deployment = h
        .supervisor
        .deploy(deploy_input("qt-risk-v1", "US", "research"))
        .await
        .unwrap();

    // Build a healthy baseline.
    for _ in 0..4 {
        h.supervisor
            .execute(&deployment.id, ExecConfig::default())
            .await
            .unwrap();
    }

    // Optimizer proposes depth 5 → 8; gating passes, change applies.
    let event = h
        .supervisor
        .optimizer()
        .try_adapt("qt-risk-v1", "acme", "depth", 8.0, 0.5, Utc::now())
        .unwrap()
        .expect("adaptation applied");
    assert_eq!(event.applied, 8.0);

    // Three degraded executions push composite rewards below the baseline.
    h.emulator.set_error_rate(0.4);
    for _ in 0..3 {
        let _ = h
            .supervisor
            .execute(&deployment.id, ExecConfig::default())
            .await;
    }

    // Parameters restored to depth 5.
    let params = h.supervisor.optimizer().parameters("qt-risk-v1", "acme");
    let depth = params.iter().find(|p| p.name == "depth").unwrap();
    assert_eq!(depth.value, 5.0);

    // A rollback receipt landed on the template's audit stream.
    let receipts = h.supervisor.audit().entries("qt-risk-v1").unwrap();
    assert!(receipts.iter().any(|r| r.event == "rollback_executed"));
}

// ---------------------------------------------------------------------------
// S5: approval expiration
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s5_pending_approval_expires_and_fails_deployment() {
    let h = build_harness(QamConfig::default(), vec![dual_use_template()]);
    // Dual-use to CN: manual review required (CN is not auto-approvable).
    let deployment = h
        .supervisor
        .deploy(deploy_input("qt-optimizer-v1", "CN", "academic research"))
        .await
        .unwrap();

    assert_eq!(deployment.state, DeploymentState::ValidatingExportControl);
    let approval_id = deployment.approval_id.clone().unwrap();
    assert_eq!(h.supervisor.approvals().pending_count(), 1);

    // Nobody acts before the hard deadline.
    let past_deadline = Utc::now() + ChronoDuration::hours(999);
    let transitions = h.supervisor.approvals().scan_deadlines(past_deadline);
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].to, ApprovalStatus::Expired);
    for t in transitions {
        h.supervisor.apply_approval_transition(t).await;
    }

    let after = h.supervisor.deployment(&deployment.id).unwrap();
    assert_eq!(after.state, DeploymentState::Failed);
    assert!(after.failure_reason.unwrap().contains("EXPIRED"));
    let approval = h.supervisor.approvals().get(&approval_id).unwrap();
    assert_eq!(approval.status, ApprovalStatus::Expired);
}

#[tokio::test]
async fn s5b_granted_approval_resumes_deployment() {
    let h = build_harness(QamConfig::default(), vec![dual_use_template()]);
    let deployment = h
        .supervisor
        .deploy(deploy_input("qt-optimizer-v1", "CN", "academic research"))
        .await
        .unwrap();
    let approval_id = deployment.approval_id.clone().unwrap();

    // The compliance reviewer approves.
    h.supervisor
        .vote(
            &approval_id,
            ReviewerVote {
                role: ReviewerRole::Compliance,
                reviewer: "compliance-team".into(),
                approve: true,
                conditions: vec![],
                comment: String::new(),
                at: Utc::now(),
            },
        )
        .await
        .unwrap();

    let after = h.supervisor.deployment(&deployment.id).unwrap();
    assert_eq!(after.state, DeploymentState::Deployed);
    assert!(after.reservation.is_some());
}

// ---------------------------------------------------------------------------
// S6: contended reservations are FIFO with no double allocation
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn s6_contended_reservations_are_fifo() {
    let mut config = QamConfig::default();
    config.reservation.quantum_minutes = 10.0; // each deployment wants 8.0
    let h = build_harness(config, vec![risk_template()]);

    let first = h
        .supervisor
        .deploy(deploy_input("qt-risk-v1", "US", "research"))
        .await
        .unwrap();
    assert_eq!(first.state, DeploymentState::Deployed);

    // Second deployment contends for the pool in the background.
    let supervisor = h.supervisor.clone();
    let second_task = tokio::spawn(async move {
        supervisor
            .deploy(deploy_input("qt-risk-v1", "US", "research"))
            .await
    });

    // Give the second deployment time to reach the allocation wait.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    let status = h.supervisor.status();
    assert_eq!(
        status.deployments_by_state.get("allocating_resources"),
        Some(&1),
        "second deployment should be waiting on resources"
    );
    // Pool never over-committed while both are live.
    assert!(status.reservation_quantum_minutes_in_use <= 10.0);

    // First completes; its reservation releases and the second proceeds.
    h.supervisor.complete(&first.id).unwrap();
    let second = second_task.await.unwrap().unwrap();
    assert_eq!(second.state, DeploymentState::Deployed);

    let in_use = h.supervisor.ledger().utilization().unwrap().quantum_minutes;
    assert!((in_use - 8.0).abs() < 1e-9, "only the second holds: {in_use}");
}

// ---------------------------------------------------------------------------
// Execution concurrency: one active execution unless allow_concurrent
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn serialized_executions_queue_behind_each_other() {
    let h = build_harness(QamConfig::default(), vec![risk_template()]);
    let deployment = h
        .supervisor
        .deploy(deploy_input("qt-risk-v1", "US", "research"))
        .await
        .unwrap();

    let a = {
        let supervisor = h.supervisor.clone();
        let id = deployment.id.clone();
        tokio::spawn(async move { supervisor.execute(&id, ExecConfig::default()).await })
    };
    let b = {
        let supervisor = h.supervisor.clone();
        let id = deployment.id.clone();
        tokio::spawn(async move { supervisor.execute(&id, ExecConfig::default()).await })
    };

    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    let after = h.supervisor.deployment(&deployment.id).unwrap();
    assert_eq!(after.metrics.executions, 2);
    assert_eq!(after.state, DeploymentState::Deployed);
    assert!(after
        .executions
        .iter()
        .all(|e| e.status == ExecutionStatus::Completed));
}

// ---------------------------------------------------------------------------
// Lifecycle odds and ends
// ---------------------------------------------------------------------------

#[tokio::test]
async fn suspend_resume_archive_are_idempotent() {
    let h = build_harness(QamConfig::default(), vec![risk_template()]);
    let deployment = h
        .supervisor
        .deploy(deploy_input("qt-risk-v1", "US", "research"))
        .await
        .unwrap();

    h.supervisor.suspend(&deployment.id).unwrap();
    h.supervisor.suspend(&deployment.id).unwrap();
    assert!(h
        .supervisor
        .execute(&deployment.id, ExecConfig::default())
        .await
        .is_err());

    h.supervisor.resume(&deployment.id).unwrap();
    h.supervisor.resume(&deployment.id).unwrap();
    h.supervisor.complete(&deployment.id).unwrap();
    h.supervisor.archive(&deployment.id).unwrap();
    h.supervisor.archive(&deployment.id).unwrap();

    let after = h.supervisor.deployment(&deployment.id).unwrap();
    assert_eq!(after.state, DeploymentState::Archived);
    // Terminal state released the reservation.
    assert_eq!(h.supervisor.ledger().utilization().unwrap().quantum_minutes, 0.0);
}

#[tokio::test]
async fn sla_overrides_replace_template_requirements() {
    let h = build_harness(QamConfig::default(), vec![risk_template()]);
    let mut input = deploy_input("qt-risk-v1", "US", "research");
    input.sla_overrides = Some(vec![SlaRequirement {
        metric: SlaMetric::ErrorRate,
        threshold: 0.10,
        method: MeasurementMethod::Sampling,
        fallback_chain: vec![BackendKind::Emulator, BackendKind::Classical],
    }]);
    let deployment = h.supervisor.deploy(input).await.unwrap();

    // The agreement carries the override, not the template's two defaults.
    let agreement_id = deployment.agreement_id.clone().unwrap();
    let agreement = h.supervisor.compliance().get(&agreement_id).unwrap();
    assert_eq!(agreement.requirements.len(), 1);
    assert_eq!(agreement.requirements[0].metric, SlaMetric::ErrorRate);
    assert!((agreement.requirements[0].threshold - 0.10).abs() < 1e-12);

    // 0.07 violates the template default (0.05) but passes the override.
    h.emulator.set_error_rate(0.07);
    let outcome = h
        .supervisor
        .execute(&deployment.id, ExecConfig::default())
        .await
        .unwrap();
    assert!(outcome.violations.is_empty());
    assert_eq!(outcome.report.score, 1.0);
}

#[tokio::test]
async fn unknown_template_is_rejected_synchronously() {
    let h = build_harness(QamConfig::default(), vec![risk_template()]);
    let err = h
        .supervisor
        .deploy(deploy_input("qt-nope-v1", "US", "research"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SupervisorError::Core(qam_core::CoreError::TemplateNotFound { .. })
    ));
}

#[tokio::test]
async fn invalid_parameters_fail_during_configuring() {
    let h = build_harness(QamConfig::default(), vec![risk_template()]);
    let mut input = deploy_input("qt-risk-v1", "US", "research");
    input
        .parameters
        .insert("portfolio_size".to_string(), json!(100_000));
    let err = h.supervisor.deploy(input).await.unwrap_err();
    assert!(matches!(
        err,
        SupervisorError::Core(qam_core::CoreError::ParameterInvalid { .. })
    ));
    let status = h.supervisor.status();
    assert_eq!(status.deployments_by_state.get("failed"), Some(&1));
}

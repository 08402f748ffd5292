//! Typed lifecycle event stream.
//!
//! One tagged variant per state-changing action, published on a broadcast
//! channel. Well-known subscribers (audit log, alert manager, metric sink)
//! each consume the variants they declare interest in; lagging subscribers
//! miss events rather than blocking publishers.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::shared::{now_epoch_ms, Severity};

/// Default broadcast capacity; slow consumers past this lag are skipped.
const EVENT_BUS_CAPACITY: usize = 1024;

/// A state-changing event anywhere in the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QamEvent {
    DeploymentTransition {
        deployment_id: String,
        tenant_id: String,
        from: String,
        to: String,
    },
    ExecutionTransition {
        execution_id: String,
        deployment_id: String,
        from: String,
        to: String,
    },
    ApprovalTransition {
        approval_id: String,
        deployment_id: Option<String>,
        from: String,
        to: String,
    },
    ViolationRaised {
        violation_id: String,
        agreement_id: String,
        metric: String,
        severity: Severity,
        threshold: f64,
        actual: f64,
    },
    AlertDelivered {
        alert_id: String,
        agreement_id: String,
        severity: Severity,
        correlated_count: usize,
    },
    AdaptationApplied {
        template_id: String,
        tenant_id: String,
        parameter: String,
        previous: f64,
        applied: f64,
    },
    RollbackExecuted {
        template_id: String,
        tenant_id: String,
        reason: String,
    },
    ReservationChanged {
        subject_id: String,
        reserved: bool,
        quantum_minutes: f64,
    },
    /// Audit writes to a subject halted after a verification failure.
    AuditHalted {
        subject_id: String,
        seq: u64,
    },
}

impl QamEvent {
    /// Subject id this event belongs to, for audit stream routing.
    pub fn subject_id(&self) -> &str {
        match self {
            Self::DeploymentTransition { deployment_id, .. } => deployment_id,
            Self::ExecutionTransition { execution_id, .. } => execution_id,
            Self::ApprovalTransition { approval_id, .. } => approval_id,
            Self::ViolationRaised { agreement_id, .. } => agreement_id,
            Self::AlertDelivered { agreement_id, .. } => agreement_id,
            Self::AdaptationApplied { template_id, .. } => template_id,
            Self::RollbackExecuted { template_id, .. } => template_id,
            Self::ReservationChanged { subject_id, .. } => subject_id,
            Self::AuditHalted { subject_id, .. } => subject_id,
        }
    }

    /// Tag name, mirrors the serde tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DeploymentTransition { .. } => "deployment_transition",
            Self::ExecutionTransition { .. } => "execution_transition",
            Self::ApprovalTransition { .. } => "approval_transition",
            Self::ViolationRaised { .. } => "violation_raised",
            Self::AlertDelivered { .. } => "alert_delivered",
            Self::AdaptationApplied { .. } => "adaptation_applied",
            Self::RollbackExecuted { .. } => "rollback_executed",
            Self::ReservationChanged { .. } => "reservation_changed",
            Self::AuditHalted { .. } => "audit_halted",
        }
    }
}

/// A timestamped event as carried on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StampedEvent {
    pub at_ms: i64,
    #[serde(flatten)]
    pub event: QamEvent,
}

/// Broadcast fan-out for [`QamEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StampedEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Returns the number of live subscribers; zero is fine.
    pub fn publish(&self, event: QamEvent) -> usize {
        trace!(target: "qam::events", kind = event.kind(), subject = event.subject_id(), "publish");
        let stamped = StampedEvent {
            at_ms: now_epoch_ms(),
            event,
        };
        self.tx.send(stamped).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StampedEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

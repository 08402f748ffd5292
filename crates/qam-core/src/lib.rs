//! QAM core: shared types, template registry, receipt log, reservations,
//! and the contracts every other engine crate builds on.

pub mod audit;
pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod registry;
pub mod reservation;
pub mod shared;
pub mod sinks;
pub mod store;

pub use audit::{AuditEntry, AuditLog, GENESIS_HASH};
pub use backend::{
    BackendDescriptor, BackendDriver, BackendError, BackendKind, BackendMetadata,
    BackendSelector, CircuitSpec, ExecutionHandle, PollStatus, RawResults, SubmitOptions,
};
pub use config::{
    ApprovalConfig, EngineConfig, OptimizerAlgorithm, OptimizerConfig, PolicyConfig, QamConfig,
    ReservationConfig, SlaConfig,
};
pub use error::CoreError;
pub use events::{EventBus, QamEvent, StampedEvent};
pub use registry::{
    apply_defaults, validate_parameters, AlgorithmFamily, AlgorithmSpec, MeasurementMethod,
    ParamType, ParameterSpec, SlaMetric, SlaRequirement, Template, TemplateRegistry,
    TemplateStatus,
};
pub use reservation::{Reservation, ReservationLedger, ReservationOutcome, ResourceAmounts};
pub use shared::{
    now_epoch_ms, prefixed_id, DeploymentState, ExecutionStatus, ExportControlLevel,
    PriorityClass, Severity, TenantContext,
};
pub use sinks::{
    deliver_with_backoff, BackoffPolicy, MetricBuffer, MetricPoint, MetricSink, NotificationSink,
    NotifyError, Signer, TracingMetricSink,
};
pub use store::QamStore;

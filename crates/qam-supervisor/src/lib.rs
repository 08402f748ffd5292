//! Deployment supervisor for QAM.
//!
//! The lifecycle state machine, execution runner, and monitoring loops that
//! tie the registry, policy gate, SLA engine, optimizer, and receipt log into
//! one control plane.

pub mod deployment;
pub mod error;
pub mod executor;
pub mod monitoring;
pub mod supervisor;

pub use deployment::{
    DeployInput, Deployment, DeploymentMetrics, ExecConfig, Execution, ExecutionPerf,
};
pub use error::SupervisorError;
pub use executor::{run_with_fallback, RunOutcome};
pub use monitoring::{start as start_monitoring, MonitoringHandle};
pub use supervisor::{DeploymentSupervisor, EngineStatus, ExecutionReport};

//! Supervisor error kinds.
//!
//! Every user-visible failure names the subject, its last known state, and
//! the next action via `Display`.

use thiserror::Error;

use qam_core::CoreError;
use qam_policy::PolicyError;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("deployment not found: {0}")]
    DeploymentNotFound(String),

    #[error("deployment {deployment_id} is {state}; {action}")]
    InvalidState {
        deployment_id: String,
        state: String,
        action: String,
    },

    #[error("backend {backend} unavailable for execution {execution_id}; next backend in the fallback chain will be tried")]
    BackendUnavailable {
        execution_id: String,
        backend: String,
    },

    #[error("backend {backend} timed out on execution {execution_id}")]
    BackendTimeout {
        execution_id: String,
        backend: String,
    },

    #[error("backend {backend} returned malformed results for execution {execution_id}: {detail}")]
    BackendMalformedResult {
        execution_id: String,
        backend: String,
        detail: String,
    },

    /// Every backend in the fallback chain failed; the execution is FAILED.
    /// Retry the execution or contact an administrator.
    #[error("fallback chain exhausted for execution {execution_id} after {attempts} attempt(s)")]
    FallbackChainExhausted {
        execution_id: String,
        attempts: usize,
    },

    #[error("no backend available for preference list on deployment {deployment_id}; retry later")]
    NoBackendAvailable { deployment_id: String },

    /// Resource allocation did not succeed before the retry deadline.
    #[error("resource allocation timed out for deployment {deployment_id}; retry or raise reservation limits")]
    AllocationTimeout { deployment_id: String },
}

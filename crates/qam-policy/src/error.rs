//! Policy error kinds. All surface to the caller; none are retried locally.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    /// The gate denied the request outright.
    #[error("policy denied for {subject_id}: {reason}")]
    PolicyDenied { subject_id: String, reason: String },

    /// The actor hit the sanctions list.
    #[error("sanctions screening blocked actor {actor_id}")]
    SanctionsBlocked { actor_id: String },

    /// One or more required licenses are absent.
    #[error("missing licenses for {subject_id}: {missing:?}")]
    LicenseMissing {
        subject_id: String,
        missing: Vec<String>,
    },

    /// A cached classification predates the current rule snapshot.
    #[error("classification for {template_id} is stale")]
    ClassificationStale { template_id: String },

    /// External screening/license service did not answer within its deadline.
    #[error("policy lookup timed out: {0}")]
    LookupTimeout(String),

    /// Illegal approval transition.
    #[error("approval {approval_id}: cannot move from {from} to {to}")]
    InvalidApprovalTransition {
        approval_id: String,
        from: String,
        to: String,
    },

    #[error("approval not found: {0}")]
    ApprovalNotFound(String),
}

//! Core error kinds.
//!
//! Input and resource errors raised by the registry, reservation ledger, and
//! receipt log. Policy, validation, and execution errors live in their owning
//! crates and convert into supervisor errors at the seam.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// No template with this id (and version, when given) exists in the registry.
    #[error("template not found: {id}")]
    TemplateNotFound { id: String },

    /// Template exists but is not in a deployable status.
    #[error("template {id} is {status} and cannot be deployed")]
    TemplateUnavailable { id: String, status: String },

    /// A configuration parameter failed schema validation.
    #[error("parameter '{name}' invalid: {reason}")]
    ParameterInvalid { name: String, reason: String },

    /// A required configuration value is absent.
    #[error("missing configuration: {0}")]
    ConfigMissing(String),

    /// The requested resources cannot be reserved right now.
    #[error("resources unavailable for {subject_id}: {detail}")]
    ResourceUnavailable { subject_id: String, detail: String },

    /// A reservation's hold lapsed before the deployment reached a stable state.
    #[error("reservation expired for {subject_id}")]
    ReservationExpired { subject_id: String },

    /// Audit chain verification failed. Fatal for the subject: no further
    /// writes are accepted on its stream.
    #[error("audit hash chain broken for {subject_id} at seq {seq}")]
    HashChainBroken { subject_id: String, seq: u64 },

    /// A shared lock was poisoned by a panicking holder.
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}

impl CoreError {
    /// True for errors the caller may retry after backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ResourceUnavailable { .. } | Self::ReservationExpired { .. }
        )
    }
}

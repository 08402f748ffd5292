//! Backend driver contract and backend selection.
//!
//! Drivers wrap external execution targets (classical simulator, emulator,
//! QPU). The selector consumes `describe()` only; the execution runner uses
//! the full submit/poll/cancel contract.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Kind of execution target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackendKind {
    Classical,
    Emulator,
    Qpu,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classical => "CLASSICAL",
            Self::Emulator => "EMULATOR",
            Self::Qpu => "QPU",
        }
    }
}

/// Static + live description of a backend, returned by `describe()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendDescriptor {
    pub name: String,
    pub kind: BackendKind,
    pub provider: String,
    pub region: String,
    /// Live availability in [0, 1].
    pub availability: f64,
    pub cost_per_shot: f64,
    /// Expected queue + dispatch latency, the selector's second tie-break.
    pub avg_queue_time_ms: u64,
    pub coherence_time_us: f64,
    pub gate_error_rate: f64,
}

impl BackendDescriptor {
    /// Noise floor subtracted from fidelity. Classical simulation is exact.
    pub fn baseline_noise(&self) -> f64 {
        match self.kind {
            BackendKind::Classical => 0.0,
            BackendKind::Emulator => 0.005 + self.gate_error_rate,
            BackendKind::Qpu => 0.02 + self.gate_error_rate * 10.0,
        }
    }

    /// Multiplier applied to min(qubits, depth) for quantum volume.
    pub fn noise_factor(&self) -> f64 {
        match self.kind {
            BackendKind::Classical => 1.0,
            BackendKind::Emulator => 0.9,
            BackendKind::Qpu => (1.0 - self.gate_error_rate * 100.0).clamp(0.1, 1.0),
        }
    }
}

/// Circuit to execute, derived from the template and deployment configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitSpec {
    pub template_id: String,
    pub algorithm: String,
    pub qubits: u32,
    pub depth: u32,
    pub gate_count: u32,
    pub parameters: BTreeMap<String, serde_json::Value>,
}

/// Submission options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitOptions {
    pub optimization_level: u8,
    pub error_mitigation: bool,
    /// Hard deadline for the whole submit/poll cycle.
    pub deadline_ms: u64,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            optimization_level: 1,
            error_mitigation: false,
            deadline_ms: 60_000,
        }
    }
}

/// Opaque handle to a submitted execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionHandle {
    pub backend: String,
    pub token: String,
}

/// Raw measurement payload returned by a driver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawResults {
    /// Bitstring → observed count.
    pub counts: BTreeMap<String, u64>,
    /// Per-shot confidence in [0, 1], one entry per shot (may be sampled).
    pub per_shot_confidence: Vec<f64>,
    pub metadata: BackendMetadata,
}

impl RawResults {
    pub fn total_shots(&self) -> u64 {
        self.counts.values().sum()
    }
}

/// Backend metadata attached to results; feeds GATE_ERROR_RATE and
/// COHERENCE_TIME metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendMetadata {
    pub kind: BackendKind,
    pub gate_error_rate: f64,
    pub coherence_time_us: f64,
}

impl Default for BackendMetadata {
    fn default() -> Self {
        Self {
            kind: BackendKind::Classical,
            gate_error_rate: 0.0,
            coherence_time_us: f64::INFINITY,
        }
    }
}

/// Poll result for a submitted execution.
#[derive(Debug, Clone)]
pub enum PollStatus {
    Queued,
    Running,
    Done(RawResults),
    Failed(String),
}

/// Errors raised by drivers.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend {0} unavailable")]
    Unavailable(String),
    #[error("backend {0} timed out")]
    Timeout(String),
    #[error("backend {backend} returned malformed results: {detail}")]
    MalformedResult { backend: String, detail: String },
    #[error("unknown execution handle on {0}")]
    UnknownHandle(String),
}

/// Driver contract for an execution target.
#[async_trait]
pub trait BackendDriver: Send + Sync {
    async fn submit(
        &self,
        circuit: &CircuitSpec,
        shots: u64,
        opts: &SubmitOptions,
    ) -> Result<ExecutionHandle, BackendError>;

    async fn poll(&self, handle: &ExecutionHandle) -> Result<PollStatus, BackendError>;

    async fn cancel(&self, handle: &ExecutionHandle) -> Result<(), BackendError>;

    fn describe(&self) -> BackendDescriptor;
}

// ---------------------------------------------------------------------------
// Selector
// ---------------------------------------------------------------------------

/// Minimum availability for a backend to be considered at all.
const MIN_AVAILABILITY: f64 = 0.5;

/// Chooses a backend from the deployment's preference list.
pub struct BackendSelector {
    drivers: Vec<Arc<dyn BackendDriver>>,
}

impl BackendSelector {
    pub fn new(drivers: Vec<Arc<dyn BackendDriver>>) -> Self {
        Self { drivers }
    }

    pub fn driver_by_name(&self, name: &str) -> Option<Arc<dyn BackendDriver>> {
        self.drivers
            .iter()
            .find(|d| d.describe().name == name)
            .cloned()
    }

    /// Rank candidate drivers for the given preference list.
    ///
    /// Candidates must be available and of a kind in the list. Ordering:
    /// lower expected cost-per-shot first; on tie, lower expected latency;
    /// on tie, the earlier element of the preference list. The full ranking is
    /// returned so the runner can walk the fallback chain on failure.
    pub fn rank(&self, preference: &[BackendKind]) -> Vec<Arc<dyn BackendDriver>> {
        let mut candidates: Vec<(Arc<dyn BackendDriver>, BackendDescriptor, usize)> = self
            .drivers
            .iter()
            .filter_map(|d| {
                let desc = d.describe();
                let pref_index = preference.iter().position(|k| *k == desc.kind)?;
                if desc.availability < MIN_AVAILABILITY {
                    return None;
                }
                Some((d.clone(), desc, pref_index))
            })
            .collect();

        candidates.sort_by(|a, b| {
            a.1.cost_per_shot
                .partial_cmp(&b.1.cost_per_shot)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.avg_queue_time_ms.cmp(&b.1.avg_queue_time_ms))
                .then(a.2.cmp(&b.2))
        });

        debug!(
            target: "qam::backend",
            candidates = candidates.len(),
            "Ranked backends for selection"
        );
        candidates.into_iter().map(|(d, _, _)| d).collect()
    }

    /// The best available backend for the preference list, if any.
    pub fn select(&self, preference: &[BackendKind]) -> Option<Arc<dyn BackendDriver>> {
        self.rank(preference).into_iter().next()
    }
}

//! Engine configuration.
//!
//! Plain serde structs with explicit defaults, loaded from a TOML file layered
//! under `QAM`-prefixed environment variables. Validated at ingress: invalid
//! combinations are rejected instead of surfacing at first use.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::CoreError;

/// Top-level engine configuration. Load from TOML or env.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QamConfig {
    /// Service identity, used in log targets and receipts.
    #[serde(default = "default_app_name")]
    pub app_name: String,
    /// Base directory for sled trees (audit streams, ledger, learner snapshots).
    #[serde(default = "default_storage_path")]
    pub storage_path: String,

    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub reservation: ReservationConfig,
    #[serde(default)]
    pub sla: SlaConfig,
}

fn default_app_name() -> String {
    "QAM Engine".to_string()
}

fn default_storage_path() -> String {
    "./data".to_string()
}

/// Monitoring loop cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Metric collection loop interval (default 30s).
    #[serde(default = "default_metric_interval_ms")]
    pub metric_interval_ms: u64,
    /// Compliance validation loop interval (default 60s).
    #[serde(default = "default_validation_interval_ms")]
    pub validation_interval_ms: u64,
    /// Alert queue processing loop interval (default 10s).
    #[serde(default = "default_alert_interval_ms")]
    pub alert_interval_ms: u64,
}

fn default_metric_interval_ms() -> u64 {
    30_000
}
fn default_validation_interval_ms() -> u64 {
    60_000
}
fn default_alert_interval_ms() -> u64 {
    10_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            metric_interval_ms: default_metric_interval_ms(),
            validation_interval_ms: default_validation_interval_ms(),
            alert_interval_ms: default_alert_interval_ms(),
        }
    }
}

impl EngineConfig {
    pub fn metric_interval(&self) -> Duration {
        Duration::from_millis(self.metric_interval_ms)
    }
    pub fn validation_interval(&self) -> Duration {
        Duration::from_millis(self.validation_interval_ms)
    }
    pub fn alert_interval(&self) -> Duration {
        Duration::from_millis(self.alert_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Classification cache TTL in days (default 90). Cache entries are also
    /// invalidated when the rule snapshot changes, regardless of age.
    #[serde(default = "default_classification_ttl_days")]
    pub classification_ttl_days: u32,
}

fn default_classification_ttl_days() -> u32 {
    90
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            classification_ttl_days: default_classification_ttl_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Per-review-stage deadline in hours (default 72). Pending approvals are
    /// scanned at least every stage_timeout/4.
    #[serde(default = "default_stage_timeout_hours")]
    pub stage_timeout_hours: u32,
    /// Overall workflow deadline in hours (default 336 = 14 days).
    #[serde(default = "default_total_timeout_hours")]
    pub total_timeout_hours: u32,
}

fn default_stage_timeout_hours() -> u32 {
    72
}
fn default_total_timeout_hours() -> u32 {
    336
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            stage_timeout_hours: default_stage_timeout_hours(),
            total_timeout_hours: default_total_timeout_hours(),
        }
    }
}

impl ApprovalConfig {
    pub fn stage_timeout(&self) -> chrono::Duration {
        chrono::Duration::hours(self.stage_timeout_hours as i64)
    }
    pub fn total_timeout(&self) -> chrono::Duration {
        chrono::Duration::hours(self.total_timeout_hours as i64)
    }
    /// Expiry scan cadence: stage_timeout/4, floored at one second.
    pub fn expiry_scan_interval(&self) -> Duration {
        let secs = (self.stage_timeout_hours as u64 * 3600) / 4;
        Duration::from_secs(secs.max(1))
    }
}

/// Learner algorithm choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OptimizerAlgorithm {
    #[default]
    Linucb,
    Thompson,
    EpsilonGreedy,
    Ucb1,
}

impl OptimizerAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linucb => "LINUCB",
            Self::Thompson => "THOMPSON",
            Self::EpsilonGreedy => "EPSILON_GREEDY",
            Self::Ucb1 => "UCB1",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default)]
    pub algorithm: OptimizerAlgorithm,
    /// LinUCB confidence coefficient (default 0.25).
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Arm count per (template, tenant) learner. Clamped to 2..=1000 at ingress.
    #[serde(default = "default_arm_count")]
    pub arm_count: usize,
    /// Largest permitted relative change per adapted parameter (default 0.2).
    #[serde(default = "default_max_parameter_change")]
    pub max_parameter_change: f64,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Window (observations) over which improvement is measured.
    #[serde(default = "default_convergence_window")]
    pub convergence_window: usize,
    /// Minimum observations before an adaptation may be proposed.
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    /// Recent-improvement floor for proposing an adaptation.
    #[serde(default = "default_improvement_threshold")]
    pub improvement_threshold: f64,
    /// Minimum seconds between adaptations.
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    /// Learner snapshot TTL in hours; stale snapshots load as fresh learners.
    #[serde(default = "default_snapshot_ttl_hours")]
    pub snapshot_ttl_hours: u32,
    /// RNG seed for Thompson/epsilon-greedy sampling. Fixed seed gives
    /// reproducible draws.
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

fn default_alpha() -> f64 {
    0.25
}
fn default_arm_count() -> usize {
    10
}
fn default_max_parameter_change() -> f64 {
    0.2
}
fn default_learning_rate() -> f64 {
    0.1
}
fn default_convergence_window() -> usize {
    20
}
fn default_min_samples() -> usize {
    10
}
fn default_improvement_threshold() -> f64 {
    0.02
}
fn default_cooldown_seconds() -> u64 {
    300
}
fn default_snapshot_ttl_hours() -> u32 {
    72
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            algorithm: OptimizerAlgorithm::default(),
            alpha: default_alpha(),
            arm_count: default_arm_count(),
            max_parameter_change: default_max_parameter_change(),
            learning_rate: default_learning_rate(),
            convergence_window: default_convergence_window(),
            min_samples: default_min_samples(),
            improvement_threshold: default_improvement_threshold(),
            cooldown_seconds: default_cooldown_seconds(),
            snapshot_ttl_hours: default_snapshot_ttl_hours(),
            rng_seed: None,
        }
    }
}

/// Hard caps on the shared resource pools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationConfig {
    #[serde(default = "default_qmins")]
    pub quantum_minutes: f64,
    #[serde(default = "default_cpu")]
    pub classical_cpu: f64,
    #[serde(default = "default_mem_gb")]
    pub memory_gb: f64,
    #[serde(default = "default_storage_gb")]
    pub storage_gb: f64,
    /// Deadline for retrying a contended reservation before the deployment fails.
    #[serde(default = "default_retry_deadline_secs")]
    pub retry_deadline_secs: u64,
}

fn default_qmins() -> f64 {
    60.0
}
fn default_cpu() -> f64 {
    64.0
}
fn default_mem_gb() -> f64 {
    256.0
}
fn default_storage_gb() -> f64 {
    1024.0
}
fn default_retry_deadline_secs() -> u64 {
    300
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            quantum_minutes: default_qmins(),
            classical_cpu: default_cpu(),
            memory_gb: default_mem_gb(),
            storage_gb: default_storage_gb(),
            retry_deadline_secs: default_retry_deadline_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaConfig {
    /// Rolling window in days for the compliance score (default 7).
    #[serde(default = "default_compliance_window_days")]
    pub compliance_window_days: u32,
    /// Identical (agreement, metric, severity) alerts within this many minutes
    /// are suppressed.
    #[serde(default = "default_alert_cooldown_minutes")]
    pub alert_cooldown_minutes: u32,
    /// Alerts for the same agreement within this window are correlated into a
    /// composite.
    #[serde(default = "default_correlation_window_seconds")]
    pub correlation_window_seconds: u32,
    /// Composite alerts escalate severity when the member count crosses this.
    #[serde(default = "default_escalation_count")]
    pub escalation_count: usize,
}

fn default_compliance_window_days() -> u32 {
    7
}
fn default_alert_cooldown_minutes() -> u32 {
    15
}
fn default_correlation_window_seconds() -> u32 {
    300
}
fn default_escalation_count() -> usize {
    3
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            compliance_window_days: default_compliance_window_days(),
            alert_cooldown_minutes: default_alert_cooldown_minutes(),
            correlation_window_seconds: default_correlation_window_seconds(),
            escalation_count: default_escalation_count(),
        }
    }
}

impl QamConfig {
    /// Load config from file and environment.
    /// Precedence: env `QAM_CONFIG` path > `config/qam.toml` > defaults,
    /// then `QAM__`-prefixed environment variables on top.
    pub fn load() -> Result<Self, CoreError> {
        let config_path =
            std::env::var("QAM_CONFIG").unwrap_or_else(|_| "config/qam".to_string());
        let builder = config::Config::builder();

        let path = Path::new(&config_path);
        let builder = if path.exists() || Path::new(&format!("{config_path}.toml")).exists() {
            builder.add_source(config::File::with_name(&config_path))
        } else {
            builder
        };

        let built = builder
            .add_source(config::Environment::with_prefix("QAM").separator("__"))
            .build()?;

        let cfg: QamConfig = built.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject invalid combinations at ingress.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.engine.metric_interval_ms == 0
            || self.engine.validation_interval_ms == 0
            || self.engine.alert_interval_ms == 0
        {
            return Err(CoreError::ConfigInvalid(
                "monitoring intervals must be non-zero".into(),
            ));
        }
        if !(0.0..=10.0).contains(&self.optimizer.alpha) {
            return Err(CoreError::ConfigInvalid(format!(
                "optimizer.alpha {} out of range [0, 10]",
                self.optimizer.alpha
            )));
        }
        if !(2..=1000).contains(&self.optimizer.arm_count) {
            return Err(CoreError::ConfigInvalid(format!(
                "optimizer.arm_count {} out of range [2, 1000]",
                self.optimizer.arm_count
            )));
        }
        if !(0.0..=1.0).contains(&self.optimizer.max_parameter_change) {
            return Err(CoreError::ConfigInvalid(
                "optimizer.max_parameter_change must be in [0, 1]".into(),
            ));
        }
        if self.approval.total_timeout_hours < self.approval.stage_timeout_hours {
            return Err(CoreError::ConfigInvalid(
                "approval.total_timeout_hours must be >= stage_timeout_hours".into(),
            ));
        }
        let limits = [
            self.reservation.quantum_minutes,
            self.reservation.classical_cpu,
            self.reservation.memory_gb,
            self.reservation.storage_gb,
        ];
        if limits.iter().any(|v| *v <= 0.0 || !v.is_finite()) {
            return Err(CoreError::ConfigInvalid(
                "reservation limits must be positive and finite".into(),
            ));
        }
        if self.sla.compliance_window_days == 0 {
            return Err(CoreError::ConfigInvalid(
                "sla.compliance_window_days must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

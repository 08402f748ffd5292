//! Shared types used across all QAM crates.

use serde::{Deserialize, Serialize};

/// Default tenant ID when not specified (single-tenant mode).
pub const DEFAULT_TENANT_ID: &str = "default";

/// Tenant context for multi-tenant isolation across the QAM system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantContext {
    /// Unique tenant identifier.
    pub tenant_id: String,
    /// Optional correlation id for request tracing.
    pub correlation_id: Option<String>,
    /// Scheduling priority class. Reservations and reward weighting are keyed by this.
    #[serde(default)]
    pub priority: PriorityClass,
}

impl TenantContext {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            correlation_id: None,
            priority: PriorityClass::Standard,
        }
    }

    pub fn with_priority(mut self, priority: PriorityClass) -> Self {
        self.priority = priority;
        self
    }

    /// Resolved tenant ID (never empty).
    pub fn resolved_tenant_id(&self) -> &str {
        if self.tenant_id.is_empty() {
            DEFAULT_TENANT_ID
        } else {
            &self.tenant_id
        }
    }
}

/// Tenant priority class. Higher rank wins reservation tie-breaks and
/// boosts reliability/security weights in the reward signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PriorityClass {
    Low,
    #[default]
    Standard,
    High,
    Critical,
}

impl PriorityClass {
    /// Numeric rank: higher is more important.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Standard => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Standard => "standard",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

// ---------------------------------------------------------------------------
// Lifecycle state enums
// ---------------------------------------------------------------------------

/// Deployment lifecycle state.
///
/// ```text
/// PENDING → CONFIGURING → VALIDATING_EXPORT_CONTROL → ALLOCATING_RESOURCES
///         → DEPLOYED ⇄ EXECUTING → COMPLETED
/// PENDING..DEPLOYED → FAILED
/// DEPLOYED → SUSPENDED → DEPLOYED | ARCHIVED
/// COMPLETED|FAILED → ARCHIVED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    Pending,
    Configuring,
    ValidatingExportControl,
    AllocatingResources,
    Deployed,
    Executing,
    Suspended,
    Completed,
    Failed,
    Archived,
}

impl DeploymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Configuring => "configuring",
            Self::ValidatingExportControl => "validating_export_control",
            Self::AllocatingResources => "allocating_resources",
            Self::Deployed => "deployed",
            Self::Executing => "executing",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Archived => "archived",
        }
    }

    /// Terminal states are absorbing except for the COMPLETED|FAILED → ARCHIVED hop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Archived)
    }

    /// True when the transition `self → next` is on a legal path.
    pub fn can_transition_to(&self, next: DeploymentState) -> bool {
        use DeploymentState::*;
        match (self, next) {
            (Pending, Configuring)
            | (Configuring, ValidatingExportControl)
            | (ValidatingExportControl, AllocatingResources)
            | (AllocatingResources, Deployed)
            | (Deployed, Executing)
            | (Executing, Deployed)
            | (Executing, Completed)
            | (Deployed, Completed)
            | (Deployed, Suspended)
            | (Suspended, Deployed)
            | (Suspended, Archived)
            | (Completed, Archived)
            | (Failed, Archived) => true,
            // Any pre-deployed or executing stage may fail.
            (Pending, Failed)
            | (Configuring, Failed)
            | (ValidatingExportControl, Failed)
            | (AllocatingResources, Failed)
            | (Deployed, Failed)
            | (Executing, Failed) => true,
            _ => false,
        }
    }
}

/// Per-execution status. Terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Queued,
    Validating,
    Allocating,
    Executing,
    PostProcessing,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Validating => "validating",
            Self::Allocating => "allocating",
            Self::Executing => "executing",
            Self::PostProcessing => "post_processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        }
    }
}

// ---------------------------------------------------------------------------
// Export control and violation severity (shared by policy, SLA, and events)
// ---------------------------------------------------------------------------

/// Export-control level assigned by algorithm classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExportControlLevel {
    Unrestricted,
    DualUse,
    Restricted,
    ItarControlled,
    EarControlled,
    Classified,
}

impl ExportControlLevel {
    /// Ordering used for "at least this restrictive" checks.
    pub fn restrictiveness(&self) -> u8 {
        match self {
            Self::Unrestricted => 0,
            Self::DualUse => 1,
            Self::Restricted => 2,
            Self::EarControlled => 3,
            Self::ItarControlled => 4,
            Self::Classified => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unrestricted => "UNRESTRICTED",
            Self::DualUse => "DUAL_USE",
            Self::Restricted => "RESTRICTED",
            Self::ItarControlled => "ITAR_CONTROLLED",
            Self::EarControlled => "EAR_CONTROLLED",
            Self::Classified => "CLASSIFIED",
        }
    }
}

/// Violation severity, derived from the deviation ratio |value − threshold| / threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Severity from deviation ratio: ≥0.5 CRITICAL, ≥0.2 HIGH, ≥0.1 MEDIUM, else LOW.
    pub fn from_deviation(ratio: f64) -> Self {
        if ratio >= 0.5 {
            Self::Critical
        } else if ratio >= 0.2 {
            Self::High
        } else if ratio >= 0.1 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    /// Escalate one step (saturating at CRITICAL).
    pub fn escalate(&self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High => Self::Critical,
            Self::Critical => Self::Critical,
        }
    }
}

// ---------------------------------------------------------------------------
// Time helpers
// ---------------------------------------------------------------------------

/// Current epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Fresh v4 UUID string with a type prefix, e.g. `dep-6f9a…`.
pub fn prefixed_id(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4())
}

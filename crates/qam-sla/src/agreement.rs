//! SLA agreements.
//!
//! One agreement per (template, tenant) deployment, carrying the correctness
//! requirements, performance targets, monitoring plan, and the live compliance
//! block the tracker maintains.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use qam_core::registry::{SlaMetric, SlaRequirement};
use qam_core::prefixed_id;

/// Performance targets alongside the correctness requirements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceTargets {
    pub max_execution_time_ms: u64,
    pub max_queue_time_ms: u64,
    /// Required availability in [0, 1].
    pub availability: f64,
    pub response_time_ms: u64,
}

impl Default for PerformanceTargets {
    fn default() -> Self {
        Self {
            max_execution_time_ms: 300_000,
            max_queue_time_ms: 600_000,
            availability: 0.99,
            response_time_ms: 5_000,
        }
    }
}

/// What the monitoring loops sample for this agreement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringPlan {
    pub frequency_secs: u64,
    pub metrics: Vec<SlaMetric>,
}

impl Default for MonitoringPlan {
    fn default() -> Self {
        Self {
            frequency_secs: 60,
            metrics: vec![SlaMetric::ErrorRate, SlaMetric::Fidelity],
        }
    }
}

/// Compliance status of an agreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplianceStatus {
    #[default]
    Compliant,
    AtRisk,
    Violated,
}

impl ComplianceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compliant => "COMPLIANT",
            Self::AtRisk => "AT_RISK",
            Self::Violated => "VIOLATED",
        }
    }
}

/// A service credit issued against a violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCredit {
    pub violation_id: String,
    /// Credit as a percentage of the billing period, in [0, 100].
    pub percent: f64,
    pub issued_at: DateTime<Utc>,
}

/// Live compliance block. Score in [0, 1]; violations only lower it, repairs
/// (violations aging out of the window) restore it, never above 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceBlock {
    pub score: f64,
    pub status: ComplianceStatus,
    /// Open violation ids.
    pub violations: Vec<String>,
    pub credits: Vec<ServiceCredit>,
}

impl Default for ComplianceBlock {
    fn default() -> Self {
        Self {
            score: 1.0,
            status: ComplianceStatus::Compliant,
            violations: Vec::new(),
            credits: Vec::new(),
        }
    }
}

/// One SLA agreement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaAgreement {
    pub id: String,
    pub template_id: String,
    pub tenant_id: String,
    pub requirements: Vec<SlaRequirement>,
    #[serde(default)]
    pub performance: PerformanceTargets,
    #[serde(default)]
    pub monitoring: MonitoringPlan,
    #[serde(default)]
    pub compliance: ComplianceBlock,
    pub valid_until: DateTime<Utc>,
}

impl SlaAgreement {
    /// Build an agreement from a template's requirements.
    pub fn from_requirements(
        template_id: &str,
        tenant_id: &str,
        requirements: Vec<SlaRequirement>,
        valid_until: DateTime<Utc>,
    ) -> Self {
        Self {
            id: prefixed_id("sla"),
            template_id: template_id.to_string(),
            tenant_id: tenant_id.to_string(),
            requirements,
            performance: PerformanceTargets::default(),
            monitoring: MonitoringPlan::default(),
            compliance: ComplianceBlock::default(),
            valid_until,
        }
    }

    pub fn requirement_for(&self, metric: SlaMetric) -> Option<&SlaRequirement> {
        self.requirements.iter().find(|r| r.metric == metric)
    }
}

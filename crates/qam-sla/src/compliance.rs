//! Compliance tracking.
//!
//! Per-agreement rolling-window score: `max(0, 1 − 0.1·N_recent)` over the
//! configured window. Violations only lower the score; aging out of the
//! window restores it, never above 1. CRITICAL violations mark the agreement
//! VIOLATED, anything else AT_RISK. HIGH and CRITICAL violations issue
//! service credits, capped at 100% per window.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tracing::info;

use crate::agreement::{ComplianceStatus, ServiceCredit, SlaAgreement};
use crate::stats::{summarize, SampleSummary};
use crate::validator::Violation;
use qam_core::registry::SlaMetric;
use qam_core::{Severity, SlaConfig};

/// Metric samples retained per (agreement, metric) for trend summaries.
const SAMPLE_HISTORY: usize = 256;

#[derive(Debug, Error)]
pub enum SlaError {
    #[error("agreement not found: {0}")]
    AgreementNotFound(String),

    /// A shared lock was poisoned by a panicking holder.
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Credit percentage by severity.
fn credit_percent(severity: Severity) -> f64 {
    match severity {
        Severity::Critical => 25.0,
        Severity::High => 10.0,
        _ => 0.0,
    }
}

/// Owns agreements and their violation history.
pub struct ComplianceTracker {
    window: Duration,
    agreements: DashMap<String, SlaAgreement>,
    history: DashMap<String, Vec<Violation>>,
    samples: DashMap<(String, SlaMetric), Vec<f64>>,
}

impl ComplianceTracker {
    pub fn new(config: &SlaConfig) -> Self {
        Self {
            window: Duration::days(config.compliance_window_days as i64),
            agreements: DashMap::new(),
            history: DashMap::new(),
            samples: DashMap::new(),
        }
    }

    /// Record an observed metric value for trend analysis.
    pub fn record_metric_sample(&self, agreement_id: &str, metric: SlaMetric, value: f64) {
        let mut entry = self
            .samples
            .entry((agreement_id.to_string(), metric))
            .or_default();
        if entry.len() >= SAMPLE_HISTORY {
            entry.remove(0);
        }
        entry.push(value);
    }

    /// Descriptive statistics over the recorded samples; `None` below three
    /// samples.
    pub fn metric_summary(
        &self,
        agreement_id: &str,
        metric: SlaMetric,
    ) -> Option<SampleSummary> {
        self.samples
            .get(&(agreement_id.to_string(), metric))
            .and_then(|s| summarize(s.value()))
    }

    pub fn register(&self, agreement: SlaAgreement) {
        self.agreements.insert(agreement.id.clone(), agreement);
    }

    pub fn get(&self, agreement_id: &str) -> Result<SlaAgreement, SlaError> {
        self.agreements
            .get(agreement_id)
            .map(|a| a.clone())
            .ok_or_else(|| SlaError::AgreementNotFound(agreement_id.to_string()))
    }

    pub fn agreement_ids(&self) -> Vec<String> {
        self.agreements.iter().map(|a| a.id.clone()).collect()
    }

    /// Record a violation and recompute the agreement's compliance block.
    pub fn record_violation(&self, violation: Violation) -> Result<SlaAgreement, SlaError> {
        let agreement_id = violation.agreement_id.clone();
        if !self.agreements.contains_key(&agreement_id) {
            return Err(SlaError::AgreementNotFound(agreement_id));
        }
        let now = violation.created_at;
        self.history
            .entry(agreement_id.clone())
            .or_default()
            .push(violation);
        self.recompute(&agreement_id, now)
    }

    /// Mark a violation resolved; the score recovers once it ages out of the
    /// window, not before.
    pub fn resolve_violation(
        &self,
        agreement_id: &str,
        violation_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), SlaError> {
        let mut history = self
            .history
            .get_mut(agreement_id)
            .ok_or_else(|| SlaError::AgreementNotFound(agreement_id.to_string()))?;
        if let Some(v) = history.iter_mut().find(|v| v.id == violation_id) {
            v.resolved_at = Some(at);
        }
        Ok(())
    }

    /// Recompute the compliance block as of `now`. Called on every violation
    /// and by the periodic compliance loop so scores repair as violations age
    /// out.
    pub fn recompute(
        &self,
        agreement_id: &str,
        now: DateTime<Utc>,
    ) -> Result<SlaAgreement, SlaError> {
        let mut entry = self
            .agreements
            .get_mut(agreement_id)
            .ok_or_else(|| SlaError::AgreementNotFound(agreement_id.to_string()))?;
        let agreement = entry.value_mut();

        let window_start = now - self.window;
        let binding = self.history.get(agreement_id);
        let recent: Vec<&Violation> = binding
            .as_deref()
            .map(|h| {
                h.iter()
                    .filter(|v| v.created_at >= window_start && v.created_at <= now)
                    .collect()
            })
            .unwrap_or_default();

        let n_recent = recent.len();
        agreement.compliance.score = (1.0 - 0.1 * n_recent as f64).clamp(0.0, 1.0);
        agreement.compliance.status = if recent.iter().any(|v| v.severity == Severity::Critical) {
            ComplianceStatus::Violated
        } else if n_recent > 0 {
            ComplianceStatus::AtRisk
        } else {
            ComplianceStatus::Compliant
        };
        agreement.compliance.violations = recent
            .iter()
            .filter(|v| v.resolved_at.is_none())
            .map(|v| v.id.clone())
            .collect();

        // Credits: one per HIGH/CRITICAL violation in the window, total capped
        // at 100%.
        let mut credits: Vec<ServiceCredit> = Vec::new();
        let mut total = 0.0;
        for violation in &recent {
            let percent = credit_percent(violation.severity);
            if percent == 0.0 {
                continue;
            }
            let granted = percent.min(100.0 - total);
            if granted <= 0.0 {
                break;
            }
            total += granted;
            credits.push(ServiceCredit {
                violation_id: violation.id.clone(),
                percent: granted,
                issued_at: violation.created_at,
            });
        }
        agreement.compliance.credits = credits;

        info!(
            target: "qam::sla",
            agreement = agreement_id,
            score = agreement.compliance.score,
            status = agreement.compliance.status.as_str(),
            recent = n_recent,
            "Compliance recomputed"
        );
        Ok(agreement.clone())
    }

    /// Violations recorded for an agreement (all time).
    pub fn violations(&self, agreement_id: &str) -> Vec<Violation> {
        self.history
            .get(agreement_id)
            .map(|h| h.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remediation::RemediationPlan;
    use qam_core::prefixed_id;
    use qam_core::registry::{MeasurementMethod, SlaMetric, SlaRequirement};
    use qam_core::BackendKind;

    fn tracker() -> ComplianceTracker {
        ComplianceTracker::new(&SlaConfig::default())
    }

    fn agreement() -> SlaAgreement {
        SlaAgreement::from_requirements(
            "qt-optimizer-v1",
            "acme",
            vec![SlaRequirement {
                metric: SlaMetric::ErrorRate,
                threshold: 0.05,
                method: MeasurementMethod::Sampling,
                fallback_chain: vec![BackendKind::Emulator],
            }],
            Utc::now() + Duration::days(365),
        )
    }

    fn violation(agreement_id: &str, severity: Severity, at: DateTime<Utc>) -> Violation {
        Violation {
            id: prefixed_id("vio"),
            agreement_id: agreement_id.to_string(),
            execution_id: "exe-1".into(),
            metric: "ERROR_RATE".into(),
            severity,
            threshold: 0.05,
            actual: 0.18,
            remediation: RemediationPlan::for_metric(SlaMetric::ErrorRate),
            created_at: at,
            resolved_at: None,
        }
    }

    #[test]
    fn three_violations_in_window_move_to_at_risk() {
        let tracker = tracker();
        let agreement = agreement();
        let id = agreement.id.clone();
        tracker.register(agreement);

        let now = Utc::now();
        for i in 0..3 {
            let updated = tracker
                .record_violation(violation(&id, Severity::High, now - Duration::hours(i)))
                .unwrap();
            assert_eq!(updated.compliance.status, ComplianceStatus::AtRisk);
        }
        let updated = tracker.get(&id).unwrap();
        assert!((updated.compliance.score - 0.7).abs() < 1e-9);
        assert_eq!(updated.compliance.violations.len(), 3);
    }

    #[test]
    fn critical_violation_marks_violated() {
        let tracker = tracker();
        let agreement = agreement();
        let id = agreement.id.clone();
        tracker.register(agreement);
        let updated = tracker
            .record_violation(violation(&id, Severity::Critical, Utc::now()))
            .unwrap();
        assert_eq!(updated.compliance.status, ComplianceStatus::Violated);
    }

    #[test]
    fn score_repairs_as_violations_age_out() {
        let tracker = tracker();
        let agreement = agreement();
        let id = agreement.id.clone();
        tracker.register(agreement);

        let old = Utc::now() - Duration::days(10);
        tracker
            .record_violation(violation(&id, Severity::High, old))
            .unwrap();
        // As of now, the 10-day-old violation is outside the 7-day window.
        let updated = tracker.recompute(&id, Utc::now()).unwrap();
        assert_eq!(updated.compliance.score, 1.0);
        assert_eq!(updated.compliance.status, ComplianceStatus::Compliant);
    }

    #[test]
    fn score_never_negative_or_above_one() {
        let tracker = tracker();
        let agreement = agreement();
        let id = agreement.id.clone();
        tracker.register(agreement);
        let now = Utc::now();
        for _ in 0..15 {
            tracker
                .record_violation(violation(&id, Severity::Low, now))
                .unwrap();
        }
        let updated = tracker.get(&id).unwrap();
        assert_eq!(updated.compliance.score, 0.0);
    }

    #[test]
    fn metric_samples_summarize_after_three() {
        let tracker = tracker();
        let agreement = agreement();
        let id = agreement.id.clone();
        tracker.register(agreement);

        tracker.record_metric_sample(&id, SlaMetric::ErrorRate, 0.02);
        tracker.record_metric_sample(&id, SlaMetric::ErrorRate, 0.03);
        assert!(tracker.metric_summary(&id, SlaMetric::ErrorRate).is_none());
        tracker.record_metric_sample(&id, SlaMetric::ErrorRate, 0.04);
        let summary = tracker
            .metric_summary(&id, SlaMetric::ErrorRate)
            .expect("three samples");
        assert_eq!(summary.count, 3);
        assert!((summary.mean - 0.03).abs() < 1e-12);
        // Other metrics keep separate histories.
        assert!(tracker.metric_summary(&id, SlaMetric::Fidelity).is_none());
    }

    #[test]
    fn credits_issue_for_high_and_critical_capped() {
        let tracker = tracker();
        let agreement = agreement();
        let id = agreement.id.clone();
        tracker.register(agreement);
        let now = Utc::now();
        // 5 × 25% = 125%, capped at 100%.
        for _ in 0..5 {
            tracker
                .record_violation(violation(&id, Severity::Critical, now))
                .unwrap();
        }
        let updated = tracker.get(&id).unwrap();
        let total: f64 = updated.compliance.credits.iter().map(|c| c.percent).sum();
        assert!((total - 100.0).abs() < 1e-9);
        // LOW violations earn nothing.
        tracker
            .record_violation(violation(&id, Severity::Low, now))
            .unwrap();
        let updated = tracker.get(&id).unwrap();
        let total_after: f64 = updated.compliance.credits.iter().map(|c| c.percent).sum();
        assert!((total_after - 100.0).abs() < 1e-9);
    }
}

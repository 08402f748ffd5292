//! Post-execution SLA validation.
//!
//! `validate` checks every requirement of an agreement against the execution
//! evidence and grades the whole run; `identify_violations` is a synchronous
//! pure function from the results to violation records, each carrying its
//! deterministic remediation plan.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::agreement::SlaAgreement;
use crate::metrics::{check_metric, ExecutionEvidence, MetricResult};
use crate::remediation::RemediationPlan;
use qam_core::{prefixed_id, Severity};

/// Letter grade over the share of passed requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlaGrade {
    Excellent,
    Good,
    Satisfactory,
    Poor,
    Failed,
}

impl SlaGrade {
    /// EXCELLENT ≥ 0.95, GOOD ≥ 0.85, SATISFACTORY ≥ 0.7, POOR ≥ 0.5, else FAILED.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.95 {
            Self::Excellent
        } else if score >= 0.85 {
            Self::Good
        } else if score >= 0.7 {
            Self::Satisfactory
        } else if score >= 0.5 {
            Self::Poor
        } else {
            Self::Failed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excellent => "EXCELLENT",
            Self::Good => "GOOD",
            Self::Satisfactory => "SATISFACTORY",
            Self::Poor => "POOR",
            Self::Failed => "FAILED",
        }
    }
}

/// Overall pass mark.
const PASS_SCORE: f64 = 0.7;

/// Outcome of validating one execution against its agreement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaReport {
    pub execution_id: String,
    pub agreement_id: String,
    pub results: Vec<MetricResult>,
    /// passed / total requirements, in [0, 1].
    pub score: f64,
    pub grade: SlaGrade,
    pub passed: bool,
    pub validated_at: DateTime<Utc>,
}

/// A metric result that failed its threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub id: String,
    pub agreement_id: String,
    pub execution_id: String,
    pub metric: String,
    pub severity: Severity,
    pub threshold: f64,
    pub actual: f64,
    pub remediation: RemediationPlan,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Validate the evidence against every requirement in the agreement.
pub fn validate(evidence: &ExecutionEvidence, agreement: &SlaAgreement) -> SlaReport {
    let results: Vec<MetricResult> = agreement
        .requirements
        .iter()
        .map(|req| check_metric(req.metric, req.threshold, req.method, evidence))
        .collect();

    let total = results.len().max(1);
    let passed_count = results.iter().filter(|r| r.passed).count();
    let score = passed_count as f64 / total as f64;
    let grade = SlaGrade::from_score(score);

    let report = SlaReport {
        execution_id: evidence.execution_id.clone(),
        agreement_id: agreement.id.clone(),
        results,
        score,
        grade,
        passed: score >= PASS_SCORE,
        validated_at: Utc::now(),
    };
    info!(
        target: "qam::sla",
        execution = %report.execution_id,
        agreement = %report.agreement_id,
        score = report.score,
        grade = report.grade.as_str(),
        "Execution validated"
    );
    report
}

/// Derive violations from a report. Pure and synchronous: severity comes from
/// the deviation ratio |value − threshold| / threshold, and each violation
/// carries the deterministic plan for its metric.
pub fn identify_violations(report: &SlaReport) -> Vec<Violation> {
    report
        .results
        .iter()
        .filter(|r| !r.passed)
        .map(|r| {
            let deviation = if r.threshold == 0.0 {
                // No meaningful ratio against a zero threshold.
                if r.value == 0.0 {
                    0.0
                } else {
                    1.0
                }
            } else {
                (r.value - r.threshold).abs() / r.threshold.abs()
            };
            Violation {
                id: prefixed_id("vio"),
                agreement_id: report.agreement_id.clone(),
                execution_id: report.execution_id.clone(),
                metric: r.metric.as_str().to_string(),
                severity: Severity::from_deviation(deviation),
                threshold: r.threshold,
                actual: r.value,
                remediation: RemediationPlan::for_metric(r.metric),
                created_at: report.validated_at,
                resolved_at: None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use qam_core::registry::{MeasurementMethod, SlaMetric, SlaRequirement};
    use qam_core::{BackendDescriptor, BackendKind, BackendMetadata, RawResults};
    use std::collections::BTreeMap;

    fn agreement(requirements: Vec<SlaRequirement>) -> SlaAgreement {
        SlaAgreement::from_requirements(
            "qt-optimizer-v1",
            "acme",
            requirements,
            Utc::now() + chrono::Duration::days(365),
        )
    }

    fn requirement(metric: SlaMetric, threshold: f64) -> SlaRequirement {
        SlaRequirement {
            metric,
            threshold,
            method: MeasurementMethod::Sampling,
            fallback_chain: vec![BackendKind::Emulator, BackendKind::Classical],
        }
    }

    fn evidence_with_error_rate(rate: f64) -> ExecutionEvidence {
        let shots = 100usize;
        let low = (rate * shots as f64).round() as usize;
        let mut confidences = vec![0.3; low];
        confidences.extend(vec![0.9; shots - low]);
        let mut counts = BTreeMap::new();
        counts.insert("00".to_string(), 95u64);
        counts.insert("11".to_string(), 5u64);
        ExecutionEvidence {
            execution_id: "exe-1".into(),
            results: RawResults {
                counts,
                per_shot_confidence: confidences,
                metadata: BackendMetadata {
                    kind: BackendKind::Emulator,
                    gate_error_rate: 0.001,
                    coherence_time_us: 90.0,
                },
            },
            backend: BackendDescriptor {
                name: "emu".into(),
                kind: BackendKind::Emulator,
                provider: "test".into(),
                region: "local".into(),
                availability: 1.0,
                cost_per_shot: 0.001,
                avg_queue_time_ms: 5,
                coherence_time_us: 90.0,
                gate_error_rate: 0.001,
            },
            qubits: 8,
            depth: 30,
            shots: 100,
            execution_ms: 900,
            queue_ms: 100,
            cost: 0.1,
        }
    }

    #[test]
    fn passing_execution_scores_full() {
        let agreement = agreement(vec![
            requirement(SlaMetric::ErrorRate, 0.05),
            requirement(SlaMetric::SuccessProbability, 0.6),
        ]);
        let report = validate(&evidence_with_error_rate(0.01), &agreement);
        assert_eq!(report.score, 1.0);
        assert_eq!(report.grade, SlaGrade::Excellent);
        assert!(report.passed);
        assert!(identify_violations(&report).is_empty());
    }

    #[test]
    fn violation_severity_follows_deviation() {
        // error_rate 0.18 against threshold 0.05: deviation 2.6 → CRITICAL.
        let agreement = agreement(vec![requirement(SlaMetric::ErrorRate, 0.05)]);
        let report = validate(&evidence_with_error_rate(0.18), &agreement);
        assert!(!report.passed);
        let violations = identify_violations(&report);
        assert_eq!(violations.len(), 1);
        let v = &violations[0];
        assert_eq!(v.metric, "ERROR_RATE");
        assert_eq!(v.severity, Severity::Critical);
        assert_eq!(
            v.remediation.first_action().unwrap().as_str(),
            "BACKEND_SWITCH"
        );
        assert!((v.actual - 0.18).abs() < 1e-9);
    }

    #[test]
    fn moderate_deviation_is_high() {
        // 0.0625 vs 0.05 → deviation 0.25 → HIGH.
        let agreement = agreement(vec![requirement(SlaMetric::ErrorRate, 0.05)]);
        let mut report = validate(&evidence_with_error_rate(0.06), &agreement);
        report.results[0].value = 0.0625;
        report.results[0].passed = false;
        let violations = identify_violations(&report);
        assert_eq!(violations[0].severity, Severity::High);
    }

    #[test]
    fn grade_bands() {
        assert_eq!(SlaGrade::from_score(1.0), SlaGrade::Excellent);
        assert_eq!(SlaGrade::from_score(0.9), SlaGrade::Good);
        assert_eq!(SlaGrade::from_score(0.75), SlaGrade::Satisfactory);
        assert_eq!(SlaGrade::from_score(0.6), SlaGrade::Poor);
        assert_eq!(SlaGrade::from_score(0.4), SlaGrade::Failed);
    }

    #[test]
    fn mixed_results_grade_partial() {
        let agreement = agreement(vec![
            requirement(SlaMetric::ErrorRate, 0.05),
            requirement(SlaMetric::SuccessProbability, 0.99),
        ]);
        let report = validate(&evidence_with_error_rate(0.01), &agreement);
        // Error rate passes, success probability (0.95) fails.
        assert_eq!(report.score, 0.5);
        assert_eq!(report.grade, SlaGrade::Poor);
        assert!(!report.passed);
        assert_eq!(identify_violations(&report).len(), 1);
    }
}

//! Correctness metric computation.
//!
//! Each metric is a pure function over the execution evidence. Uncomputable
//! metrics and insufficient samples never raise; they produce a failed result
//! with confidence below 0.5 so downstream severity stays honest.

use serde::{Deserialize, Serialize};

use qam_core::registry::{MeasurementMethod, SlaMetric};
use qam_core::{BackendDescriptor, BackendKind, RawResults};

/// Evidence the validator consumes for one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvidence {
    pub execution_id: String,
    pub results: RawResults,
    pub backend: BackendDescriptor,
    pub qubits: u32,
    pub depth: u32,
    pub shots: u64,
    pub execution_ms: u64,
    pub queue_ms: u64,
    pub cost: f64,
}

/// Result of checking one metric against its threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricResult {
    pub metric: SlaMetric,
    pub value: f64,
    pub threshold: f64,
    pub passed: bool,
    /// Confidence in [0, 1]; below 0.5 means the value is not trustworthy.
    pub confidence: f64,
    pub details: String,
}

/// Confidence attached to a metric by its measurement method.
pub fn method_confidence(method: MeasurementMethod, sample_count: u64) -> f64 {
    match method {
        MeasurementMethod::Sampling => {
            if sample_count == 0 {
                0.0
            } else {
                (0.5 + (sample_count as f64).log10() * 0.1).min(0.99)
            }
        }
        MeasurementMethod::ProcessTomography => 0.95,
        MeasurementMethod::RandomizedBenchmarking => 0.90,
        MeasurementMethod::BackendMetadata => 0.8,
    }
}

/// Fraction of shots whose per-shot confidence is below 0.5.
pub fn error_rate(results: &RawResults) -> Option<f64> {
    if results.per_shot_confidence.is_empty() {
        return None;
    }
    let low = results
        .per_shot_confidence
        .iter()
        .filter(|c| **c < 0.5)
        .count();
    Some(low as f64 / results.per_shot_confidence.len() as f64)
}

/// Compute one metric. Returns `(value, details)` or `None` when the evidence
/// cannot support the metric.
fn compute(metric: SlaMetric, evidence: &ExecutionEvidence) -> Option<(f64, String)> {
    match metric {
        SlaMetric::ErrorRate => error_rate(&evidence.results)
            .map(|v| (v, format!("{} shots sampled", evidence.results.per_shot_confidence.len()))),
        SlaMetric::Fidelity => {
            if evidence.backend.kind == BackendKind::Classical {
                return Some((1.0, "classical simulation is exact".into()));
            }
            let er = error_rate(&evidence.results)?;
            let value = (1.0 - er - evidence.backend.baseline_noise()).max(0.0);
            Some((value, format!("error_rate={er:.4}, baseline_noise={:.4}", evidence.backend.baseline_noise())))
        }
        SlaMetric::SuccessProbability => {
            let total = evidence.results.total_shots();
            if total == 0 {
                return None;
            }
            let max = *evidence.results.counts.values().max()? as f64;
            Some((max / total as f64, format!("{total} shots, modal outcome {max}")))
        }
        SlaMetric::QuantumVolume => {
            let value =
                evidence.qubits.min(evidence.depth) as f64 * evidence.backend.noise_factor();
            Some((value, format!(
                "min({}, {}) × noise_factor {:.3}",
                evidence.qubits,
                evidence.depth,
                evidence.backend.noise_factor()
            )))
        }
        SlaMetric::GateErrorRate => Some((
            evidence.results.metadata.gate_error_rate,
            "from backend metadata".into(),
        )),
        SlaMetric::CoherenceTime => {
            let t = evidence.results.metadata.coherence_time_us;
            if t.is_finite() {
                Some((t, "from backend metadata".into()))
            } else {
                // Classical targets have no coherence limit; report a value
                // that passes any threshold.
                Some((f64::MAX, "no coherence limit on this backend".into()))
            }
        }
    }
}

/// Check one requirement against the evidence.
pub fn check_metric(
    metric: SlaMetric,
    threshold: f64,
    method: MeasurementMethod,
    evidence: &ExecutionEvidence,
) -> MetricResult {
    let Some((value, details)) = compute(metric, evidence) else {
        return MetricResult {
            metric,
            value: 0.0,
            threshold,
            passed: false,
            confidence: 0.3,
            details: "metric uncomputable from available evidence".into(),
        };
    };

    let sample_count = evidence.results.per_shot_confidence.len() as u64;
    let confidence = method_confidence(method, sample_count);
    let passed = if metric.lower_is_better() {
        value <= threshold
    } else {
        value >= threshold
    };

    MetricResult {
        metric,
        value,
        threshold,
        passed,
        confidence,
        details,
    }
}

//! Algorithm classification.
//!
//! Deterministic mapping from algorithm family and resource requirements to an
//! export-control level and control-category tag. Results are cached per
//! (template id, version, rule-snapshot fingerprint); a rule update changes
//! the fingerprint, which makes every prior entry unreachable. TTL applies on
//! top of that.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use qam_core::registry::{AlgorithmFamily, Template};
use qam_core::ExportControlLevel;

/// Outcome of classifying a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub level: ExportControlLevel,
    /// Control-category tag, e.g. `USML-XIII(b)` or `ECCN-4A994`.
    pub category: String,
    pub control_codes: Vec<String>,
    /// Classifier confidence in [0, 1].
    pub confidence: f64,
}

/// Deterministic rule-based classifier.
///
/// Same inputs always produce the same classification: the mapping depends
/// only on the template's algorithm families and circuit shape, and on the
/// declared classification (which acts as a floor, never a ceiling).
pub fn classify(template: &Template) -> Classification {
    let (qubits, depth, _gates) = template.max_circuit_shape();

    let mut level = ExportControlLevel::Unrestricted;
    let mut category = "EAR99".to_string();
    let mut codes: Vec<String> = Vec::new();

    for algorithm in &template.algorithms {
        let (alg_level, alg_category, alg_code) = match &algorithm.family {
            AlgorithmFamily::Cryptographic { .. } => (
                ExportControlLevel::ItarControlled,
                "USML-XIII(b)".to_string(),
                "USML-XIII",
            ),
            AlgorithmFamily::Search { .. } if algorithm.qubits >= 50 => (
                ExportControlLevel::Restricted,
                "ECCN-4A906".to_string(),
                "ECCN-4A906",
            ),
            AlgorithmFamily::MachineLearning { .. } if algorithm.qubits >= 40 => (
                ExportControlLevel::EarControlled,
                "ECCN-4E091".to_string(),
                "ECCN-4E091",
            ),
            AlgorithmFamily::Optimization { .. }
            | AlgorithmFamily::Simulation { .. }
            | AlgorithmFamily::Sampling { .. }
            | AlgorithmFamily::MachineLearning { .. }
            | AlgorithmFamily::Search { .. }
                if algorithm.qubits >= 20 || algorithm.depth >= 100 =>
            {
                (
                    ExportControlLevel::DualUse,
                    "ECCN-4A994".to_string(),
                    "ECCN-4A994",
                )
            }
            _ => (
                ExportControlLevel::Unrestricted,
                "EAR99".to_string(),
                "EAR99",
            ),
        };
        if alg_level.restrictiveness() > level.restrictiveness() {
            level = alg_level;
            category = alg_category;
        }
        if !codes.iter().any(|c| c == alg_code) {
            codes.push(alg_code.to_string());
        }
    }

    // Very large circuits are controlled regardless of family.
    if qubits >= 100 || depth >= 1000 {
        if level.restrictiveness() < ExportControlLevel::Restricted.restrictiveness() {
            level = ExportControlLevel::Restricted;
            category = "ECCN-4A906".to_string();
        }
        if !codes.iter().any(|c| c == "ECCN-4A906") {
            codes.push("ECCN-4A906".to_string());
        }
    }

    // The declared classification is a floor.
    if template.export_classification.restrictiveness() > level.restrictiveness() {
        level = template.export_classification;
        category = format!("DECLARED-{}", level.as_str());
    }

    Classification {
        level,
        category,
        control_codes: codes,
        confidence: 0.95,
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct CachedClassification {
    classification: Classification,
    cached_at: DateTime<Utc>,
}

/// Classification cache keyed by (template id, version, rule fingerprint).
pub struct ClassificationCache {
    entries: DashMap<(String, String, String), CachedClassification>,
    ttl: Duration,
}

impl ClassificationCache {
    pub fn new(ttl_days: u32) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: Duration::days(ttl_days as i64),
        }
    }

    /// Classify through the cache. `rule_fingerprint` is the current rule
    /// snapshot's fingerprint; entries cached under an older snapshot never
    /// match and are swept out.
    pub fn classify(&self, template: &Template, rule_fingerprint: &str) -> Classification {
        let key = (
            template.id.clone(),
            template.version.clone(),
            rule_fingerprint.to_string(),
        );
        let now = Utc::now();

        if let Some(hit) = self.entries.get(&key) {
            if now - hit.cached_at < self.ttl {
                return hit.classification.clone();
            }
        }

        let classification = classify(template);
        debug!(
            target: "qam::policy",
            template = %template.id,
            level = classification.level.as_str(),
            category = %classification.category,
            "Template classified"
        );
        self.entries.insert(
            key,
            CachedClassification {
                classification: classification.clone(),
                cached_at: now,
            },
        );
        self.sweep(rule_fingerprint, now);
        classification
    }

    /// Drop entries from other snapshots or past TTL.
    fn sweep(&self, current_fingerprint: &str, now: DateTime<Utc>) {
        self.entries.retain(|key, v| {
            key.2.as_str() == current_fingerprint && now - v.cached_at < self.ttl
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

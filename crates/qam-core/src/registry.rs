//! Template registry: immutable, versioned catalog of quantum algorithm templates.
//!
//! Insert-only by version: a new version is a new id. Lookup by id, category,
//! status, and case-insensitive full-text over name/description/tags.
//! Parameter validation covers type, range, allowed values, and regex pattern.

use std::collections::BTreeMap;

use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::BackendKind;
use crate::error::CoreError;
use crate::reservation::ResourceAmounts;
use crate::shared::ExportControlLevel;

// ---------------------------------------------------------------------------
// Template entity
// ---------------------------------------------------------------------------

/// Catalog status of a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TemplateStatus {
    Available,
    Experimental,
    Restricted,
    Deprecated,
    Maintenance,
}

impl TemplateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "AVAILABLE",
            Self::Experimental => "EXPERIMENTAL",
            Self::Restricted => "RESTRICTED",
            Self::Deprecated => "DEPRECATED",
            Self::Maintenance => "MAINTENANCE",
        }
    }
}

/// Algorithm family with family-specific payload. Shared fields (name, circuit
/// shape) stay on [`AlgorithmSpec`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum AlgorithmFamily {
    /// Variational / annealing optimization (QAOA, VQE and friends).
    Optimization {
        ansatz: String,
        max_iterations: u32,
    },
    /// Shor-class and key-recovery algorithms. Always export-sensitive.
    Cryptographic { target_scheme: String },
    /// Hamiltonian / chemistry simulation.
    Simulation { hamiltonian: String },
    /// Quantum ML (kernel methods, classifiers).
    MachineLearning { model: String },
    /// Amplitude amplification / Grover-class search.
    Search { oracle: String },
    /// Monte-Carlo style sampling (risk analysis, pricing).
    Sampling { distribution: String },
}

impl AlgorithmFamily {
    pub fn family_name(&self) -> &'static str {
        match self {
            Self::Optimization { .. } => "optimization",
            Self::Cryptographic { .. } => "cryptographic",
            Self::Simulation { .. } => "simulation",
            Self::MachineLearning { .. } => "machine_learning",
            Self::Search { .. } => "search",
            Self::Sampling { .. } => "sampling",
        }
    }
}

/// A single algorithm carried by a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmSpec {
    pub name: String,
    /// Logical qubits required.
    pub qubits: u32,
    /// Circuit depth.
    pub depth: u32,
    /// Total gate count estimate.
    pub gate_count: u32,
    #[serde(flatten)]
    pub family: AlgorithmFamily,
}

/// Correctness metric named by an SLA requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlaMetric {
    ErrorRate,
    Fidelity,
    SuccessProbability,
    QuantumVolume,
    GateErrorRate,
    CoherenceTime,
}

impl SlaMetric {
    /// Metrics where a smaller observed value is better.
    pub fn lower_is_better(&self) -> bool {
        matches!(self, Self::ErrorRate | Self::GateErrorRate)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ErrorRate => "ERROR_RATE",
            Self::Fidelity => "FIDELITY",
            Self::SuccessProbability => "SUCCESS_PROBABILITY",
            Self::QuantumVolume => "QUANTUM_VOLUME",
            Self::GateErrorRate => "GATE_ERROR_RATE",
            Self::CoherenceTime => "COHERENCE_TIME",
        }
    }
}

/// How a metric value is measured; drives the confidence attached to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementMethod {
    #[default]
    Sampling,
    ProcessTomography,
    RandomizedBenchmarking,
    BackendMetadata,
}

/// One correctness requirement inside an SLA.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaRequirement {
    pub metric: SlaMetric,
    pub threshold: f64,
    #[serde(default)]
    pub method: MeasurementMethod,
    /// Ordered backend kinds the SLA permits, tried in order on failure.
    pub fallback_chain: Vec<BackendKind>,
}

/// Parameter value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    Number,
    Integer,
    String,
    Boolean,
}

/// Declared schema for one template parameter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub kind: Option<ParamType>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub allowed_values: Vec<serde_json::Value>,
    /// Regex the (string) value must match in full.
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
}

/// Immutable, versioned quantum algorithm template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    /// Unique id; a new version is a new id.
    pub id: String,
    /// Semver string, informational alongside the id.
    pub version: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub algorithms: Vec<AlgorithmSpec>,
    /// Parameter name → spec. BTreeMap keeps serialized order stable.
    pub parameter_schema: BTreeMap<String, ParameterSpec>,
    pub export_classification: ExportControlLevel,
    pub sla_requirements: Vec<SlaRequirement>,
    pub resource_estimate: ResourceAmounts,
    pub status: TemplateStatus,
    /// Opaque pass-through metadata. Nothing in the engine reads it; it rides
    /// along for catalog consumers.
    #[serde(default)]
    pub extras: serde_json::Map<String, serde_json::Value>,
}

impl Template {
    /// True when the template may be deployed.
    pub fn is_deployable(&self) -> bool {
        matches!(self.status, TemplateStatus::Available)
    }

    /// Largest circuit shape across the template's algorithms.
    pub fn max_circuit_shape(&self) -> (u32, u32, u32) {
        let qubits = self.algorithms.iter().map(|a| a.qubits).max().unwrap_or(0);
        let depth = self.algorithms.iter().map(|a| a.depth).max().unwrap_or(0);
        let gates = self
            .algorithms
            .iter()
            .map(|a| a.gate_count)
            .max()
            .unwrap_or(0);
        (qubits, depth, gates)
    }

    /// The union of backend kinds named across all requirement fallback chains,
    /// in first-seen order. This is the deployment's backend preference list
    /// unless overridden.
    pub fn preferred_backends(&self) -> Vec<BackendKind> {
        let mut seen = Vec::new();
        for req in &self.sla_requirements {
            for kind in &req.fallback_chain {
                if !seen.contains(kind) {
                    seen.push(*kind);
                }
            }
        }
        seen
    }
}

// ---------------------------------------------------------------------------
// Parameter validation
// ---------------------------------------------------------------------------

/// Validate a configuration map against a template's parameter schema.
///
/// Checks, in order per parameter: presence (required), type, numeric bounds,
/// allowed values, regex pattern. Unknown keys are rejected so typos do not
/// silently pass through to execution.
pub fn validate_parameters(
    schema: &BTreeMap<String, ParameterSpec>,
    config: &BTreeMap<String, serde_json::Value>,
) -> Result<(), CoreError> {
    for (name, spec) in schema {
        let value = match config.get(name) {
            Some(v) => v,
            None if spec.required && spec.default.is_none() => {
                return Err(CoreError::ParameterInvalid {
                    name: name.clone(),
                    reason: "required parameter missing".into(),
                });
            }
            None => continue,
        };
        validate_one(name, spec, value)?;
    }
    if let Some(unknown) = config.keys().find(|k| !schema.contains_key(*k)) {
        return Err(CoreError::ParameterInvalid {
            name: unknown.clone(),
            reason: "not declared in the template's parameter schema".into(),
        });
    }
    Ok(())
}

fn validate_one(
    name: &str,
    spec: &ParameterSpec,
    value: &serde_json::Value,
) -> Result<(), CoreError> {
    let fail = |reason: String| CoreError::ParameterInvalid {
        name: name.to_string(),
        reason,
    };

    if let Some(kind) = spec.kind {
        let ok = match kind {
            ParamType::Number => value.is_number(),
            ParamType::Integer => value.as_i64().is_some() || value.as_u64().is_some(),
            ParamType::String => value.is_string(),
            ParamType::Boolean => value.is_boolean(),
        };
        if !ok {
            return Err(fail(format!("expected {:?}, got {}", kind, type_name(value))));
        }
    }

    if spec.min.is_some() || spec.max.is_some() {
        let n = value
            .as_f64()
            .ok_or_else(|| fail("bounds declared but value is not numeric".into()))?;
        if let Some(min) = spec.min {
            if n < min {
                return Err(fail(format!("{n} below minimum {min}")));
            }
        }
        if let Some(max) = spec.max {
            if n > max {
                return Err(fail(format!("{n} above maximum {max}")));
            }
        }
    }

    if !spec.allowed_values.is_empty() && !spec.allowed_values.contains(value) {
        return Err(fail(format!("{value} not in the allowed value set")));
    }

    if let Some(pattern) = &spec.pattern {
        let s = value
            .as_str()
            .ok_or_else(|| fail("pattern declared but value is not a string".into()))?;
        let re = Regex::new(&format!("^(?:{pattern})$"))
            .map_err(|e| fail(format!("schema pattern does not compile: {e}")))?;
        if !re.is_match(s) {
            return Err(fail(format!("'{s}' does not match pattern /{pattern}/")));
        }
    }

    Ok(())
}

fn type_name(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Fill defaults for parameters absent from `config`.
pub fn apply_defaults(
    schema: &BTreeMap<String, ParameterSpec>,
    config: &mut BTreeMap<String, serde_json::Value>,
) {
    for (name, spec) in schema {
        if !config.contains_key(name) {
            if let Some(default) = &spec.default {
                config.insert(name.clone(), default.clone());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Thread-safe, insert-only template catalog.
pub struct TemplateRegistry {
    templates: DashMap<String, Template>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self {
            templates: DashMap::new(),
        }
    }

    /// Publish a template. Fails on duplicate id or a malformed definition;
    /// published templates are never mutated.
    pub fn publish(&self, template: Template) -> Result<(), CoreError> {
        Self::check_well_formed(&template)?;
        if self.templates.contains_key(&template.id) {
            return Err(CoreError::ParameterInvalid {
                name: template.id,
                reason: "template id already published; publish a new version with a new id"
                    .into(),
            });
        }
        info!(
            target: "qam::registry",
            id = %template.id,
            version = %template.version,
            category = %template.category,
            status = template.status.as_str(),
            "Template published"
        );
        self.templates.insert(template.id.clone(), template);
        Ok(())
    }

    fn check_well_formed(template: &Template) -> Result<(), CoreError> {
        if template.algorithms.is_empty() {
            return Err(CoreError::ParameterInvalid {
                name: template.id.clone(),
                reason: "template declares no algorithms".into(),
            });
        }
        if !template
            .sla_requirements
            .iter()
            .any(|r| !r.fallback_chain.is_empty())
        {
            return Err(CoreError::ParameterInvalid {
                name: template.id.clone(),
                reason: "at least one SLA requirement with a non-empty fallback chain is required"
                    .into(),
            });
        }
        for (name, spec) in &template.parameter_schema {
            if let (Some(min), Some(max)) = (spec.min, spec.max) {
                if min > max {
                    return Err(CoreError::ParameterInvalid {
                        name: name.clone(),
                        reason: format!("min {min} exceeds max {max}"),
                    });
                }
            }
            if let Some(pattern) = &spec.pattern {
                Regex::new(pattern).map_err(|e| CoreError::ParameterInvalid {
                    name: name.clone(),
                    reason: format!("pattern does not compile: {e}"),
                })?;
            }
            if let Some(default) = &spec.default {
                validate_one(name, spec, default)?;
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Template, CoreError> {
        self.templates
            .get(id)
            .map(|t| t.clone())
            .ok_or_else(|| CoreError::TemplateNotFound { id: id.to_string() })
    }

    /// Like [`get`](Self::get) but also requires the template to be deployable.
    pub fn get_deployable(&self, id: &str) -> Result<Template, CoreError> {
        let template = self.get(id)?;
        if !template.is_deployable() {
            return Err(CoreError::TemplateUnavailable {
                id: id.to_string(),
                status: template.status.as_str().to_string(),
            });
        }
        Ok(template)
    }

    pub fn by_category(&self, category: &str) -> Vec<Template> {
        self.templates
            .iter()
            .filter(|t| t.category.eq_ignore_ascii_case(category))
            .map(|t| t.clone())
            .collect()
    }

    pub fn by_status(&self, status: TemplateStatus) -> Vec<Template> {
        self.templates
            .iter()
            .filter(|t| t.status == status)
            .map(|t| t.clone())
            .collect()
    }

    /// Case-insensitive full-text search over name, description, and tags.
    pub fn search(&self, query: &str) -> Vec<Template> {
        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return Vec::new();
        }
        let mut hits: Vec<Template> = self
            .templates
            .iter()
            .filter(|t| {
                t.name.to_lowercase().contains(&q)
                    || t.description.to_lowercase().contains(&q)
                    || t.tags.iter().any(|tag| tag.to_lowercase().contains(&q))
            })
            .map(|t| t.clone())
            .collect();
        hits.sort_by(|a, b| a.id.cmp(&b.id));
        debug!(target: "qam::registry", query = %q, hits = hits.len(), "Catalog search");
        hits
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_template(id: &str) -> Template {
        let mut schema = BTreeMap::new();
        schema.insert(
            "portfolio_size".to_string(),
            ParameterSpec {
                kind: Some(ParamType::Integer),
                required: true,
                min: Some(1.0),
                max: Some(500.0),
                ..Default::default()
            },
        );
        schema.insert(
            "confidence_level".to_string(),
            ParameterSpec {
                kind: Some(ParamType::Number),
                required: true,
                min: Some(0.5),
                max: Some(0.999),
                ..Default::default()
            },
        );
        schema.insert(
            "region".to_string(),
            ParameterSpec {
                kind: Some(ParamType::String),
                pattern: Some("[a-z]{2}-[a-z]+-\\d".to_string()),
                default: Some(json!("us-east-1")),
                ..Default::default()
            },
        );
        Template {
            id: id.to_string(),
            version: "1.0.0".to_string(),
            name: "Portfolio risk".to_string(),
            description: "Monte-Carlo portfolio risk analysis".to_string(),
            category: "finance".to_string(),
            tags: vec!["risk".to_string(), "monte-carlo".to_string()],
            algorithms: vec![AlgorithmSpec {
                name: "amplitude-estimation".to_string(),
                qubits: 12,
                depth: 40,
                gate_count: 900,
                family: AlgorithmFamily::Sampling {
                    distribution: "lognormal".to_string(),
                },
            }],
            parameter_schema: schema,
            export_classification: ExportControlLevel::Unrestricted,
            sla_requirements: vec![SlaRequirement {
                metric: SlaMetric::ErrorRate,
                threshold: 0.05,
                method: MeasurementMethod::Sampling,
                fallback_chain: vec![BackendKind::Emulator, BackendKind::Classical],
            }],
            resource_estimate: ResourceAmounts {
                quantum_minutes: 8.0,
                classical_cpu: 4.0,
                memory_gb: 16.0,
                storage_gb: 1.0,
            },
            status: TemplateStatus::Available,
            extras: Default::default(),
        }
    }

    #[test]
    fn publish_is_insert_only() {
        let registry = TemplateRegistry::new();
        registry.publish(sample_template("qt-risk-v1")).unwrap();
        let err = registry.publish(sample_template("qt-risk-v1")).unwrap_err();
        assert!(err.to_string().contains("already published"));
        // New version under a new id is fine.
        registry.publish(sample_template("qt-risk-v2")).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn fallback_chain_invariant_enforced() {
        let mut t = sample_template("qt-bad");
        t.sla_requirements[0].fallback_chain.clear();
        let err = TemplateRegistry::new().publish(t).unwrap_err();
        assert!(err.to_string().contains("fallback chain"));
    }

    #[test]
    fn validates_types_bounds_and_patterns() {
        let t = sample_template("qt-risk-v1");
        let mut config = BTreeMap::new();
        config.insert("portfolio_size".to_string(), json!(25));
        config.insert("confidence_level".to_string(), json!(0.95));
        config.insert("region".to_string(), json!("eu-west-2"));
        validate_parameters(&t.parameter_schema, &config).unwrap();

        config.insert("portfolio_size".to_string(), json!(0));
        assert!(validate_parameters(&t.parameter_schema, &config).is_err());
        config.insert("portfolio_size".to_string(), json!("many"));
        assert!(validate_parameters(&t.parameter_schema, &config).is_err());
        config.insert("portfolio_size".to_string(), json!(25));

        config.insert("region".to_string(), json!("nowhere"));
        assert!(validate_parameters(&t.parameter_schema, &config).is_err());
    }

    #[test]
    fn rejects_unknown_and_missing_parameters() {
        let t = sample_template("qt-risk-v1");
        let mut config = BTreeMap::new();
        config.insert("confidence_level".to_string(), json!(0.95));
        // Required portfolio_size missing.
        assert!(validate_parameters(&t.parameter_schema, &config).is_err());
        config.insert("portfolio_size".to_string(), json!(25));
        config.insert("typo_param".to_string(), json!(1));
        assert!(validate_parameters(&t.parameter_schema, &config).is_err());
    }

    #[test]
    fn parameter_round_trip_is_stable() {
        let t = sample_template("qt-risk-v1");
        let mut config = BTreeMap::new();
        config.insert("portfolio_size".to_string(), json!(25));
        config.insert("confidence_level".to_string(), json!(0.95));
        apply_defaults(&t.parameter_schema, &mut config);
        validate_parameters(&t.parameter_schema, &config).unwrap();

        let serialized = serde_json::to_string(&config).unwrap();
        let restored: BTreeMap<String, serde_json::Value> =
            serde_json::from_str(&serialized).unwrap();
        validate_parameters(&t.parameter_schema, &restored).unwrap();
        assert_eq!(config, restored);
    }

    #[test]
    fn search_and_catalog_queries() {
        let registry = TemplateRegistry::new();
        registry.publish(sample_template("qt-risk-v1")).unwrap();
        let mut t = sample_template("qt-opt-v1");
        t.name = "Route optimizer".to_string();
        t.category = "logistics".to_string();
        t.status = TemplateStatus::Experimental;
        registry.publish(t).unwrap();

        assert_eq!(registry.by_category("finance").len(), 1);
        assert_eq!(registry.by_status(TemplateStatus::Experimental).len(), 1);
        assert_eq!(registry.search("MONTE").len(), 1);
        assert_eq!(registry.search("optimizer").len(), 1);
        assert!(registry.search("").is_empty());
        assert!(registry.get_deployable("qt-opt-v1").is_err());
        assert!(registry.get_deployable("qt-risk-v1").is_ok());
    }
}

//! Jurisdiction rules.
//!
//! A rule snapshot holds per-destination export-control rules: control-list
//! items, the restrictions attached to each, exemptions, and required
//! licenses. The snapshot carries a content fingerprint; classification
//! caching and policy determinism are keyed by it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::sanctions::Actor;
use qam_core::{ExportControlLevel, Severity};

/// How a restriction constrains a matching request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Restriction {
    /// Destination-level block regardless of end-use.
    Geographic { reason: String },
    /// Named entities are refused.
    Entity { entity_ids: Vec<String> },
    /// End-uses containing any of these keywords are refused.
    EndUse { prohibited_keywords: Vec<String> },
    /// Applies only to specific control codes.
    TechnologySpecific { control_codes: Vec<String> },
    /// In force only inside the window.
    TimeLimited {
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    },
    /// Allowed only when every named condition is documented by the actor.
    Conditional { required_documentation: Vec<String> },
}

/// An exemption lifts a matching restriction when its criteria match the
/// declared end-use (case-insensitive keyword or explicit tag) AND the actor
/// presents the required documentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exemption {
    pub name: String,
    /// Keywords matched against the end-use text, case-insensitively.
    #[serde(default)]
    pub end_use_keywords: Vec<String>,
    /// Explicit tags matched against the actor's documentation tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Documentation the actor must hold for the exemption to apply.
    #[serde(default)]
    pub required_documentation: Vec<String>,
}

impl Exemption {
    /// True when the exemption lifts a restriction for this request.
    pub fn applies(&self, end_use: &str, actor: &Actor) -> bool {
        let end_use_lower = end_use.to_lowercase();
        let keyword_hit = self
            .end_use_keywords
            .iter()
            .any(|k| end_use_lower.contains(&k.to_lowercase()));
        let tag_hit = self
            .tags
            .iter()
            .any(|t| actor.documentation.iter().any(|d| d.eq_ignore_ascii_case(t)));
        if !keyword_hit && !tag_hit {
            return false;
        }
        self.required_documentation.iter().all(|req| {
            actor
                .documentation
                .iter()
                .any(|d| d.eq_ignore_ascii_case(req))
        })
    }
}

/// One control-list item inside a jurisdiction's rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlListItem {
    /// Control code this item governs, e.g. `ECCN-4A994`.
    pub control_code: String,
    /// Minimum classification level at which this item matches.
    pub min_level: ExportControlLevel,
    pub restrictions: Vec<Restriction>,
    #[serde(default)]
    pub exemptions: Vec<Exemption>,
    /// Licenses a matching request must hold.
    #[serde(default)]
    pub required_licenses: Vec<String>,
    pub enforcement_severity: Severity,
}

/// All rules for one destination jurisdiction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportControlRule {
    /// ISO country code of the destination.
    pub jurisdiction: String,
    pub items: Vec<ControlListItem>,
}

/// Immutable snapshot of every jurisdiction's rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSnapshot {
    pub rules: Vec<ExportControlRule>,
    /// Jurisdictions eligible for auto-approval of low-risk dual-use requests.
    pub auto_approve_jurisdictions: Vec<String>,
    /// Recomputed on construction and after deserialization; absent in
    /// hand-authored rule files.
    #[serde(default)]
    fingerprint: String,
}

impl RuleSnapshot {
    pub fn new(
        rules: Vec<ExportControlRule>,
        auto_approve_jurisdictions: Vec<String>,
    ) -> Self {
        let mut snapshot = Self {
            rules,
            auto_approve_jurisdictions,
            fingerprint: String::new(),
        };
        snapshot.fingerprint = snapshot.compute_fingerprint();
        snapshot
    }

    /// Content hash of the rule set. Any edit produces a new fingerprint.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Restore the fingerprint after deserializing a rules file that omits it.
    pub fn rehydrated(mut self) -> Self {
        self.fingerprint = self.compute_fingerprint();
        self
    }

    fn compute_fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        let body = serde_json::json!({
            "rules": self.rules,
            "auto_approve": self.auto_approve_jurisdictions,
        });
        hasher.update(serde_json::to_vec(&body).unwrap_or_default());
        let digest = hasher.finalize();
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn rules_for(&self, destination: &str) -> Option<&ExportControlRule> {
        self.rules
            .iter()
            .find(|r| r.jurisdiction.eq_ignore_ascii_case(destination))
    }

    pub fn allows_auto_approval_to(&self, destination: &str) -> bool {
        self.auto_approve_jurisdictions
            .iter()
            .any(|j| j.eq_ignore_ascii_case(destination))
    }

    /// A reasonable default rule set covering the common jurisdictions;
    /// deployments load their real rules from configuration.
    pub fn builtin_default() -> Self {
        let research_exemption = Exemption {
            name: "fundamental-research".to_string(),
            end_use_keywords: vec!["research".into(), "education".into(), "academic".into()],
            tags: vec!["university-affiliation".into()],
            required_documentation: vec![],
        };

        let open_jurisdiction = |code: &str| ExportControlRule {
            jurisdiction: code.to_string(),
            items: vec![ControlListItem {
                control_code: "USML-XIII".to_string(),
                min_level: ExportControlLevel::ItarControlled,
                restrictions: vec![Restriction::Conditional {
                    required_documentation: vec!["itar-registration".into()],
                }],
                exemptions: vec![],
                required_licenses: vec!["ITAR-CRYPTO-001".into()],
                enforcement_severity: Severity::Critical,
            }],
        };

        let controlled_jurisdiction = |code: &str| ExportControlRule {
            jurisdiction: code.to_string(),
            items: vec![
                ControlListItem {
                    control_code: "ECCN-4A994".to_string(),
                    min_level: ExportControlLevel::DualUse,
                    restrictions: vec![Restriction::EndUse {
                        prohibited_keywords: vec![
                            "military".into(),
                            "defense".into(),
                            "weapon".into(),
                            "surveillance".into(),
                            "intelligence".into(),
                        ],
                    }],
                    exemptions: vec![research_exemption.clone()],
                    required_licenses: vec!["EAR-DU-001".into()],
                    enforcement_severity: Severity::High,
                },
                // ITAR items to these destinations hinge entirely on the
                // license check; no blanket geographic block.
                ControlListItem {
                    control_code: "USML-XIII".to_string(),
                    min_level: ExportControlLevel::ItarControlled,
                    restrictions: vec![],
                    exemptions: vec![],
                    required_licenses: vec!["ITAR-CRYPTO-001".into()],
                    enforcement_severity: Severity::Critical,
                },
            ],
        };

        Self::new(
            vec![
                open_jurisdiction("US"),
                open_jurisdiction("CA"),
                open_jurisdiction("GB"),
                controlled_jurisdiction("CN"),
                controlled_jurisdiction("RU"),
            ],
            vec![
                "US".into(),
                "CA".into(),
                "GB".into(),
                "AU".into(),
                "JP".into(),
                "DE".into(),
                "FR".into(),
            ],
        )
    }
}

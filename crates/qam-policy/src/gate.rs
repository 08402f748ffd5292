//! The policy gate.
//!
//! Pipeline over (template, actor, destination, end-use), short-circuiting on
//! the first denial: classify → sanctions screen → jurisdiction check →
//! license check → auto-approve or manual-review decision. Deterministic for
//! a fixed rule snapshot.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::approval::ReviewerRole;
use crate::classify::{Classification, ClassificationCache};
use crate::error::PolicyError;
use crate::jurisdiction::{Restriction, RuleSnapshot};
use crate::license::{check_licenses, required_licenses, LicenseService};
use crate::sanctions::{Actor, SanctionsScreener, ScreeningStatus};
use qam_core::registry::Template;
use qam_core::ExportControlLevel;

/// End-use keywords that keep a dual-use request on the auto-approve path.
const LOW_RISK_KEYWORDS: &[&str] =
    &["research", "education", "academic", "commercial", "optimization"];

/// End-use keywords that pull a dual-use request off the auto-approve path.
const HIGH_RISK_KEYWORDS: &[&str] =
    &["military", "defense", "weapon", "surveillance", "intelligence"];

/// Final disposition of a gate query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyOutcome {
    AutoApproved,
    NeedsApproval,
    Denied,
}

/// Decision returned by the gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub outcome: PolicyOutcome,
    pub level: ExportControlLevel,
    pub category: String,
    /// Human-readable restrictions that applied (violated or conditioned).
    pub restrictions: Vec<String>,
    /// Reviewer roles required when the outcome is `NeedsApproval`.
    pub required_approvals: Vec<ReviewerRole>,
    pub valid_licenses: Vec<String>,
    pub missing_licenses: Vec<String>,
    /// Step-by-step reasoning trail.
    pub reasoning: Vec<String>,
}

impl PolicyDecision {
    pub fn approved(&self) -> bool {
        self.outcome == PolicyOutcome::AutoApproved
    }

    fn denied(
        level: ExportControlLevel,
        category: String,
        restrictions: Vec<String>,
        missing: Vec<String>,
        reasoning: Vec<String>,
    ) -> Self {
        Self {
            outcome: PolicyOutcome::Denied,
            level,
            category,
            restrictions,
            required_approvals: Vec::new(),
            valid_licenses: Vec::new(),
            missing_licenses: missing,
            reasoning,
        }
    }
}

/// Reviewer roles required for a manual decision at the given level.
pub fn reviewers_for_level(level: ExportControlLevel) -> Vec<ReviewerRole> {
    match level {
        ExportControlLevel::Unrestricted => vec![],
        ExportControlLevel::DualUse => vec![ReviewerRole::Compliance],
        ExportControlLevel::Restricted => vec![
            ReviewerRole::Compliance,
            ReviewerRole::Legal,
            ReviewerRole::Security,
        ],
        ExportControlLevel::EarControlled | ExportControlLevel::ItarControlled => vec![
            ReviewerRole::Compliance,
            ReviewerRole::Legal,
            ReviewerRole::Security,
            ReviewerRole::ExportControl,
        ],
        ExportControlLevel::Classified => vec![],
    }
}

/// The export-control and sanctions policy gate.
pub struct PolicyGate {
    cache: ClassificationCache,
    snapshot: RuleSnapshot,
    screener: Arc<dyn SanctionsScreener>,
    licenses: Arc<dyn LicenseService>,
}

impl PolicyGate {
    pub fn new(
        classification_ttl_days: u32,
        snapshot: RuleSnapshot,
        screener: Arc<dyn SanctionsScreener>,
        licenses: Arc<dyn LicenseService>,
    ) -> Self {
        Self {
            cache: ClassificationCache::new(classification_ttl_days),
            snapshot,
            screener,
            licenses,
        }
    }

    /// Swap in a new rule snapshot. Cached classifications from the previous
    /// snapshot become unreachable immediately.
    pub fn update_rules(&mut self, snapshot: RuleSnapshot) {
        info!(
            target: "qam::policy",
            fingerprint = snapshot.fingerprint(),
            "Rule snapshot updated"
        );
        self.snapshot = snapshot;
    }

    pub fn rule_fingerprint(&self) -> &str {
        self.snapshot.fingerprint()
    }

    /// Run the full pipeline.
    pub async fn evaluate(
        &self,
        template: &Template,
        actor: &Actor,
        destination: &str,
        end_use: &str,
    ) -> Result<PolicyDecision, PolicyError> {
        let mut reasoning = Vec::new();

        // 1. Classify (cached, keyed by rule fingerprint).
        let classification = self.cache.classify(template, self.snapshot.fingerprint());
        reasoning.push(format!(
            "classified {} as {} ({})",
            template.id,
            classification.level.as_str(),
            classification.category
        ));

        if classification.level == ExportControlLevel::Classified {
            return Ok(PolicyDecision::denied(
                classification.level,
                classification.category.clone(),
                vec!["classified algorithms are not exportable".into()],
                vec![],
                with(reasoning, "denied: CLASSIFIED is never exportable"),
            ));
        }

        // 2. Sanctions screen.
        let screening = self.screener.screen(actor).await;
        reasoning.push(format!("sanctions screening: {:?}", screening.status));
        if screening.denies() {
            warn!(
                target: "qam::policy",
                actor = %actor.id,
                status = ?screening.status,
                "Sanctions screening denied request"
            );
            return Err(PolicyError::SanctionsBlocked {
                actor_id: actor.id.clone(),
            });
        }

        // 3. Jurisdiction check.
        let (violated, conditioned) =
            self.jurisdiction_check(&classification, actor, destination, end_use);
        for r in &conditioned {
            reasoning.push(format!("restriction in force: {r}"));
        }
        if !violated.is_empty() {
            return Ok(PolicyDecision::denied(
                classification.level,
                classification.category.clone(),
                violated.clone(),
                vec![],
                with(
                    reasoning,
                    &format!("denied by jurisdiction rules for {destination}"),
                ),
            ));
        }

        // 4. License check.
        let required = required_licenses(&self.snapshot, &classification, destination);
        let (valid, missing) = check_licenses(
            self.licenses.as_ref(),
            &actor.id,
            &required,
            destination,
            end_use,
        )
        .await;
        if !required.is_empty() {
            reasoning.push(format!(
                "licenses required: {required:?}, held: {valid:?}, missing: {missing:?}"
            ));
        }
        if !missing.is_empty()
            && classification.level.restrictiveness()
                >= ExportControlLevel::Restricted.restrictiveness()
        {
            return Err(PolicyError::LicenseMissing {
                subject_id: template.id.clone(),
                missing,
            });
        }

        // 5. Auto-approve vs manual review.
        let end_use_lower = end_use.to_lowercase();
        let high_risk = HIGH_RISK_KEYWORDS
            .iter()
            .any(|k| end_use_lower.contains(k));
        let low_risk = LOW_RISK_KEYWORDS.iter().any(|k| end_use_lower.contains(k));

        // UNRESTRICTED auto-approves unconditionally; the keyword and
        // jurisdiction conditions apply to DUAL_USE only.
        let auto = match classification.level {
            ExportControlLevel::Unrestricted => true,
            ExportControlLevel::DualUse => {
                low_risk
                    && !high_risk
                    && missing.is_empty()
                    && self.snapshot.allows_auto_approval_to(destination)
            }
            _ => false,
        };

        let decision = if auto {
            PolicyDecision {
                outcome: PolicyOutcome::AutoApproved,
                level: classification.level,
                category: classification.category.clone(),
                restrictions: conditioned,
                required_approvals: vec![],
                valid_licenses: valid,
                missing_licenses: missing,
                reasoning: with(reasoning, "auto-approved"),
            }
        } else {
            let required_approvals = reviewers_for_level(classification.level);
            PolicyDecision {
                outcome: PolicyOutcome::NeedsApproval,
                level: classification.level,
                category: classification.category.clone(),
                restrictions: conditioned,
                required_approvals,
                valid_licenses: valid,
                missing_licenses: missing,
                reasoning: with(reasoning, "manual review required"),
            }
        };

        info!(
            target: "qam::policy",
            template = %template.id,
            actor = %actor.id,
            destination,
            outcome = ?decision.outcome,
            level = decision.level.as_str(),
            "Policy decision"
        );
        Ok(decision)
    }

    /// Returns (violated, in-force-but-satisfied) restriction descriptions.
    fn jurisdiction_check(
        &self,
        classification: &Classification,
        actor: &Actor,
        destination: &str,
        end_use: &str,
    ) -> (Vec<String>, Vec<String>) {
        let mut violated = Vec::new();
        let mut conditioned = Vec::new();
        let Some(rule) = self.snapshot.rules_for(destination) else {
            return (violated, conditioned);
        };

        let end_use_lower = end_use.to_lowercase();
        let now = Utc::now();

        for item in &rule.items {
            let code_match = classification
                .control_codes
                .iter()
                .any(|c| c == &item.control_code);
            let level_match =
                classification.level.restrictiveness() >= item.min_level.restrictiveness();
            if !code_match && !level_match {
                continue;
            }

            let exempted = item.exemptions.iter().any(|e| e.applies(end_use, actor));

            for restriction in &item.restrictions {
                let (hit, description) = match restriction {
                    Restriction::Geographic { reason } => {
                        (true, format!("{}: geographic block, {reason}", item.control_code))
                    }
                    Restriction::Entity { entity_ids } => (
                        entity_ids.contains(&actor.id),
                        format!("{}: entity list", item.control_code),
                    ),
                    Restriction::EndUse {
                        prohibited_keywords,
                    } => (
                        prohibited_keywords
                            .iter()
                            .any(|k| end_use_lower.contains(&k.to_lowercase())),
                        format!("{}: prohibited end-use", item.control_code),
                    ),
                    Restriction::TechnologySpecific { control_codes } => (
                        classification
                            .control_codes
                            .iter()
                            .any(|c| control_codes.contains(c)),
                        format!("{}: technology-specific control", item.control_code),
                    ),
                    Restriction::TimeLimited {
                        not_before,
                        not_after,
                    } => (
                        now >= *not_before && now <= *not_after,
                        format!("{}: time-limited embargo in force", item.control_code),
                    ),
                    Restriction::Conditional {
                        required_documentation,
                    } => (
                        !required_documentation.iter().all(|req| {
                            actor
                                .documentation
                                .iter()
                                .any(|d| d.eq_ignore_ascii_case(req))
                        }),
                        format!("{}: documentation conditions unmet", item.control_code),
                    ),
                };
                if hit {
                    if exempted {
                        conditioned.push(format!("{description} (exemption applied)"));
                    } else {
                        violated.push(description);
                    }
                }
            }
        }
        (violated, conditioned)
    }
}

fn with(mut reasoning: Vec<String>, last: &str) -> Vec<String> {
    reasoning.push(last.to_string());
    reasoning
}

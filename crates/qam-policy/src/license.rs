//! License checks.
//!
//! Required licenses derive from the classification and the destination's
//! rule items; the actor's holdings are cross-referenced through an external
//! service behind a trait.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeSet;

use crate::classify::Classification;
use crate::jurisdiction::RuleSnapshot;

/// External license directory contract.
#[async_trait]
pub trait LicenseService: Send + Sync {
    async fn has_license(
        &self,
        actor_id: &str,
        license_type: &str,
        destination: &str,
        end_use: &str,
    ) -> bool;
}

/// Derive the required license set for (classification, destination) from the
/// rule snapshot. Deterministic and sorted.
pub fn required_licenses(
    snapshot: &RuleSnapshot,
    classification: &Classification,
    destination: &str,
) -> Vec<String> {
    let mut required = BTreeSet::new();
    if let Some(rule) = snapshot.rules_for(destination) {
        for item in &rule.items {
            if classification.level.restrictiveness() >= item.min_level.restrictiveness() {
                for license in &item.required_licenses {
                    required.insert(license.clone());
                }
            }
        }
    }
    required.into_iter().collect()
}

/// Cross-reference the actor's holdings against the required set.
/// Returns (valid, missing), both sorted.
pub async fn check_licenses(
    service: &dyn LicenseService,
    actor_id: &str,
    required: &[String],
    destination: &str,
    end_use: &str,
) -> (Vec<String>, Vec<String>) {
    let mut valid = Vec::new();
    let mut missing = Vec::new();
    for license in required {
        if service
            .has_license(actor_id, license, destination, end_use)
            .await
        {
            valid.push(license.clone());
        } else {
            missing.push(license.clone());
        }
    }
    (valid, missing)
}

/// In-process license directory keyed by (actor, license type).
#[derive(Default)]
pub struct InMemoryLicenseDirectory {
    grants: DashMap<(String, String), ()>,
}

impl InMemoryLicenseDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, actor_id: &str, license_type: &str) {
        self.grants
            .insert((actor_id.to_string(), license_type.to_string()), ());
    }
}

#[async_trait]
impl LicenseService for InMemoryLicenseDirectory {
    async fn has_license(
        &self,
        actor_id: &str,
        license_type: &str,
        _destination: &str,
        _end_use: &str,
    ) -> bool {
        self.grants
            .contains_key(&(actor_id.to_string(), license_type.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qam_core::ExportControlLevel;

    #[test]
    fn required_set_scales_with_level() {
        let snapshot = RuleSnapshot::builtin_default();
        let dual_use = Classification {
            level: ExportControlLevel::DualUse,
            category: "ECCN-4A994".into(),
            control_codes: vec!["ECCN-4A994".into()],
            confidence: 0.95,
        };
        let itar = Classification {
            level: ExportControlLevel::ItarControlled,
            category: "USML-XIII(b)".into(),
            control_codes: vec!["USML-XIII".into()],
            confidence: 0.95,
        };

        let du_req = required_licenses(&snapshot, &dual_use, "CN");
        assert_eq!(du_req, vec!["EAR-DU-001".to_string()]);

        let itar_req = required_licenses(&snapshot, &itar, "CN");
        assert!(itar_req.contains(&"ITAR-CRYPTO-001".to_string()));
        assert!(itar_req.contains(&"EAR-DU-001".to_string()));

        // Unknown destination requires nothing.
        assert!(required_licenses(&snapshot, &itar, "ZZ").is_empty());
    }

    #[tokio::test]
    async fn cross_reference_splits_valid_and_missing() {
        let directory = InMemoryLicenseDirectory::new();
        directory.grant("acme", "EAR-DU-001");
        let required = vec!["EAR-DU-001".to_string(), "ITAR-CRYPTO-001".to_string()];
        let (valid, missing) =
            check_licenses(&directory, "acme", &required, "CN", "commercial").await;
        assert_eq!(valid, vec!["EAR-DU-001".to_string()]);
        assert_eq!(missing, vec!["ITAR-CRYPTO-001".to_string()]);
    }
}

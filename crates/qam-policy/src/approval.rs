//! Approval workflow.
//!
//! One state machine per approval request. Reviewer roles come from the
//! classification level; votes drive transitions; stage deadlines escalate and
//! the final deadline expires the request. Status is monotonic: once in
//! APPROVED, DENIED, EXPIRED, or REVOKED, the only legal moves are to EXPIRED
//! or REVOKED. Every transition appends to the request's audit trail.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::PolicyError;
use qam_core::{prefixed_id, ApprovalConfig};

/// Reviewer roles that can be required on a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewerRole {
    Compliance,
    Legal,
    Security,
    ExportControl,
}

impl ReviewerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compliance => "compliance",
            Self::Legal => "legal",
            Self::Security => "security",
            Self::ExportControl => "export_control",
        }
    }
}

/// Approval status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Conditional,
    Denied,
    Expired,
    Revoked,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Conditional => "CONDITIONAL",
            Self::Denied => "DENIED",
            Self::Expired => "EXPIRED",
            Self::Revoked => "REVOKED",
        }
    }

    /// Settled statuses may only move to EXPIRED or REVOKED.
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    fn can_transition_to(&self, next: ApprovalStatus) -> bool {
        use ApprovalStatus::*;
        match (self, next) {
            (Pending, _) => true,
            (Approved, Expired) | (Approved, Revoked) => true,
            (Conditional, Expired) | (Conditional, Revoked) => true,
            _ => false,
        }
    }
}

/// One reviewer's vote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewerVote {
    pub role: ReviewerRole,
    pub reviewer: String,
    pub approve: bool,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub comment: String,
    pub at: DateTime<Utc>,
}

/// Audit-trail entry on a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalAuditEntry {
    pub at: DateTime<Utc>,
    pub actor: String,
    pub action: String,
    pub detail: String,
}

/// A single approval request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    pub id: String,
    /// Deployment this request gates, when known.
    pub deployment_id: Option<String>,
    pub status: ApprovalStatus,
    pub required_reviewers: Vec<ReviewerRole>,
    pub votes: Vec<ReviewerVote>,
    /// Conditions accumulated from CONDITIONAL votes.
    pub conditions: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// Current review stage deadline; escalation pushes it out.
    pub stage_deadline: DateTime<Utc>,
    /// Hard deadline; a still-pending request expires here.
    pub valid_until: DateTime<Utc>,
    pub escalation_level: u32,
    pub audit_trail: Vec<ApprovalAuditEntry>,
}

impl Approval {
    fn push_audit(&mut self, actor: &str, action: &str, detail: String) {
        self.audit_trail.push(ApprovalAuditEntry {
            at: Utc::now(),
            actor: actor.to_string(),
            action: action.to_string(),
            detail,
        });
    }

    fn transition(&mut self, next: ApprovalStatus, actor: &str, detail: String) -> Result<(), PolicyError> {
        if !self.status.can_transition_to(next) {
            return Err(PolicyError::InvalidApprovalTransition {
                approval_id: self.id.clone(),
                from: self.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        let from = self.status;
        self.status = next;
        self.push_audit(actor, next.as_str(), detail);
        info!(
            target: "qam::policy",
            approval = %self.id,
            from = from.as_str(),
            to = next.as_str(),
            "Approval transition"
        );
        Ok(())
    }

    /// True when the request grants execution (possibly with conditions).
    pub fn is_granted(&self) -> bool {
        matches!(
            self.status,
            ApprovalStatus::Approved | ApprovalStatus::Conditional
        )
    }

    /// Roles that still owe a vote.
    pub fn outstanding_roles(&self) -> Vec<ReviewerRole> {
        self.required_reviewers
            .iter()
            .filter(|role| !self.votes.iter().any(|v| v.role == **role))
            .copied()
            .collect()
    }
}

/// Transition produced by a workflow operation, for event/audit fan-out.
#[derive(Debug, Clone)]
pub struct ApprovalTransition {
    pub approval_id: String,
    pub deployment_id: Option<String>,
    pub from: ApprovalStatus,
    pub to: ApprovalStatus,
}

/// Owns all approval requests.
pub struct ApprovalWorkflow {
    config: ApprovalConfig,
    approvals: DashMap<String, Approval>,
}

impl ApprovalWorkflow {
    pub fn new(config: ApprovalConfig) -> Self {
        Self {
            config,
            approvals: DashMap::new(),
        }
    }

    /// Open a PENDING request for the given reviewers.
    pub fn open(
        &self,
        deployment_id: Option<String>,
        required_reviewers: Vec<ReviewerRole>,
    ) -> Approval {
        let now = Utc::now();
        let mut approval = Approval {
            id: prefixed_id("apr"),
            deployment_id,
            status: ApprovalStatus::Pending,
            required_reviewers,
            votes: Vec::new(),
            conditions: Vec::new(),
            created_at: now,
            stage_deadline: now + self.config.stage_timeout(),
            valid_until: now + self.config.total_timeout(),
            escalation_level: 0,
            audit_trail: Vec::new(),
        };
        approval.push_audit(
            "policy-gate",
            "PENDING",
            format!(
                "opened; reviewers required: {:?}",
                approval.required_reviewers
            ),
        );
        self.approvals.insert(approval.id.clone(), approval.clone());
        approval
    }

    pub fn get(&self, approval_id: &str) -> Result<Approval, PolicyError> {
        self.approvals
            .get(approval_id)
            .map(|a| a.clone())
            .ok_or_else(|| PolicyError::ApprovalNotFound(approval_id.to_string()))
    }

    /// Record a reviewer vote and apply any resulting transition.
    pub fn vote(
        &self,
        approval_id: &str,
        vote: ReviewerVote,
    ) -> Result<Option<ApprovalTransition>, PolicyError> {
        let mut entry = self
            .approvals
            .get_mut(approval_id)
            .ok_or_else(|| PolicyError::ApprovalNotFound(approval_id.to_string()))?;
        let approval = entry.value_mut();

        if approval.status.is_settled() {
            return Err(PolicyError::InvalidApprovalTransition {
                approval_id: approval.id.clone(),
                from: approval.status.as_str().to_string(),
                to: "PENDING-vote".to_string(),
            });
        }
        if !approval.required_reviewers.contains(&vote.role) {
            warn!(
                target: "qam::policy",
                approval = approval_id,
                role = vote.role.as_str(),
                "Vote from a role not required on this request"
            );
            return Ok(None);
        }
        // Latest vote per role wins.
        approval.votes.retain(|v| v.role != vote.role);
        approval.push_audit(
            &vote.reviewer,
            "vote",
            format!(
                "{} voted {}{}",
                vote.role.as_str(),
                if vote.approve { "approve" } else { "deny" },
                if vote.conditions.is_empty() {
                    String::new()
                } else {
                    format!(" with conditions {:?}", vote.conditions)
                }
            ),
        );
        approval.votes.push(vote.clone());

        let from = approval.status;
        if !vote.approve {
            approval.transition(
                ApprovalStatus::Denied,
                &vote.reviewer,
                "reviewer denial".into(),
            )?;
            return Ok(Some(ApprovalTransition {
                approval_id: approval.id.clone(),
                deployment_id: approval.deployment_id.clone(),
                from,
                to: approval.status,
            }));
        }

        if approval.outstanding_roles().is_empty() {
            let mut conditions: Vec<String> = approval
                .votes
                .iter()
                .flat_map(|v| v.conditions.iter().cloned())
                .collect();
            conditions.dedup();
            let next = if conditions.is_empty() {
                ApprovalStatus::Approved
            } else {
                ApprovalStatus::Conditional
            };
            approval.conditions = conditions;
            approval.transition(next, &vote.reviewer, "all required reviewers approved".into())?;
            return Ok(Some(ApprovalTransition {
                approval_id: approval.id.clone(),
                deployment_id: approval.deployment_id.clone(),
                from,
                to: approval.status,
            }));
        }
        Ok(None)
    }

    /// Revoke a pending or granted approval.
    pub fn revoke(
        &self,
        approval_id: &str,
        actor: &str,
        reason: &str,
    ) -> Result<ApprovalTransition, PolicyError> {
        let mut entry = self
            .approvals
            .get_mut(approval_id)
            .ok_or_else(|| PolicyError::ApprovalNotFound(approval_id.to_string()))?;
        let approval = entry.value_mut();
        let from = approval.status;
        approval.transition(ApprovalStatus::Revoked, actor, reason.to_string())?;
        Ok(ApprovalTransition {
            approval_id: approval.id.clone(),
            deployment_id: approval.deployment_id.clone(),
            from,
            to: ApprovalStatus::Revoked,
        })
    }

    /// Scan pending requests: escalate past stage deadlines, expire past the
    /// hard deadline. Safe to run overlapping; each transition fires once.
    pub fn scan_deadlines(&self, now: DateTime<Utc>) -> Vec<ApprovalTransition> {
        let mut transitions = Vec::new();
        for mut entry in self.approvals.iter_mut() {
            let approval = entry.value_mut();
            if approval.status != ApprovalStatus::Pending {
                continue;
            }
            if now >= approval.valid_until {
                let from = approval.status;
                if approval
                    .transition(
                        ApprovalStatus::Expired,
                        "workflow-monitor",
                        "no decision before final deadline".into(),
                    )
                    .is_ok()
                {
                    transitions.push(ApprovalTransition {
                        approval_id: approval.id.clone(),
                        deployment_id: approval.deployment_id.clone(),
                        from,
                        to: ApprovalStatus::Expired,
                    });
                }
            } else if now >= approval.stage_deadline {
                approval.escalation_level += 1;
                approval.stage_deadline = now + self.config.stage_timeout();
                approval.push_audit(
                    "workflow-monitor",
                    "escalated",
                    format!("stage deadline passed; level {}", approval.escalation_level),
                );
                info!(
                    target: "qam::policy",
                    approval = %approval.id,
                    level = approval.escalation_level,
                    "Approval escalated"
                );
            }
        }
        transitions
    }

    pub fn pending_count(&self) -> usize {
        self.approvals
            .iter()
            .filter(|a| a.status == ApprovalStatus::Pending)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ApprovalConfig {
        ApprovalConfig {
            stage_timeout_hours: 4,
            total_timeout_hours: 12,
        }
    }

    fn vote(role: ReviewerRole, approve: bool) -> ReviewerVote {
        ReviewerVote {
            role,
            reviewer: format!("{}-reviewer", role.as_str()),
            approve,
            conditions: vec![],
            comment: String::new(),
            at: Utc::now(),
        }
    }

    #[test]
    fn all_approvals_settle_approved() {
        let workflow = ApprovalWorkflow::new(config());
        let approval = workflow.open(
            Some("dep-1".into()),
            vec![ReviewerRole::Compliance, ReviewerRole::Legal],
        );
        assert!(workflow
            .vote(&approval.id, vote(ReviewerRole::Compliance, true))
            .unwrap()
            .is_none());
        let transition = workflow
            .vote(&approval.id, vote(ReviewerRole::Legal, true))
            .unwrap()
            .unwrap();
        assert_eq!(transition.to, ApprovalStatus::Approved);
        assert!(workflow.get(&approval.id).unwrap().is_granted());
    }

    #[test]
    fn conditions_produce_conditional() {
        let workflow = ApprovalWorkflow::new(config());
        let approval = workflow.open(None, vec![ReviewerRole::Compliance]);
        let mut v = vote(ReviewerRole::Compliance, true);
        v.conditions = vec!["quarterly usage reports".into()];
        let transition = workflow.vote(&approval.id, v).unwrap().unwrap();
        assert_eq!(transition.to, ApprovalStatus::Conditional);
        let settled = workflow.get(&approval.id).unwrap();
        assert!(settled.is_granted());
        assert_eq!(settled.conditions.len(), 1);
    }

    #[test]
    fn single_denial_settles_denied() {
        let workflow = ApprovalWorkflow::new(config());
        let approval = workflow.open(
            None,
            vec![ReviewerRole::Compliance, ReviewerRole::Security],
        );
        let transition = workflow
            .vote(&approval.id, vote(ReviewerRole::Security, false))
            .unwrap()
            .unwrap();
        assert_eq!(transition.to, ApprovalStatus::Denied);
        // Further votes are rejected: status is monotonic.
        assert!(workflow
            .vote(&approval.id, vote(ReviewerRole::Compliance, true))
            .is_err());
    }

    #[test]
    fn stage_deadline_escalates_then_expires() {
        let workflow = ApprovalWorkflow::new(config());
        let approval = workflow.open(Some("dep-1".into()), vec![ReviewerRole::Compliance]);

        // Past the first stage deadline: escalate, still pending.
        let t1 = Utc::now() + chrono::Duration::hours(5);
        assert!(workflow.scan_deadlines(t1).is_empty());
        let a = workflow.get(&approval.id).unwrap();
        assert_eq!(a.status, ApprovalStatus::Pending);
        assert_eq!(a.escalation_level, 1);

        // Past the hard deadline: expired.
        let t2 = Utc::now() + chrono::Duration::hours(13);
        let transitions = workflow.scan_deadlines(t2);
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].to, ApprovalStatus::Expired);

        // Expiry fires exactly once.
        assert!(workflow.scan_deadlines(t2).is_empty());
    }

    #[test]
    fn approved_can_only_expire_or_revoke() {
        let workflow = ApprovalWorkflow::new(config());
        let approval = workflow.open(None, vec![ReviewerRole::Compliance]);
        workflow
            .vote(&approval.id, vote(ReviewerRole::Compliance, true))
            .unwrap();
        let transition = workflow.revoke(&approval.id, "admin", "export license withdrawn").unwrap();
        assert_eq!(transition.from, ApprovalStatus::Approved);
        assert_eq!(transition.to, ApprovalStatus::Revoked);
        // Revoked is final.
        assert!(workflow.revoke(&approval.id, "admin", "again").is_err());
    }

    #[test]
    fn audit_trail_records_every_transition() {
        let workflow = ApprovalWorkflow::new(config());
        let approval = workflow.open(None, vec![ReviewerRole::Compliance]);
        workflow
            .vote(&approval.id, vote(ReviewerRole::Compliance, true))
            .unwrap();
        let a = workflow.get(&approval.id).unwrap();
        let actions: Vec<&str> = a.audit_trail.iter().map(|e| e.action.as_str()).collect();
        assert!(actions.contains(&"PENDING"));
        assert!(actions.contains(&"vote"));
        assert!(actions.contains(&"APPROVED"));
    }

    #[test]
    fn vote_from_unrequired_role_is_ignored() {
        let workflow = ApprovalWorkflow::new(config());
        let approval = workflow.open(None, vec![ReviewerRole::Compliance]);
        let outcome = workflow
            .vote(&approval.id, vote(ReviewerRole::Legal, false))
            .unwrap();
        assert!(outcome.is_none());
        assert_eq!(
            workflow.get(&approval.id).unwrap().status,
            ApprovalStatus::Pending
        );
    }
}

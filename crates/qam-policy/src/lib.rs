//! Export-control and sanctions policy gate for QAM.
//!
//! Classification, sanctions screening, jurisdiction rules, license checks,
//! the short-circuiting gate pipeline, and the approval workflow.

pub mod approval;
pub mod classify;
pub mod error;
pub mod gate;
pub mod jurisdiction;
pub mod license;
pub mod sanctions;

pub use approval::{
    Approval, ApprovalStatus, ApprovalTransition, ApprovalWorkflow, ReviewerRole, ReviewerVote,
};
pub use classify::{classify, Classification, ClassificationCache};
pub use error::PolicyError;
pub use gate::{reviewers_for_level, PolicyDecision, PolicyGate, PolicyOutcome};
pub use jurisdiction::{
    ControlListItem, Exemption, ExportControlRule, Restriction, RuleSnapshot,
};
pub use license::{
    check_licenses, required_licenses, InMemoryLicenseDirectory, LicenseService,
};
pub use sanctions::{
    Actor, ActorType, DenyListScreener, SanctionsScreener, ScreeningResult, ScreeningStatus,
};

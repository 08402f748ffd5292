//! Sanctions screening.
//!
//! The screener is an external service behind a trait; the in-process
//! deny-list implementation covers tests and air-gapped deployments.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::warn;

/// Who is asking for the deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub actor_type: ActorType,
    /// ISO country code of the actor's home jurisdiction.
    pub jurisdiction: String,
    /// Documentation tags the actor can present for exemption checks
    /// (e.g. `"end-use-statement"`, `"university-affiliation"`).
    #[serde(default)]
    pub documentation: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    Individual,
    Organization,
    Government,
}

/// Screening verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScreeningStatus {
    Clear,
    PotentialMatch,
    ConfirmedMatch,
    Blocked,
}

/// Screening result with any list matches found.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreeningResult {
    pub status: ScreeningStatus,
    pub matches: Vec<String>,
}

impl ScreeningResult {
    pub fn clear() -> Self {
        Self {
            status: ScreeningStatus::Clear,
            matches: Vec::new(),
        }
    }

    /// BLOCKED (and confirmed matches) deny outright.
    pub fn denies(&self) -> bool {
        matches!(
            self.status,
            ScreeningStatus::Blocked | ScreeningStatus::ConfirmedMatch
        )
    }
}

/// External sanctions screening contract.
#[async_trait]
pub trait SanctionsScreener: Send + Sync {
    async fn screen(&self, actor: &Actor) -> ScreeningResult;
}

/// In-process screener over static deny/watch lists.
#[derive(Debug, Default)]
pub struct DenyListScreener {
    blocked_actors: HashSet<String>,
    watched_actors: HashSet<String>,
    embargoed_jurisdictions: HashSet<String>,
}

impl DenyListScreener {
    pub fn new(
        blocked_actors: impl IntoIterator<Item = String>,
        watched_actors: impl IntoIterator<Item = String>,
        embargoed_jurisdictions: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            blocked_actors: blocked_actors.into_iter().collect(),
            watched_actors: watched_actors.into_iter().collect(),
            embargoed_jurisdictions: embargoed_jurisdictions
                .into_iter()
                .map(|j| j.to_uppercase())
                .collect(),
        }
    }
}

#[async_trait]
impl SanctionsScreener for DenyListScreener {
    async fn screen(&self, actor: &Actor) -> ScreeningResult {
        if self.blocked_actors.contains(&actor.id) {
            warn!(target: "qam::policy", actor = %actor.id, "Actor on deny list");
            return ScreeningResult {
                status: ScreeningStatus::Blocked,
                matches: vec![format!("deny-list:{}", actor.id)],
            };
        }
        if self
            .embargoed_jurisdictions
            .contains(&actor.jurisdiction.to_uppercase())
        {
            return ScreeningResult {
                status: ScreeningStatus::Blocked,
                matches: vec![format!("embargo:{}", actor.jurisdiction)],
            };
        }
        if self.watched_actors.contains(&actor.id) {
            return ScreeningResult {
                status: ScreeningStatus::PotentialMatch,
                matches: vec![format!("watch-list:{}", actor.id)],
            };
        }
        ScreeningResult::clear()
    }
}

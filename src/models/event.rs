use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{EventId, OrganismId, UserId};

/// An append-only record of an accepted mutation, handed to observers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DomainEvent {
    pub id: EventId,
    #[serde(rename = "type")]
    pub kind: EventType,
    pub organism_id: OrganismId,
    pub actor_id: UserId,
    pub occurred_at: DateTime<Utc>,
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventType {
    #[serde(rename = "organism.created")]
    OrganismCreated,
    #[serde(rename = "organism.forked")]
    OrganismForked,
    #[serde(rename = "state.appended")]
    StateAppended,
    #[serde(rename = "organism.composed")]
    OrganismComposed,
    #[serde(rename = "organism.decomposed")]
    OrganismDecomposed,
    #[serde(rename = "organism.open-trunk-changed")]
    OpenTrunkChanged,
    #[serde(rename = "visibility.changed")]
    VisibilityChanged,
    #[serde(rename = "relationship.granted")]
    RelationshipGranted,
    #[serde(rename = "relationship.revoked")]
    RelationshipRevoked,
    #[serde(rename = "proposal.opened")]
    ProposalOpened,
    #[serde(rename = "proposal.integrated")]
    ProposalIntegrated,
    #[serde(rename = "proposal.declined")]
    ProposalDeclined,
    #[serde(rename = "proposal.evaluation-failed")]
    ProposalEvaluationFailed,
    #[serde(rename = "organism.observed")]
    OrganismObserved,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrganismCreated => "organism.created",
            Self::OrganismForked => "organism.forked",
            Self::StateAppended => "state.appended",
            Self::OrganismComposed => "organism.composed",
            Self::OrganismDecomposed => "organism.decomposed",
            Self::OpenTrunkChanged => "organism.open-trunk-changed",
            Self::VisibilityChanged => "visibility.changed",
            Self::RelationshipGranted => "relationship.granted",
            Self::RelationshipRevoked => "relationship.revoked",
            Self::ProposalOpened => "proposal.opened",
            Self::ProposalIntegrated => "proposal.integrated",
            Self::ProposalDeclined => "proposal.declined",
            Self::ProposalEvaluationFailed => "proposal.evaluation-failed",
            Self::OrganismObserved => "organism.observed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "organism.created" => Some(Self::OrganismCreated),
            "organism.forked" => Some(Self::OrganismForked),
            "state.appended" => Some(Self::StateAppended),
            "organism.composed" => Some(Self::OrganismComposed),
            "organism.decomposed" => Some(Self::OrganismDecomposed),
            "organism.open-trunk-changed" => Some(Self::OpenTrunkChanged),
            "visibility.changed" => Some(Self::VisibilityChanged),
            "relationship.granted" => Some(Self::RelationshipGranted),
            "relationship.revoked" => Some(Self::RelationshipRevoked),
            "proposal.opened" => Some(Self::ProposalOpened),
            "proposal.integrated" => Some(Self::ProposalIntegrated),
            "proposal.declined" => Some(Self::ProposalDeclined),
            "proposal.evaluation-failed" => Some(Self::ProposalEvaluationFailed),
            "organism.observed" => Some(Self::OrganismObserved),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

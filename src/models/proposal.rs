use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{OrganismId, ProposalId, UserId, VisibilityLevel};

/// A proposed mutation against a target organism, awaiting resolution.
///
/// Proposals are created `Open` and resolve exactly once, to either
/// `Integrated` or `Declined`. Once resolved they are immutable. The
/// resolution write is conditional on the stored status still being
/// `Open`, so two racing resolutions cannot both succeed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Proposal {
    pub id: ProposalId,
    pub organism_id: OrganismId,
    pub mutation: ProposalMutation,
    pub description: Option<String>,
    pub proposed_by: UserId,
    pub status: ProposalStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<UserId>,
    pub decline_reason: Option<String>,
}

impl Proposal {
    /// Content type of an append-state proposal.
    pub fn proposed_content_type_id(&self) -> Option<&str> {
        match &self.mutation {
            ProposalMutation::AppendState {
                content_type_id, ..
            } => Some(content_type_id),
            _ => None,
        }
    }

    /// Payload of an append-state proposal.
    pub fn proposed_payload(&self) -> Option<&Value> {
        match &self.mutation {
            ProposalMutation::AppendState { payload, .. } => Some(payload),
            _ => None,
        }
    }

    /// The restricted projection handed to policy evaluators.
    pub fn view(&self) -> ProposalView {
        ProposalView {
            kind: self.mutation.kind(),
            proposed_content_type_id: self.proposed_content_type_id().map(str::to_string),
            proposed_payload: self.proposed_payload().cloned(),
            proposed_by: self.proposed_by.clone(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == ProposalStatus::Open
    }
}

/// The change a proposal would make once integrated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ProposalMutation {
    AppendState {
        content_type_id: String,
        payload: Value,
    },
    Compose {
        child_id: OrganismId,
        #[serde(default)]
        position: Option<i64>,
    },
    Decompose {
        child_id: OrganismId,
    },
    ChangeVisibility {
        level: VisibilityLevel,
    },
}

impl ProposalMutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            Self::AppendState { .. } => MutationKind::AppendState,
            Self::Compose { .. } => MutationKind::Compose,
            Self::Decompose { .. } => MutationKind::Decompose,
            Self::ChangeVisibility { .. } => MutationKind::ChangeVisibility,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum MutationKind {
    AppendState,
    Compose,
    Decompose,
    ChangeVisibility,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AppendState => "append-state",
            Self::Compose => "compose",
            Self::Decompose => "decompose",
            Self::ChangeVisibility => "change-visibility",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "append-state" => Some(Self::AppendState),
            "compose" => Some(Self::Compose),
            "decompose" => Some(Self::Decompose),
            "change-visibility" => Some(Self::ChangeVisibility),
            _ => None,
        }
    }
}

/// - `Open`: awaiting integration or decline
/// - `Integrated`: the mutation was applied
/// - `Declined`: rejected; the mutation was never applied
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Open,
    Integrated,
    Declined,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Integrated => "integrated",
            Self::Declined => "declined",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "integrated" => Some(Self::Integrated),
            "declined" => Some(Self::Declined),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a policy sees of a proposal. Kernel bookkeeping fields are withheld.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProposalView {
    pub kind: MutationKind,
    pub proposed_content_type_id: Option<String>,
    pub proposed_payload: Option<Value>,
    pub proposed_by: UserId,
}

/// Input for opening a proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenProposalInput {
    pub organism_id: OrganismId,
    pub mutation: ProposalMutation,
    pub proposed_by: UserId,
    #[serde(default)]
    pub description: Option<String>,
}

/// The terminal write applied to an open proposal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProposalResolution {
    pub status: ProposalStatus,
    pub resolved_at: DateTime<Utc>,
    pub resolved_by: UserId,
    pub decline_reason: Option<String>,
}

impl ProposalResolution {
    /// Apply this resolution to an in-memory copy of the proposal.
    pub fn apply_to(&self, proposal: &mut Proposal) {
        proposal.status = self.status;
        proposal.resolved_at = Some(self.resolved_at);
        proposal.resolved_by = Some(self.resolved_by.clone());
        proposal.decline_reason = self.decline_reason.clone();
    }
}

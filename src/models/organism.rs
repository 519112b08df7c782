use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{OrganismId, UserId};

/// A versioned, content-typed entity.
///
/// Identity is immutable once created. The only mutable field is
/// `open_trunk`, which decides whether state may be appended directly or
/// must go through a proposal. Organisms are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Organism {
    pub id: OrganismId,
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
    /// When true, any viewer may append state without a proposal.
    pub open_trunk: bool,
    /// The organism this one was forked from, if any.
    pub forked_from_id: Option<OrganismId>,
}

/// Input for introducing a new organism.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrganismInput {
    pub content_type_id: String,
    pub payload: Value,
    pub created_by: UserId,
    /// Defaults to `false` (proposal-governed).
    #[serde(default)]
    pub open_trunk: Option<bool>,
}

/// Input for appending a state directly to an open-trunk organism.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendStateInput {
    pub organism_id: OrganismId,
    pub content_type_id: String,
    pub payload: Value,
    pub appended_by: UserId,
}

/// Input for forking an organism into a new lineage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForkOrganismInput {
    pub source_id: OrganismId,
    pub forked_by: UserId,
    #[serde(default)]
    pub open_trunk: Option<bool>,
}

/// Everything written when an organism comes into being.
///
/// The organism, its first state and the creator's stewardship are
/// persisted as one unit; none of them is observable without the others.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganismGenesis {
    pub organism: Organism,
    pub initial_state: super::OrganismState,
    pub stewardship: super::Relationship,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{OrganismId, RelationshipId, UserId};

/// A standing fact linking a user to an organism.
///
/// Stewardship is written exactly once, when the organism is created, and
/// names its creator. Membership and integration authority are granted by
/// stewards afterwards. Access control reads these facts; it never writes
/// them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Relationship {
    pub id: RelationshipId,
    #[serde(rename = "type")]
    pub kind: RelationshipType,
    pub user_id: UserId,
    pub organism_id: OrganismId,
    pub role: Option<MembershipRole>,
    pub created_at: DateTime<Utc>,
}

/// The kind of relationship a user holds.
///
/// - `Stewardship`: full authority over the organism
/// - `Membership`: belongs to the organism's community; see [`MembershipRole`]
/// - `IntegrationAuthority`: may compose and resolve proposals
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RelationshipType {
    Stewardship,
    Membership,
    IntegrationAuthority,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stewardship => "stewardship",
            Self::Membership => "membership",
            Self::IntegrationAuthority => "integration-authority",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "stewardship" => Some(Self::Stewardship),
            "membership" => Some(Self::Membership),
            "integration-authority" => Some(Self::IntegrationAuthority),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum MembershipRole {
    Founder,
    Member,
}

impl MembershipRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Founder => "founder",
            Self::Member => "member",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "founder" => Some(Self::Founder),
            "member" => Some(Self::Member),
            _ => None,
        }
    }
}

/// Input for granting a non-stewardship relationship.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantRelationshipInput {
    pub organism_id: OrganismId,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub kind: RelationshipType,
    #[serde(default)]
    pub role: Option<MembershipRole>,
    pub granted_by: UserId,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::OrganismId;

/// How widely an organism can be seen. One record per organism, last write wins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VisibilityRecord {
    pub organism_id: OrganismId,
    pub level: VisibilityLevel,
    pub updated_at: DateTime<Utc>,
}

/// - `Public`: anyone may view
/// - `Members`: anyone related to the organism or to its parent may view
/// - `Private`: only stewards may view
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityLevel {
    #[default]
    Public,
    Members,
    Private,
}

impl VisibilityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Members => "members",
            Self::Private => "private",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Self::Public),
            "members" => Some(Self::Members),
            "private" => Some(Self::Private),
            _ => None,
        }
    }
}

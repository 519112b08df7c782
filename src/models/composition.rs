use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Organism, OrganismId, OrganismState, UserId};

/// A parent/child edge in the composition tree.
///
/// A child appears in at most one record at a time, so the graph of records
/// is a forest. Records are created by composing and destroyed by
/// decomposing; they are never updated in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompositionRecord {
    pub parent_id: OrganismId,
    pub child_id: OrganismId,
    pub composed_at: DateTime<Utc>,
    pub composed_by: UserId,
    /// Ordering hint among siblings. Unpositioned children sort last.
    pub position: Option<i64>,
}

/// Input for nesting one organism inside another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeInput {
    pub parent_id: OrganismId,
    pub child_id: OrganismId,
    pub composed_by: UserId,
    #[serde(default)]
    pub position: Option<i64>,
}

/// Input for removing a parent/child edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecomposeInput {
    pub parent_id: OrganismId,
    pub child_id: OrganismId,
    pub decomposed_by: UserId,
}

/// An organism with its nested children, used for tree rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganismTreeNode {
    pub organism: Organism,
    pub current_state: Option<OrganismState>,
    pub children: Vec<OrganismTreeNode>,
}

/// Sort siblings into composition order: by position, then by composition time.
pub fn sort_siblings(records: &mut [CompositionRecord]) {
    records.sort_by(|a, b| {
        let pa = a.position.unwrap_or(i64::MAX);
        let pb = b.position.unwrap_or(i64::MAX);
        pa.cmp(&pb).then(a.composed_at.cmp(&b.composed_at))
    });
}

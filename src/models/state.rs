use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{OrganismId, StateId, UserId};

/// One immutable version of an organism's payload.
///
/// States form a singly linked chain per organism: `sequence_number` starts
/// at 1 and increases by exactly one per accepted mutation, and
/// `parent_state_id` points at the immediately preceding state. The state
/// with the highest sequence number is the organism's current state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrganismState {
    pub id: StateId,
    pub organism_id: OrganismId,
    pub content_type_id: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
    pub sequence_number: u64,
    pub parent_state_id: Option<StateId>,
}

impl OrganismState {
    /// Whether this state directly follows `previous` in the version chain.
    pub fn follows(&self, previous: &OrganismState) -> bool {
        self.organism_id == previous.organism_id
            && self.sequence_number == previous.sequence_number + 1
            && self.parent_state_id == Some(previous.id)
    }
}

use serde_json::json;
use tracing::{debug, info};

use super::Kernel;
use crate::access::Action;
use crate::error::{KernelError, KernelResult};
use crate::models::*;

/// How often an append is retried when another writer claimed the same
/// sequence number first.
pub(crate) const MAX_APPEND_ATTEMPTS: usize = 8;

pub(crate) fn append_exhausted(organism_id: OrganismId) -> KernelError {
    KernelError::Storage(anyhow::anyhow!(
        "could not append state to {} after {} attempts",
        organism_id,
        MAX_APPEND_ATTEMPTS
    ))
}

impl Kernel {
    /// Introduce a new organism with its first state. The creator becomes steward.
    pub async fn create_organism(&self, input: CreateOrganismInput) -> KernelResult<OrganismGenesis> {
        self.validate(&input.content_type_id, &input.payload)?;

        let genesis = self.genesis(
            input.content_type_id,
            input.payload,
            input.created_by,
            input.open_trunk.unwrap_or(false),
            None,
        );
        self.ports.organisms.save(&genesis).await?;

        let organism = &genesis.organism;
        info!(
            organism_id = %organism.id,
            content_type = %genesis.initial_state.content_type_id,
            created_by = %organism.created_by,
            open_trunk = organism.open_trunk,
            "Organism created"
        );
        self.emit(
            EventType::OrganismCreated,
            organism.id,
            &organism.created_by,
            json!({
                "contentTypeId": genesis.initial_state.content_type_id,
                "stateId": genesis.initial_state.id,
                "openTrunk": organism.open_trunk,
            }),
        )
        .await;

        Ok(genesis)
    }

    /// Start a new lineage from the current state of `source_id`.
    pub async fn fork_organism(&self, input: ForkOrganismInput) -> KernelResult<OrganismGenesis> {
        let source = self.require_organism(input.source_id).await?;
        self.authorize(&input.forked_by, &source, Action::Fork).await?;

        let current = self
            .ports
            .states
            .find_current_by_organism_id(source.id)
            .await?
            .ok_or(KernelError::StateNotFound {
                organism_id: source.id,
            })?;
        self.validate(&current.content_type_id, &current.payload)?;

        let genesis = self.genesis(
            current.content_type_id,
            current.payload,
            input.forked_by,
            input.open_trunk.unwrap_or(false),
            Some(source.id),
        );
        self.ports.organisms.save(&genesis).await?;

        let fork = &genesis.organism;
        info!(organism_id = %fork.id, forked_from = %source.id, "Organism forked");
        self.emit(
            EventType::OrganismCreated,
            fork.id,
            &fork.created_by,
            json!({
                "contentTypeId": genesis.initial_state.content_type_id,
                "stateId": genesis.initial_state.id,
                "openTrunk": fork.open_trunk,
                "forkedFromId": source.id,
            }),
        )
        .await;
        self.emit(
            EventType::OrganismForked,
            source.id,
            &fork.created_by,
            json!({ "forkId": fork.id, "sourceStateId": current.id }),
        )
        .await;

        Ok(genesis)
    }

    fn genesis(
        &self,
        content_type_id: String,
        payload: serde_json::Value,
        created_by: UserId,
        open_trunk: bool,
        forked_from_id: Option<OrganismId>,
    ) -> OrganismGenesis {
        let identity = &self.ports.identity;
        let now = identity.now();
        let organism = Organism {
            id: identity.organism_id(),
            created_at: now,
            created_by: created_by.clone(),
            open_trunk,
            forked_from_id,
        };
        let initial_state = OrganismState {
            id: identity.state_id(),
            organism_id: organism.id,
            content_type_id,
            payload,
            created_at: now,
            created_by: created_by.clone(),
            sequence_number: 1,
            parent_state_id: None,
        };
        let stewardship = Relationship {
            id: identity.relationship_id(),
            kind: RelationshipType::Stewardship,
            user_id: created_by,
            organism_id: organism.id,
            role: None,
            created_at: now,
        };

        OrganismGenesis {
            organism,
            initial_state,
            stewardship,
        }
    }

    /// Append a state directly. Only open-trunk organisms accept this
    /// unless the kernel is running trusted.
    pub async fn append_state(&self, input: AppendStateInput) -> KernelResult<OrganismState> {
        let organism = self.require_organism(input.organism_id).await?;
        self.authorize(&input.appended_by, &organism, Action::AppendState)
            .await?;
        self.validate(&input.content_type_id, &input.payload)?;

        for attempt in 1..=MAX_APPEND_ATTEMPTS {
            let state = self
                .next_state(
                    organism.id,
                    input.content_type_id.clone(),
                    input.payload.clone(),
                    input.appended_by.clone(),
                )
                .await?;

            if self.ports.states.append(&state).await? {
                self.announce_state(&state).await;
                return Ok(state);
            }

            debug!(
                organism_id = %organism.id,
                sequence = state.sequence_number,
                attempt,
                "Sequence number taken by a concurrent append, retrying"
            );
        }

        Err(append_exhausted(organism.id))
    }

    /// Build the state that would follow the organism's current one.
    pub(crate) async fn next_state(
        &self,
        organism_id: OrganismId,
        content_type_id: String,
        payload: serde_json::Value,
        created_by: UserId,
    ) -> KernelResult<OrganismState> {
        let current = self
            .ports
            .states
            .find_current_by_organism_id(organism_id)
            .await?;
        Ok(OrganismState {
            id: self.ports.identity.state_id(),
            organism_id,
            content_type_id,
            payload,
            created_at: self.ports.identity.now(),
            created_by,
            sequence_number: current.as_ref().map_or(1, |s| s.sequence_number + 1),
            parent_state_id: current.as_ref().map(|s| s.id),
        })
    }

    pub(crate) async fn announce_state(&self, state: &OrganismState) {
        info!(
            organism_id = %state.organism_id,
            sequence = state.sequence_number,
            appended_by = %state.created_by,
            "State appended"
        );
        self.emit(
            EventType::StateAppended,
            state.organism_id,
            &state.created_by,
            json!({
                "stateId": state.id,
                "contentTypeId": state.content_type_id,
                "sequenceNumber": state.sequence_number,
                "parentStateId": state.parent_state_id,
            }),
        )
        .await;
    }

    /// Switch an organism between open-trunk and proposal-governed.
    ///
    /// Setting the value it already has writes nothing and emits nothing.
    pub async fn change_open_trunk(
        &self,
        organism_id: OrganismId,
        open_trunk: bool,
        changed_by: &str,
    ) -> KernelResult<Organism> {
        let mut organism = self.require_organism(organism_id).await?;
        self.authorize(changed_by, &organism, Action::ChangeOpenTrunk)
            .await?;

        if organism.open_trunk == open_trunk {
            debug!(organism_id = %organism.id, open_trunk, "Open-trunk unchanged");
            return Ok(organism);
        }

        self.ports
            .organisms
            .set_open_trunk(organism.id, open_trunk)
            .await?;
        organism.open_trunk = open_trunk;

        info!(organism_id = %organism.id, open_trunk, changed_by = %changed_by, "Open-trunk changed");
        self.emit(
            EventType::OpenTrunkChanged,
            organism.id,
            changed_by,
            json!({ "openTrunk": open_trunk }),
        )
        .await;

        Ok(organism)
    }

    // ============================================================
    // Reads
    // ============================================================

    pub async fn get_organism(&self, id: OrganismId) -> KernelResult<Option<Organism>> {
        Ok(self.ports.organisms.find_by_id(id).await?)
    }

    /// The state with the highest sequence number, if any.
    pub async fn current_state(&self, organism_id: OrganismId) -> KernelResult<Option<OrganismState>> {
        Ok(self
            .ports
            .states
            .find_current_by_organism_id(organism_id)
            .await?)
    }

    /// Every state of the organism, oldest first.
    pub async fn state_history(&self, organism_id: OrganismId) -> KernelResult<Vec<OrganismState>> {
        self.require_exists(organism_id).await?;
        Ok(self.ports.states.find_history(organism_id).await?)
    }
}

//! In-memory implementation of every kernel port.
//!
//! All collections live behind a single mutex, so each port call is atomic
//! with respect to every other. Used by tests and by embedders that do not
//! need persistence.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;

use crate::models::*;
use crate::ports::*;

#[derive(Default)]
struct Inner {
    organisms: HashMap<OrganismId, Organism>,
    states: HashMap<OrganismId, Vec<OrganismState>>,
    compositions: Vec<CompositionRecord>,
    relationships: Vec<Relationship>,
    visibility: HashMap<OrganismId, VisibilityRecord>,
    proposals: Vec<Proposal>,
    events: Vec<DomainEvent>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory store lock poisoned")
    }

    /// Every event published so far, in publication order.
    pub fn events(&self) -> Vec<DomainEvent> {
        self.lock().events.clone()
    }

    pub fn events_for(&self, organism_id: OrganismId) -> Vec<DomainEvent> {
        self.lock()
            .events
            .iter()
            .filter(|e| e.organism_id == organism_id)
            .cloned()
            .collect()
    }

    /// Number of composition records naming `child_id` as the child.
    pub fn parent_count(&self, child_id: OrganismId) -> usize {
        self.lock()
            .compositions
            .iter()
            .filter(|r| r.child_id == child_id)
            .count()
    }

    /// Insert a composition record without any checks. Lets tests model a
    /// store that was corrupted outside the kernel.
    pub fn force_composition(&self, record: CompositionRecord) {
        self.lock().compositions.push(record);
    }
}

#[async_trait]
impl OrganismStore for MemoryStore {
    async fn save(&self, genesis: &OrganismGenesis) -> Result<()> {
        let mut inner = self.lock();
        let id = genesis.organism.id;
        if inner.organisms.contains_key(&id) {
            anyhow::bail!("organism {} already exists", id);
        }
        inner.organisms.insert(id, genesis.organism.clone());
        inner
            .states
            .entry(id)
            .or_default()
            .push(genesis.initial_state.clone());
        inner.relationships.push(genesis.stewardship.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: OrganismId) -> Result<Option<Organism>> {
        Ok(self.lock().organisms.get(&id).cloned())
    }

    async fn exists(&self, id: OrganismId) -> Result<bool> {
        Ok(self.lock().organisms.contains_key(&id))
    }

    async fn set_open_trunk(&self, id: OrganismId, open_trunk: bool) -> Result<()> {
        let mut inner = self.lock();
        let organism = inner
            .organisms
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("organism {} not found", id))?;
        organism.open_trunk = open_trunk;
        Ok(())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn append(&self, state: &OrganismState) -> Result<bool> {
        let mut inner = self.lock();
        let history = inner.states.entry(state.organism_id).or_default();
        if history
            .iter()
            .any(|s| s.sequence_number == state.sequence_number)
        {
            return Ok(false);
        }
        history.push(state.clone());
        history.sort_by_key(|s| s.sequence_number);
        Ok(true)
    }

    async fn find_current_by_organism_id(
        &self,
        organism_id: OrganismId,
    ) -> Result<Option<OrganismState>> {
        Ok(self
            .lock()
            .states
            .get(&organism_id)
            .and_then(|h| h.iter().max_by_key(|s| s.sequence_number))
            .cloned())
    }

    async fn find_history(&self, organism_id: OrganismId) -> Result<Vec<OrganismState>> {
        Ok(self
            .lock()
            .states
            .get(&organism_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl CompositionStore for MemoryStore {
    async fn save(&self, record: &CompositionRecord) -> Result<bool> {
        let mut inner = self.lock();
        if inner
            .compositions
            .iter()
            .any(|r| r.child_id == record.child_id)
        {
            return Ok(false);
        }
        inner.compositions.push(record.clone());
        Ok(true)
    }

    async fn remove(&self, parent_id: OrganismId, child_id: OrganismId) -> Result<bool> {
        let mut inner = self.lock();
        let before = inner.compositions.len();
        inner
            .compositions
            .retain(|r| !(r.parent_id == parent_id && r.child_id == child_id));
        Ok(inner.compositions.len() < before)
    }

    async fn find_parent(&self, child_id: OrganismId) -> Result<Option<CompositionRecord>> {
        Ok(self
            .lock()
            .compositions
            .iter()
            .find(|r| r.child_id == child_id)
            .cloned())
    }

    async fn find_children(&self, parent_id: OrganismId) -> Result<Vec<CompositionRecord>> {
        let mut children: Vec<CompositionRecord> = self
            .lock()
            .compositions
            .iter()
            .filter(|r| r.parent_id == parent_id)
            .cloned()
            .collect();
        sort_siblings(&mut children);
        Ok(children)
    }
}

#[async_trait]
impl RelationshipStore for MemoryStore {
    async fn save(&self, relationship: &Relationship) -> Result<()> {
        self.lock().relationships.push(relationship.clone());
        Ok(())
    }

    async fn remove(&self, id: RelationshipId) -> Result<bool> {
        let mut inner = self.lock();
        let before = inner.relationships.len();
        inner.relationships.retain(|r| r.id != id);
        Ok(inner.relationships.len() < before)
    }

    async fn find_by_user_and_organism(
        &self,
        user_id: &str,
        organism_id: OrganismId,
    ) -> Result<Vec<Relationship>> {
        Ok(self
            .lock()
            .relationships
            .iter()
            .filter(|r| r.user_id == user_id && r.organism_id == organism_id)
            .cloned()
            .collect())
    }

    async fn find_by_organism(&self, organism_id: OrganismId) -> Result<Vec<Relationship>> {
        Ok(self
            .lock()
            .relationships
            .iter()
            .filter(|r| r.organism_id == organism_id)
            .cloned()
            .collect())
    }

    async fn find_by_user(&self, user_id: &str) -> Result<Vec<Relationship>> {
        Ok(self
            .lock()
            .relationships
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl VisibilityStore for MemoryStore {
    async fn save(&self, record: &VisibilityRecord) -> Result<()> {
        self.lock()
            .visibility
            .insert(record.organism_id, record.clone());
        Ok(())
    }

    async fn find_by_organism_id(
        &self,
        organism_id: OrganismId,
    ) -> Result<Option<VisibilityRecord>> {
        Ok(self.lock().visibility.get(&organism_id).cloned())
    }
}

#[async_trait]
impl ProposalStore for MemoryStore {
    async fn save(&self, proposal: &Proposal) -> Result<()> {
        self.lock().proposals.push(proposal.clone());
        Ok(())
    }

    async fn update(&self, id: ProposalId, resolution: &ProposalResolution) -> Result<bool> {
        let mut inner = self.lock();
        match inner
            .proposals
            .iter_mut()
            .find(|p| p.id == id && p.status == ProposalStatus::Open)
        {
            Some(proposal) => {
                resolution.apply_to(proposal);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn integrate(
        &self,
        id: ProposalId,
        resolution: &ProposalResolution,
        write: &ProposalWrite,
    ) -> Result<IntegrateWrite> {
        let mut inner = self.lock();
        let Some(index) = inner
            .proposals
            .iter()
            .position(|p| p.id == id && p.status == ProposalStatus::Open)
        else {
            return Ok(IntegrateWrite::NotOpen);
        };

        match write {
            ProposalWrite::AppendState(state) => {
                let history = inner.states.entry(state.organism_id).or_default();
                if history
                    .iter()
                    .any(|s| s.sequence_number == state.sequence_number)
                {
                    return Ok(IntegrateWrite::Refused);
                }
                history.push(state.clone());
                history.sort_by_key(|s| s.sequence_number);
            }
            ProposalWrite::Compose(record) => {
                if inner
                    .compositions
                    .iter()
                    .any(|r| r.child_id == record.child_id)
                {
                    return Ok(IntegrateWrite::Refused);
                }
                inner.compositions.push(record.clone());
            }
            ProposalWrite::Decompose {
                parent_id,
                child_id,
            } => {
                let before = inner.compositions.len();
                inner
                    .compositions
                    .retain(|r| !(r.parent_id == *parent_id && r.child_id == *child_id));
                if inner.compositions.len() == before {
                    return Ok(IntegrateWrite::Refused);
                }
            }
            ProposalWrite::ChangeVisibility(record) => {
                inner.visibility.insert(record.organism_id, record.clone());
            }
        }

        resolution.apply_to(&mut inner.proposals[index]);
        Ok(IntegrateWrite::Applied)
    }

    async fn find_by_id(&self, id: ProposalId) -> Result<Option<Proposal>> {
        Ok(self.lock().proposals.iter().find(|p| p.id == id).cloned())
    }

    async fn find_by_organism_id(&self, organism_id: OrganismId) -> Result<Vec<Proposal>> {
        Ok(self
            .lock()
            .proposals
            .iter()
            .filter(|p| p.organism_id == organism_id)
            .cloned()
            .collect())
    }

    async fn find_open_by_organism_id(&self, organism_id: OrganismId) -> Result<Vec<Proposal>> {
        Ok(self
            .lock()
            .proposals
            .iter()
            .filter(|p| p.organism_id == organism_id && p.is_open())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EventPublisher for MemoryStore {
    async fn publish(&self, event: &DomainEvent) -> Result<()> {
        self.lock().events.push(event.clone());
        Ok(())
    }
}

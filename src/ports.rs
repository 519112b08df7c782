//! Ports the kernel drives. Storage and transport collaborators implement these.
//!
//! All store methods return `anyhow::Result`; the kernel wraps failures in
//! [`KernelError::Storage`](crate::error::KernelError::Storage). Where the
//! kernel needs a storage-level guarantee (child uniqueness, sequence
//! uniqueness, open-only resolution), the method returns `bool` and the
//! implementation must make the check-and-write atomic.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::*;

#[async_trait]
pub trait OrganismStore: Send + Sync {
    /// Persist a new organism together with its first state and the
    /// creator's stewardship. Either all three are written or none are.
    async fn save(&self, genesis: &OrganismGenesis) -> Result<()>;

    async fn find_by_id(&self, id: OrganismId) -> Result<Option<Organism>>;

    async fn exists(&self, id: OrganismId) -> Result<bool>;

    async fn set_open_trunk(&self, id: OrganismId, open_trunk: bool) -> Result<()>;
}

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Append a state. Returns `false` without writing if a state with the
    /// same organism and sequence number already exists.
    async fn append(&self, state: &OrganismState) -> Result<bool>;

    async fn find_current_by_organism_id(
        &self,
        organism_id: OrganismId,
    ) -> Result<Option<OrganismState>>;

    /// Full version chain, oldest first.
    async fn find_history(&self, organism_id: OrganismId) -> Result<Vec<OrganismState>>;
}

#[async_trait]
pub trait CompositionStore: Send + Sync {
    /// Write a composition record. Returns `false` without writing if the
    /// child already has a parent.
    async fn save(&self, record: &CompositionRecord) -> Result<bool>;

    /// Remove the record for exactly this pair. Returns `false` if there was none.
    async fn remove(&self, parent_id: OrganismId, child_id: OrganismId) -> Result<bool>;

    async fn find_parent(&self, child_id: OrganismId) -> Result<Option<CompositionRecord>>;

    /// Direct children in composition order.
    async fn find_children(&self, parent_id: OrganismId) -> Result<Vec<CompositionRecord>>;
}

#[async_trait]
pub trait RelationshipStore: Send + Sync {
    async fn save(&self, relationship: &Relationship) -> Result<()>;

    async fn remove(&self, id: RelationshipId) -> Result<bool>;

    async fn find_by_user_and_organism(
        &self,
        user_id: &str,
        organism_id: OrganismId,
    ) -> Result<Vec<Relationship>>;

    async fn find_by_organism(&self, organism_id: OrganismId) -> Result<Vec<Relationship>>;

    async fn find_by_user(&self, user_id: &str) -> Result<Vec<Relationship>>;
}

#[async_trait]
pub trait VisibilityStore: Send + Sync {
    async fn save(&self, record: &VisibilityRecord) -> Result<()>;

    async fn find_by_organism_id(&self, organism_id: OrganismId)
        -> Result<Option<VisibilityRecord>>;
}

/// The store write that lands together with an integrated proposal.
#[derive(Debug, Clone, PartialEq)]
pub enum ProposalWrite {
    /// Refused if the sequence number is already taken.
    AppendState(OrganismState),
    /// Refused if the child already has a parent.
    Compose(CompositionRecord),
    /// Refused if the edge no longer exists.
    Decompose {
        parent_id: OrganismId,
        child_id: OrganismId,
    },
    ChangeVisibility(VisibilityRecord),
}

/// What [`ProposalStore::integrate`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrateWrite {
    /// The proposal was resolved and the write applied.
    Applied,
    /// The proposal was no longer open. Nothing was written.
    NotOpen,
    /// The write was refused. The proposal is still open.
    Refused,
}

#[async_trait]
pub trait ProposalStore: Send + Sync {
    async fn save(&self, proposal: &Proposal) -> Result<()>;

    /// Resolve a proposal if and only if it is still open. Returns whether
    /// this call won.
    async fn update(&self, id: ProposalId, resolution: &ProposalResolution) -> Result<bool>;

    /// Resolve an open proposal and apply `write` as one atomic unit.
    /// Either both land or neither does.
    async fn integrate(
        &self,
        id: ProposalId,
        resolution: &ProposalResolution,
        write: &ProposalWrite,
    ) -> Result<IntegrateWrite>;

    async fn find_by_id(&self, id: ProposalId) -> Result<Option<Proposal>>;

    /// All proposals for an organism, oldest first.
    async fn find_by_organism_id(&self, organism_id: OrganismId) -> Result<Vec<Proposal>>;

    async fn find_open_by_organism_id(&self, organism_id: OrganismId) -> Result<Vec<Proposal>>;
}

/// Receives every accepted mutation. Publication is fire-and-forget from
/// the kernel's side: a failing publisher is logged, never propagated.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &DomainEvent) -> Result<()>;
}

/// Source of fresh identifiers and the current time.
pub trait IdentityClock: Send + Sync {
    fn organism_id(&self) -> OrganismId {
        Uuid::new_v4()
    }

    fn state_id(&self) -> StateId {
        Uuid::new_v4()
    }

    fn proposal_id(&self) -> ProposalId {
        Uuid::new_v4()
    }

    fn relationship_id(&self) -> RelationshipId {
        Uuid::new_v4()
    }

    fn event_id(&self) -> EventId {
        Uuid::new_v4()
    }

    fn now(&self) -> DateTime<Utc>;
}

/// Random v4 ids and the wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemIdentity;

impl IdentityClock for SystemIdentity {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

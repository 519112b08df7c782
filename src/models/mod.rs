//! Domain models for the organism kernel.
//!
//! # Core Concepts
//!
//! ## Permanent Entities
//!
//! - [`Organism`]: A versioned, content-typed entity. Never deleted.
//! - [`OrganismState`]: Append-only version chain of an organism's payload.
//! - [`Relationship`]: Stewardship, membership or integration authority of a user.
//! - [`DomainEvent`]: Append-only log of accepted mutations.
//!
//! ## Mutable Facts
//!
//! - [`CompositionRecord`]: Parent/child edge in the single-parent composition tree.
//! - [`VisibilityRecord`]: Last-write-wins visibility level per organism.
//! - [`Proposal`]: A governed mutation, open until integrated or declined exactly once.

mod composition;
mod event;
mod organism;
mod proposal;
mod relationship;
mod state;
mod visibility;

pub use composition::*;
pub use event::*;
pub use organism::*;
pub use proposal::*;
pub use relationship::*;
pub use state::*;
pub use visibility::*;

use uuid::Uuid;

pub type OrganismId = Uuid;
pub type StateId = Uuid;
pub type ProposalId = Uuid;
pub type RelationshipId = Uuid;
pub type EventId = Uuid;
/// Users are issued by an external identity provider; the kernel treats them as opaque.
pub type UserId = String;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::Kernel;
use crate::access::Action;
use crate::error::{KernelError, KernelResult};
use crate::models::*;

impl Kernel {
    /// Set how widely an organism can be seen. Steward only.
    ///
    /// Setting the level it already has writes nothing and emits nothing.
    pub async fn change_visibility(
        &self,
        organism_id: OrganismId,
        level: VisibilityLevel,
        changed_by: &str,
    ) -> KernelResult<VisibilityRecord> {
        let organism = self.require_organism(organism_id).await?;
        self.authorize(changed_by, &organism, Action::ChangeVisibility)
            .await?;

        let existing = self.ports.visibility.find_by_organism_id(organism.id).await?;
        let current = existing.as_ref().map_or(self.default_visibility, |r| r.level);
        if current == level {
            debug!(organism_id = %organism.id, level = level.as_str(), "Visibility unchanged");
            return Ok(existing.unwrap_or(VisibilityRecord {
                organism_id: organism.id,
                level,
                updated_at: organism.created_at,
            }));
        }

        let record = VisibilityRecord {
            organism_id: organism.id,
            level,
            updated_at: self.ports.identity.now(),
        };
        self.ports.visibility.save(&record).await?;

        self.announce_visibility(&record, changed_by).await;
        Ok(record)
    }

    pub(crate) async fn announce_visibility(&self, record: &VisibilityRecord, changed_by: &str) {
        info!(organism_id = %record.organism_id, level = record.level.as_str(), changed_by = %changed_by, "Visibility changed");
        self.emit(
            EventType::VisibilityChanged,
            record.organism_id,
            changed_by,
            json!({ "level": record.level }),
        )
        .await;
    }

    /// Effective visibility, falling back to the kernel default.
    pub async fn visibility_of(&self, organism_id: OrganismId) -> KernelResult<VisibilityLevel> {
        self.require_exists(organism_id).await?;
        self.visibility_level(organism_id).await
    }

    /// Grant membership or integration authority. Steward only.
    ///
    /// Stewardship is only ever created with the organism and cannot be
    /// granted here. A role is kept for memberships only and defaults to
    /// `Member`.
    pub async fn grant_relationship(
        &self,
        input: GrantRelationshipInput,
    ) -> KernelResult<Relationship> {
        let organism = self.require_organism(input.organism_id).await?;
        if input.kind == RelationshipType::Stewardship {
            warn!(organism_id = %organism.id, granted_by = %input.granted_by, "Refusing to grant stewardship");
            return Err(KernelError::AccessDenied {
                user_id: input.granted_by,
                action: Action::ManageRelationships,
                organism_id: organism.id,
            });
        }
        self.authorize(&input.granted_by, &organism, Action::ManageRelationships)
            .await?;

        let role = match input.kind {
            RelationshipType::Membership => Some(input.role.unwrap_or(MembershipRole::Member)),
            _ => None,
        };
        let relationship = Relationship {
            id: self.ports.identity.relationship_id(),
            kind: input.kind,
            user_id: input.user_id,
            organism_id: organism.id,
            role,
            created_at: self.ports.identity.now(),
        };
        self.ports.relationships.save(&relationship).await?;

        info!(
            organism_id = %organism.id,
            user_id = %relationship.user_id,
            kind = relationship.kind.as_str(),
            granted_by = %input.granted_by,
            "Relationship granted"
        );
        self.emit(
            EventType::RelationshipGranted,
            organism.id,
            &input.granted_by,
            json!({
                "relationshipId": relationship.id,
                "userId": relationship.user_id,
                "type": relationship.kind,
                "role": relationship.role,
            }),
        )
        .await;

        Ok(relationship)
    }

    /// Remove a granted relationship. Steward only.
    ///
    /// Returns `None` when no relationship with that id exists on the
    /// organism. Stewardship cannot be revoked.
    pub async fn revoke_relationship(
        &self,
        relationship_id: RelationshipId,
        organism_id: OrganismId,
        revoked_by: &str,
    ) -> KernelResult<Option<Relationship>> {
        let organism = self.require_organism(organism_id).await?;
        self.authorize(revoked_by, &organism, Action::ManageRelationships)
            .await?;

        let Some(relationship) = self
            .ports
            .relationships
            .find_by_organism(organism.id)
            .await?
            .into_iter()
            .find(|r| r.id == relationship_id)
        else {
            return Ok(None);
        };

        if relationship.kind == RelationshipType::Stewardship {
            warn!(organism_id = %organism.id, revoked_by = %revoked_by, "Refusing to revoke stewardship");
            return Err(KernelError::AccessDenied {
                user_id: revoked_by.to_string(),
                action: Action::ManageRelationships,
                organism_id: organism.id,
            });
        }

        if !self.ports.relationships.remove(relationship.id).await? {
            return Ok(None);
        }

        info!(organism_id = %organism.id, user_id = %relationship.user_id, revoked_by = %revoked_by, "Relationship revoked");
        self.emit(
            EventType::RelationshipRevoked,
            organism.id,
            revoked_by,
            json!({
                "relationshipId": relationship.id,
                "userId": relationship.user_id,
                "type": relationship.kind,
            }),
        )
        .await;

        Ok(Some(relationship))
    }

    pub async fn relationships_of(&self, organism_id: OrganismId) -> KernelResult<Vec<Relationship>> {
        Ok(self.ports.relationships.find_by_organism(organism_id).await?)
    }

    /// Every relationship a user holds, across all organisms.
    pub async fn organisms_of_user(&self, user_id: &str) -> KernelResult<Vec<Relationship>> {
        Ok(self.ports.relationships.find_by_user(user_id).await?)
    }

    /// Record that something was observed about an organism.
    ///
    /// Observations change no state; they only produce an
    /// `organism.observed` event carrying `payload`.
    pub async fn record_observation(
        &self,
        organism_id: OrganismId,
        observed_by: &str,
        payload: Value,
    ) -> KernelResult<DomainEvent> {
        let organism = self.require_organism(organism_id).await?;
        self.authorize(observed_by, &organism, Action::RecordObservation)
            .await?;

        debug!(organism_id = %organism.id, observed_by = %observed_by, "Observation recorded");
        Ok(self
            .emit(EventType::OrganismObserved, organism.id, observed_by, payload)
            .await)
    }
}

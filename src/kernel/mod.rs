//! The governance kernel.
//!
//! [`Kernel`] owns no state. It holds handles to the injected ports and
//! runs every operation as: load, check access, validate, write, publish
//! one event. Cloning a kernel is cheap and clones share the same stores.

mod composition;
mod governance;
mod organisms;
mod proposals;

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, warn};

pub use proposals::{AppliedMutation, EvaluationReport, IntegrationOutcome, PolicyResult};

use crate::access::{self, AccessContext, AccessDecision, Action};
use crate::content_types::ContentTypeRegistry;
use crate::error::{KernelError, KernelResult};
use crate::models::*;
use crate::ports::*;

/// Whether the kernel consults access control before mutating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    #[default]
    Enforced,
    /// Skip access checks. Reserved for system-initiated mutations.
    Trusted,
}

/// Handles to every port the kernel drives.
#[derive(Clone)]
pub struct Ports {
    pub organisms: Arc<dyn OrganismStore>,
    pub states: Arc<dyn StateStore>,
    pub compositions: Arc<dyn CompositionStore>,
    pub relationships: Arc<dyn RelationshipStore>,
    pub visibility: Arc<dyn VisibilityStore>,
    pub proposals: Arc<dyn ProposalStore>,
    pub events: Arc<dyn EventPublisher>,
    pub identity: Arc<dyn IdentityClock>,
}

impl Ports {
    /// Wire every port to one store that implements them all.
    pub fn from_store<S>(store: S) -> Self
    where
        S: OrganismStore
            + StateStore
            + CompositionStore
            + RelationshipStore
            + VisibilityStore
            + ProposalStore
            + EventPublisher
            + 'static,
    {
        let store = Arc::new(store);
        Self {
            organisms: store.clone(),
            states: store.clone(),
            compositions: store.clone(),
            relationships: store.clone(),
            visibility: store.clone(),
            proposals: store.clone(),
            events: store,
            identity: Arc::new(SystemIdentity),
        }
    }

    pub fn with_identity(mut self, identity: impl IdentityClock + 'static) -> Self {
        self.identity = Arc::new(identity);
        self
    }

    pub fn with_events(mut self, events: impl EventPublisher + 'static) -> Self {
        self.events = Arc::new(events);
        self
    }
}

#[derive(Clone)]
pub struct Kernel {
    ports: Ports,
    registry: Arc<ContentTypeRegistry>,
    access: AccessMode,
    default_visibility: VisibilityLevel,
}

impl Kernel {
    pub fn new(ports: Ports, registry: ContentTypeRegistry) -> Self {
        Self {
            ports,
            registry: Arc::new(registry),
            access: AccessMode::Enforced,
            default_visibility: VisibilityLevel::Public,
        }
    }

    /// Visibility assumed for organisms that have no visibility record.
    pub fn with_default_visibility(mut self, level: VisibilityLevel) -> Self {
        self.default_visibility = level;
        self
    }

    pub fn with_access_mode(mut self, mode: AccessMode) -> Self {
        self.access = mode;
        self
    }

    /// A handle that skips access checks and shares this kernel's stores.
    pub fn trusted(&self) -> Self {
        self.clone().with_access_mode(AccessMode::Trusted)
    }

    pub fn access_mode(&self) -> AccessMode {
        self.access
    }

    pub fn registry(&self) -> &ContentTypeRegistry {
        &self.registry
    }

    // ============================================================
    // Access control
    // ============================================================

    /// Decide whether `actor_id` may perform `action` on an organism.
    ///
    /// Always evaluates the rules, whatever the access mode.
    pub async fn check_access(
        &self,
        actor_id: &str,
        organism_id: OrganismId,
        action: Action,
    ) -> KernelResult<AccessDecision> {
        let organism = self.require_organism(organism_id).await?;
        let context = self.access_context(actor_id, &organism).await?;
        Ok(access::check_access(actor_id, action, &context))
    }

    /// [`check_access`](Self::check_access) that fails with `AccessDenied`.
    pub async fn check_access_or_deny(
        &self,
        actor_id: &str,
        organism_id: OrganismId,
        action: Action,
    ) -> KernelResult<()> {
        let organism = self.require_organism(organism_id).await?;
        self.authorize_always(actor_id, &organism, action).await
    }

    async fn access_context(
        &self,
        actor_id: &str,
        organism: &Organism,
    ) -> KernelResult<AccessContext> {
        let visibility = self.visibility_level(organism.id).await?;
        let relationships = self
            .ports
            .relationships
            .find_by_user_and_organism(actor_id, organism.id)
            .await?;
        let parent_relationships = match self.ports.compositions.find_parent(organism.id).await? {
            Some(record) => {
                self.ports
                    .relationships
                    .find_by_user_and_organism(actor_id, record.parent_id)
                    .await?
            }
            None => Vec::new(),
        };

        Ok(AccessContext {
            organism: organism.clone(),
            visibility,
            relationships,
            parent_relationships,
        })
    }

    /// Gate a mutation, honouring the access mode.
    pub(crate) async fn authorize(
        &self,
        actor_id: &str,
        organism: &Organism,
        action: Action,
    ) -> KernelResult<()> {
        if self.access == AccessMode::Trusted {
            debug!(actor = %actor_id, organism_id = %organism.id, %action, "Access check skipped (trusted)");
            return Ok(());
        }
        self.authorize_always(actor_id, organism, action).await
    }

    async fn authorize_always(
        &self,
        actor_id: &str,
        organism: &Organism,
        action: Action,
    ) -> KernelResult<()> {
        let context = self.access_context(actor_id, organism).await?;
        let decision = access::check_access(actor_id, action, &context);
        if decision.allowed {
            debug!(actor = %actor_id, organism_id = %organism.id, %action, reason = ?decision.reason, "Access allowed");
            Ok(())
        } else {
            warn!(actor = %actor_id, organism_id = %organism.id, %action, reason = ?decision.reason, "Access denied");
            Err(KernelError::AccessDenied {
                user_id: actor_id.to_string(),
                action,
                organism_id: organism.id,
            })
        }
    }

    // ============================================================
    // Shared helpers
    // ============================================================

    pub(crate) async fn require_organism(&self, id: OrganismId) -> KernelResult<Organism> {
        self.ports
            .organisms
            .find_by_id(id)
            .await?
            .ok_or(KernelError::OrganismNotFound(id))
    }

    pub(crate) async fn require_exists(&self, id: OrganismId) -> KernelResult<()> {
        if self.ports.organisms.exists(id).await? {
            Ok(())
        } else {
            Err(KernelError::OrganismNotFound(id))
        }
    }

    /// Run a payload through its content type's validator.
    pub(crate) fn validate(&self, content_type_id: &str, payload: &Value) -> KernelResult<()> {
        let contract = self.registry.get(content_type_id).ok_or_else(|| {
            KernelError::ContentTypeNotRegistered {
                content_type_id: content_type_id.to_string(),
            }
        })?;

        contract
            .validate(payload)
            .map_err(|issues| KernelError::ValidationFailed {
                content_type_id: content_type_id.to_string(),
                issues,
            })
    }

    pub(crate) async fn visibility_level(&self, organism_id: OrganismId) -> KernelResult<VisibilityLevel> {
        Ok(self
            .ports
            .visibility
            .find_by_organism_id(organism_id)
            .await?
            .map(|r| r.level)
            .unwrap_or(self.default_visibility))
    }

    /// Publish one event. Publication failures are logged, never returned.
    pub(crate) async fn emit(
        &self,
        kind: EventType,
        organism_id: OrganismId,
        actor_id: &str,
        payload: Value,
    ) -> DomainEvent {
        let event = DomainEvent {
            id: self.ports.identity.event_id(),
            kind,
            organism_id,
            actor_id: actor_id.to_string(),
            occurred_at: self.ports.identity.now(),
            payload,
        };

        if let Err(e) = self.ports.events.publish(&event).await {
            error!(event = %kind, organism_id = %organism_id, "Failed to publish event: {:#}", e);
        }

        event
    }
}

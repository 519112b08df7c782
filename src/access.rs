//! Access control decisions.
//!
//! [`check_access`] is a pure function over an [`AccessContext`] snapshot.
//! The kernel gathers the snapshot from its stores and then asks for a
//! decision; nothing here reads or writes a store.

use serde::{Deserialize, Serialize};

use crate::models::{MembershipRole, Organism, Relationship, RelationshipType, VisibilityLevel};

/// Operations that are gated by access control.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    View,
    AppendState,
    Compose,
    Decompose,
    ChangeVisibility,
    ChangeOpenTrunk,
    ManageRelationships,
    OpenProposal,
    IntegrateProposal,
    DeclineProposal,
    RecordObservation,
    Fork,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::AppendState => "append-state",
            Self::Compose => "compose",
            Self::Decompose => "decompose",
            Self::ChangeVisibility => "change-visibility",
            Self::ChangeOpenTrunk => "change-open-trunk",
            Self::ManageRelationships => "manage-relationships",
            Self::OpenProposal => "open-proposal",
            Self::IntegrateProposal => "integrate-proposal",
            Self::DeclineProposal => "decline-proposal",
            Self::RecordObservation => "record-observation",
            Self::Fork => "fork",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only facts needed to decide one request.
#[derive(Debug, Clone)]
pub struct AccessContext {
    pub organism: Organism,
    pub visibility: VisibilityLevel,
    /// The actor's relationships on the organism.
    pub relationships: Vec<Relationship>,
    /// The actor's relationships on the organism's parent, if it has one.
    pub parent_relationships: Vec<Relationship>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl AccessDecision {
    fn allow(reason: &str) -> Self {
        Self {
            allowed: true,
            reason: Some(reason.to_string()),
        }
    }

    fn deny(reason: &str) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.to_string()),
        }
    }
}

/// Decide whether `actor_id` may perform `action` on `context.organism`.
///
/// Open-trunk is a property of the organism, so direct state appends to a
/// closed organism are denied before anything else, stewards included.
/// Past that gate, stewardship on the organism allows everything; the
/// remaining actions fall through to relationship and visibility rules.
pub fn check_access(actor_id: &str, action: Action, context: &AccessContext) -> AccessDecision {
    let organism = &context.organism;

    if action == Action::AppendState && !organism.open_trunk {
        return AccessDecision::deny("organism is not open-trunk; changes require a proposal");
    }

    let held = |kind: RelationshipType| holds(&context.relationships, actor_id, organism, kind);

    if held(RelationshipType::Stewardship) {
        return AccessDecision::allow("steward");
    }

    match action {
        Action::ChangeOpenTrunk | Action::ChangeVisibility | Action::ManageRelationships => {
            AccessDecision::deny("requires stewardship")
        }
        Action::View | Action::OpenProposal | Action::Fork | Action::AppendState => {
            can_view(actor_id, context)
        }
        Action::Compose
        | Action::Decompose
        | Action::IntegrateProposal
        | Action::DeclineProposal => {
            if held(RelationshipType::IntegrationAuthority) {
                AccessDecision::allow("integration authority")
            } else if is_founder(&context.relationships, actor_id) {
                AccessDecision::allow("founding member")
            } else {
                AccessDecision::deny("requires stewardship, integration authority or founding membership")
            }
        }
        Action::RecordObservation => {
            if held(RelationshipType::Membership) || held(RelationshipType::IntegrationAuthority) {
                AccessDecision::allow("instrumentation rights")
            } else {
                AccessDecision::deny("requires membership or integration authority")
            }
        }
    }
}

fn can_view(actor_id: &str, context: &AccessContext) -> AccessDecision {
    match context.visibility {
        VisibilityLevel::Public => AccessDecision::allow("public"),
        VisibilityLevel::Members => {
            let related = |rels: &[Relationship]| rels.iter().any(|r| r.user_id == actor_id);
            if related(&context.relationships) {
                AccessDecision::allow("member of organism")
            } else if related(&context.parent_relationships) {
                AccessDecision::allow("member of enclosing organism")
            } else {
                AccessDecision::deny("visible to members only")
            }
        }
        VisibilityLevel::Private => AccessDecision::deny("private"),
    }
}

fn holds(
    relationships: &[Relationship],
    actor_id: &str,
    organism: &Organism,
    kind: RelationshipType,
) -> bool {
    relationships
        .iter()
        .any(|r| r.kind == kind && r.user_id == actor_id && r.organism_id == organism.id)
}

fn is_founder(relationships: &[Relationship], actor_id: &str) -> bool {
    relationships.iter().any(|r| {
        r.kind == RelationshipType::Membership
            && r.user_id == actor_id
            && r.role == Some(MembershipRole::Founder)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn organism(open_trunk: bool) -> Organism {
        Organism {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            created_by: "steward".to_string(),
            open_trunk,
            forked_from_id: None,
        }
    }

    fn rel(
        organism: &Organism,
        user: &str,
        kind: RelationshipType,
        role: Option<MembershipRole>,
    ) -> Relationship {
        Relationship {
            id: Uuid::new_v4(),
            kind,
            user_id: user.to_string(),
            organism_id: organism.id,
            role,
            created_at: Utc::now(),
        }
    }

    fn context(organism: Organism, visibility: VisibilityLevel, rels: Vec<Relationship>) -> AccessContext {
        AccessContext {
            organism,
            visibility,
            relationships: rels,
            parent_relationships: vec![],
        }
    }

    #[test]
    fn steward_may_do_everything_but_bypass_closed_trunk() {
        let o = organism(false);
        let steward = rel(&o, "s", RelationshipType::Stewardship, None);
        let ctx = context(o, VisibilityLevel::Private, vec![steward]);

        for action in [
            Action::View,
            Action::Compose,
            Action::ChangeOpenTrunk,
            Action::ChangeVisibility,
            Action::DeclineProposal,
            Action::RecordObservation,
        ] {
            assert!(check_access("s", action, &ctx).allowed, "{action}");
        }
        assert!(!check_access("s", Action::AppendState, &ctx).allowed);
    }

    #[test]
    fn stewardship_of_another_user_does_not_leak() {
        let o = organism(false);
        let steward = rel(&o, "s", RelationshipType::Stewardship, None);
        let ctx = context(o, VisibilityLevel::Public, vec![steward]);
        assert!(!check_access("intruder", Action::ChangeOpenTrunk, &ctx).allowed);
        assert!(check_access("intruder", Action::View, &ctx).allowed);
    }

    #[test]
    fn members_visibility_admits_parent_members() {
        let o = organism(true);
        let mut ctx = context(o.clone(), VisibilityLevel::Members, vec![]);
        assert!(!check_access("m", Action::View, &ctx).allowed);

        let parent = organism(false);
        ctx.parent_relationships = vec![rel(&parent, "m", RelationshipType::Membership, None)];
        let decision = check_access("m", Action::View, &ctx);
        assert!(decision.allowed);
        assert_eq!(decision.reason.as_deref(), Some("member of enclosing organism"));
        assert!(check_access("m", Action::AppendState, &ctx).allowed);
    }

    #[test]
    fn integration_needs_authority_or_founder() {
        let o = organism(false);
        let member = rel(&o, "m", RelationshipType::Membership, Some(MembershipRole::Member));
        let founder = rel(&o, "f", RelationshipType::Membership, Some(MembershipRole::Founder));
        let authority = rel(&o, "a", RelationshipType::IntegrationAuthority, None);
        let ctx = context(o, VisibilityLevel::Public, vec![member, founder, authority]);

        assert!(!check_access("m", Action::IntegrateProposal, &ctx).allowed);
        assert!(check_access("f", Action::IntegrateProposal, &ctx).allowed);
        assert!(check_access("a", Action::Compose, &ctx).allowed);
        assert!(check_access("m", Action::RecordObservation, &ctx).allowed);
        assert!(!check_access("nobody", Action::RecordObservation, &ctx).allowed);
    }

    #[test]
    fn private_organisms_are_hidden_from_non_stewards() {
        let o = organism(true);
        let member = rel(&o, "m", RelationshipType::Membership, None);
        let ctx = context(o, VisibilityLevel::Private, vec![member]);
        assert!(!check_access("m", Action::View, &ctx).allowed);
        assert!(!check_access("m", Action::OpenProposal, &ctx).allowed);
    }
}

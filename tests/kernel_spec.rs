use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{json, Value};

use organism_kernel::access::Action;
use organism_kernel::models::*;
use organism_kernel::ports::EventPublisher;
use organism_kernel::*;

/// Declines every proposal. Registered only in tests.
struct Veto;

impl ContentTypeContract for Veto {
    fn id(&self) -> &str {
        "veto"
    }

    fn validate(&self, _payload: &Value) -> Result<(), Vec<ValidationIssue>> {
        Ok(())
    }

    fn evaluate(&self, _proposal: &ProposalView, _policy_payload: &Value) -> Option<Evaluation> {
        Some(Evaluation::decline("vetoed"))
    }
}

struct FailingPublisher;

#[async_trait]
impl EventPublisher for FailingPublisher {
    async fn publish(&self, _event: &DomainEvent) -> anyhow::Result<()> {
        Err(anyhow!("event bus unavailable"))
    }
}

fn registry() -> ContentTypeRegistry {
    let mut registry = ContentTypeRegistry::with_builtins();
    registry.register(Veto);
    registry
}

fn setup() -> (Kernel, MemoryStore) {
    let store = MemoryStore::new();
    let kernel = Kernel::new(Ports::from_store(store.clone()), registry());
    (kernel, store)
}

async fn create(kernel: &Kernel, user: &str, content_type: &str, payload: Value, open_trunk: bool) -> Organism {
    kernel
        .create_organism(CreateOrganismInput {
            content_type_id: content_type.to_string(),
            payload,
            created_by: user.to_string(),
            open_trunk: Some(open_trunk),
        })
        .await
        .expect("Failed to create organism")
        .organism
}

async fn create_text(kernel: &Kernel, user: &str, content: &str, open_trunk: bool) -> Organism {
    create(kernel, user, "text", json!({ "content": content }), open_trunk).await
}

async fn compose(kernel: &Kernel, parent: &Organism, child: &Organism, user: &str) -> KernelResult<CompositionRecord> {
    kernel
        .compose_organism(ComposeInput {
            parent_id: parent.id,
            child_id: child.id,
            composed_by: user.to_string(),
            position: None,
        })
        .await
}

async fn append(kernel: &Kernel, organism: &Organism, user: &str, content: &str) -> KernelResult<OrganismState> {
    kernel
        .append_state(AppendStateInput {
            organism_id: organism.id,
            content_type_id: "text".to_string(),
            payload: json!({ "content": content }),
            appended_by: user.to_string(),
        })
        .await
}

async fn grant(kernel: &Kernel, organism: &Organism, user: &str, kind: RelationshipType, role: Option<MembershipRole>) -> Relationship {
    kernel
        .grant_relationship(GrantRelationshipInput {
            organism_id: organism.id,
            user_id: user.to_string(),
            kind,
            role,
            granted_by: organism.created_by.clone(),
        })
        .await
        .expect("Failed to grant relationship")
}

fn event_types(store: &MemoryStore, organism_id: OrganismId) -> Vec<EventType> {
    store.events_for(organism_id).iter().map(|e| e.kind).collect()
}

mod create_organism {
    use super::*;

    #[tokio::test]
    async fn creates_closed_organism_with_first_state_and_steward() {
        let (kernel, store) = setup();

        let genesis = kernel
            .create_organism(CreateOrganismInput {
                content_type_id: "text".to_string(),
                payload: json!({ "content": "hi" }),
                created_by: "u1".to_string(),
                open_trunk: None,
            })
            .await
            .unwrap();

        assert!(!genesis.organism.open_trunk);
        assert_eq!(genesis.initial_state.sequence_number, 1);
        assert!(genesis.initial_state.parent_state_id.is_none());

        let relationships = kernel.relationships_of(genesis.organism.id).await.unwrap();
        assert_eq!(relationships.len(), 1);
        assert_eq!(relationships[0].kind, RelationshipType::Stewardship);
        assert_eq!(relationships[0].user_id, "u1");

        let current = kernel.current_state(genesis.organism.id).await.unwrap().unwrap();
        assert_eq!(current.id, genesis.initial_state.id);
        assert_eq!(event_types(&store, genesis.organism.id), vec![EventType::OrganismCreated]);
    }

    #[tokio::test]
    async fn rejects_unregistered_content_type() {
        let (kernel, store) = setup();

        let err = kernel
            .create_organism(CreateOrganismInput {
                content_type_id: "poem".to_string(),
                payload: json!({}),
                created_by: "u1".to_string(),
                open_trunk: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, KernelError::ContentTypeNotRegistered { ref content_type_id } if content_type_id == "poem"));
        assert!(store.events().is_empty());
    }

    #[tokio::test]
    async fn rejects_invalid_payload_with_issues() {
        let (kernel, store) = setup();

        let err = kernel
            .create_organism(CreateOrganismInput {
                content_type_id: "text".to_string(),
                payload: json!({ "content": "   " }),
                created_by: "u1".to_string(),
                open_trunk: None,
            })
            .await
            .unwrap_err();

        match err {
            KernelError::ValidationFailed { content_type_id, issues } => {
                assert_eq!(content_type_id, "text");
                assert!(!issues.is_empty());
            }
            other => panic!("expected ValidationFailed, got {:?}", other),
        }
        assert!(store.events().is_empty());
    }
}

mod append_state {
    use super::*;

    #[tokio::test]
    async fn is_denied_on_closed_organism_for_every_actor() {
        let (kernel, _store) = setup();
        let organism = create_text(&kernel, "u1", "draft", false).await;
        grant(&kernel, &organism, "u2", RelationshipType::IntegrationAuthority, None).await;
        grant(&kernel, &organism, "u3", RelationshipType::Membership, Some(MembershipRole::Founder)).await;

        for user in ["u1", "u2", "u3", "stranger"] {
            let err = append(&kernel, &organism, user, "edit").await.unwrap_err();
            assert!(
                matches!(err, KernelError::AccessDenied { action: Action::AppendState, .. }),
                "{} should be denied",
                user
            );
        }

        let history = kernel.state_history(organism.id).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn chains_states_on_open_trunk() {
        let (kernel, store) = setup();
        let organism = create_text(&kernel, "u1", "one", true).await;

        let second = append(&kernel, &organism, "u2", "two").await.unwrap();
        let third = append(&kernel, &organism, "u1", "three").await.unwrap();

        let history = kernel.state_history(organism.id).await.unwrap();
        let sequences: Vec<u64> = history.iter().map(|s| s.sequence_number).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(second.parent_state_id, Some(history[0].id));
        assert!(third.follows(&second));
        assert_eq!(second.created_by, "u2");

        assert_eq!(
            event_types(&store, organism.id),
            vec![EventType::OrganismCreated, EventType::StateAppended, EventType::StateAppended]
        );
    }

    #[tokio::test]
    async fn fails_for_missing_organism() {
        let (kernel, _store) = setup();
        let ghost = Organism {
            id: uuid::Uuid::new_v4(),
            created_at: chrono::Utc::now(),
            created_by: "u1".into(),
            open_trunk: true,
            forked_from_id: None,
        };

        let err = append(&kernel, &ghost, "u1", "boo").await.unwrap_err();
        assert!(matches!(err, KernelError::OrganismNotFound(id) if id == ghost.id));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_keep_sequence_contiguous() {
        let (kernel, _store) = setup();
        let organism = create_text(&kernel, "u1", "seed", true).await;

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let kernel = kernel.clone();
                let organism = organism.clone();
                tokio::spawn(async move { append(&kernel, &organism, "u1", &format!("edit {}", i)).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let history = kernel.state_history(organism.id).await.unwrap();
        let sequences: Vec<u64> = history.iter().map(|s| s.sequence_number).collect();
        assert_eq!(sequences, (1..=7).collect::<Vec<u64>>());
        for pair in history.windows(2) {
            assert!(pair[1].follows(&pair[0]));
        }
    }
}

mod change_open_trunk {
    use super::*;

    #[tokio::test]
    async fn unchanged_value_writes_and_emits_nothing() {
        let (kernel, store) = setup();
        let organism = create_text(&kernel, "u1", "draft", false).await;
        let before = store.events().len();

        let result = kernel.change_open_trunk(organism.id, false, "u1").await.unwrap();

        assert!(!result.open_trunk);
        assert_eq!(store.events().len(), before);
    }

    #[tokio::test]
    async fn steward_can_open_the_trunk() {
        let (kernel, store) = setup();
        let organism = create_text(&kernel, "u1", "draft", false).await;

        let updated = kernel.change_open_trunk(organism.id, true, "u1").await.unwrap();
        assert!(updated.open_trunk);
        assert!(kernel.get_organism(organism.id).await.unwrap().unwrap().open_trunk);
        assert!(event_types(&store, organism.id).contains(&EventType::OpenTrunkChanged));

        append(&kernel, &organism, "u2", "now editable").await.unwrap();
    }

    #[tokio::test]
    async fn non_steward_is_denied() {
        let (kernel, _store) = setup();
        let organism = create_text(&kernel, "u1", "draft", false).await;
        grant(&kernel, &organism, "u2", RelationshipType::IntegrationAuthority, None).await;

        let err = kernel.change_open_trunk(organism.id, true, "u2").await.unwrap_err();
        assert!(matches!(err, KernelError::AccessDenied { action: Action::ChangeOpenTrunk, .. }));
    }
}

mod composition {
    use super::*;

    #[tokio::test]
    async fn children_come_back_in_position_order() {
        let (kernel, store) = setup();
        let parent = create_text(&kernel, "u1", "parent", false).await;
        let a = create_text(&kernel, "u1", "a", false).await;
        let b = create_text(&kernel, "u1", "b", false).await;
        let c = create_text(&kernel, "u1", "c", false).await;

        for (child, position) in [(&a, Some(2)), (&b, None), (&c, Some(1))] {
            kernel
                .compose_organism(ComposeInput {
                    parent_id: parent.id,
                    child_id: child.id,
                    composed_by: "u1".to_string(),
                    position,
                })
                .await
                .unwrap();
        }

        let children: Vec<OrganismId> = kernel
            .query_children(parent.id)
            .await
            .unwrap()
            .iter()
            .map(|r| r.child_id)
            .collect();
        assert_eq!(children, vec![c.id, a.id, b.id]);
        assert_eq!(kernel.query_parent(a.id).await.unwrap().unwrap().parent_id, parent.id);
        assert_eq!(
            event_types(&store, parent.id).iter().filter(|t| **t == EventType::OrganismComposed).count(),
            3
        );
    }

    #[tokio::test]
    async fn rejects_self_composition() {
        let (kernel, _store) = setup();
        let organism = create_text(&kernel, "u1", "solo", false).await;

        let err = compose(&kernel, &organism, &organism, "u1").await.unwrap_err();
        assert!(matches!(err, KernelError::Composition { .. }));
    }

    #[tokio::test]
    async fn self_composition_checks_existence_and_access_first() {
        let (kernel, _store) = setup();
        let organism = create_text(&kernel, "u1", "solo", false).await;

        let err = compose(&kernel, &organism, &organism, "u2").await.unwrap_err();
        assert!(matches!(err, KernelError::AccessDenied { action: Action::Compose, .. }));

        let missing = uuid::Uuid::new_v4();
        let err = kernel
            .compose_organism(ComposeInput {
                parent_id: missing,
                child_id: missing,
                composed_by: "u1".to_string(),
                position: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::OrganismNotFound(id) if id == missing));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_composes_of_one_child_land_once() {
        for _ in 0..20 {
            let (kernel, store) = setup();
            let first = create_text(&kernel, "u1", "first", false).await;
            let second = create_text(&kernel, "u1", "second", false).await;
            let child = create_text(&kernel, "u1", "child", false).await;

            let handles: Vec<_> = [first, second]
                .into_iter()
                .map(|parent| {
                    let kernel = kernel.clone();
                    let child = child.clone();
                    tokio::spawn(async move { compose(&kernel, &parent, &child, "u1").await })
                })
                .collect();
            let mut results = Vec::new();
            for handle in handles {
                results.push(handle.await.unwrap());
            }

            assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
            assert!(results
                .iter()
                .any(|r| matches!(r, Err(KernelError::Composition { .. }))));
            assert_eq!(store.parent_count(child.id), 1);
        }
    }

    #[tokio::test]
    async fn a_child_has_at_most_one_parent() {
        let (kernel, store) = setup();
        let first = create_text(&kernel, "u1", "first", false).await;
        let second = create_text(&kernel, "u1", "second", false).await;
        let child = create_text(&kernel, "u1", "child", false).await;

        compose(&kernel, &first, &child, "u1").await.unwrap();
        let err = compose(&kernel, &second, &child, "u1").await.unwrap_err();

        assert!(matches!(err, KernelError::Composition { .. }));
        assert_eq!(store.parent_count(child.id), 1);
    }

    #[tokio::test]
    async fn rejects_cycles_at_every_depth() {
        let (kernel, _store) = setup();
        let mut chain = Vec::new();
        for i in 0..5 {
            chain.push(create_text(&kernel, "u1", &format!("level {}", i), false).await);
        }
        for pair in chain.windows(2) {
            compose(&kernel, &pair[0], &pair[1], "u1").await.unwrap();
        }

        let root = &chain[0];
        for descendant in &chain[1..] {
            let err = compose(&kernel, descendant, root, "u1").await.unwrap_err();
            assert!(
                matches!(err, KernelError::Composition { .. }),
                "composing root under {} should fail",
                descendant.id
            );
        }
        assert!(kernel.query_parent(root.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reports_a_cycle_already_in_the_store() {
        let (kernel, store) = setup();
        let a = create_text(&kernel, "u1", "a", false).await;
        let b = create_text(&kernel, "u1", "b", false).await;
        let c = create_text(&kernel, "u1", "c", false).await;
        for (parent, child) in [(&a, &b), (&b, &a)] {
            store.force_composition(CompositionRecord {
                parent_id: parent.id,
                child_id: child.id,
                composed_at: chrono::Utc::now(),
                composed_by: "corruption".to_string(),
                position: None,
            });
        }

        let err = compose(&kernel, &a, &c, "u1").await.unwrap_err();
        assert!(matches!(err, KernelError::Composition { .. }));
    }

    #[tokio::test]
    async fn missing_child_is_not_found() {
        let (kernel, _store) = setup();
        let parent = create_text(&kernel, "u1", "parent", false).await;
        let missing = uuid::Uuid::new_v4();

        let err = kernel
            .compose_organism(ComposeInput {
                parent_id: parent.id,
                child_id: missing,
                composed_by: "u1".to_string(),
                position: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::OrganismNotFound(id) if id == missing));
    }

    #[tokio::test]
    async fn stranger_cannot_compose() {
        let (kernel, _store) = setup();
        let parent = create_text(&kernel, "u1", "parent", false).await;
        let child = create_text(&kernel, "u2", "child", false).await;

        let err = compose(&kernel, &parent, &child, "u2").await.unwrap_err();
        assert!(matches!(err, KernelError::AccessDenied { action: Action::Compose, .. }));
    }

    #[tokio::test]
    async fn decompose_removes_exactly_one_edge() {
        let (kernel, store) = setup();
        let parent = create_text(&kernel, "u1", "parent", false).await;
        let child = create_text(&kernel, "u1", "child", false).await;
        compose(&kernel, &parent, &child, "u1").await.unwrap();

        let input = DecomposeInput {
            parent_id: parent.id,
            child_id: child.id,
            decomposed_by: "u1".to_string(),
        };
        kernel.decompose_organism(input.clone()).await.unwrap();
        assert!(kernel.query_parent(child.id).await.unwrap().is_none());
        assert!(event_types(&store, parent.id).contains(&EventType::OrganismDecomposed));

        let err = kernel.decompose_organism(input).await.unwrap_err();
        assert!(matches!(err, KernelError::Composition { .. }));
    }

    #[tokio::test]
    async fn subtree_nests_children_with_current_states() {
        let (kernel, _store) = setup();
        let root = create_text(&kernel, "u1", "root", false).await;
        let child = create_text(&kernel, "u1", "child", true).await;
        let grandchild = create_text(&kernel, "u1", "grandchild", true).await;
        compose(&kernel, &root, &child, "u1").await.unwrap();
        compose(&kernel, &child, &grandchild, "u1").await.unwrap();
        append(&kernel, &grandchild, "u1", "grandchild v2").await.unwrap();

        let tree = kernel.subtree(root.id).await.unwrap();
        assert_eq!(tree.organism.id, root.id);
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].organism.id, child.id);
        let leaf = &tree.children[0].children[0];
        assert_eq!(leaf.organism.id, grandchild.id);
        assert_eq!(leaf.current_state.as_ref().unwrap().sequence_number, 2);

        let rendered = tree_render::render_tree(&tree);
        assert!(rendered.contains("grandchild v2"));
    }
}

mod access_control {
    use super::*;

    #[tokio::test]
    async fn members_visibility_admits_relations_of_the_parent() {
        let (kernel, _store) = setup();
        let parent = create_text(&kernel, "u1", "parent", false).await;
        let child = create_text(&kernel, "u1", "child", false).await;
        compose(&kernel, &parent, &child, "u1").await.unwrap();
        kernel
            .change_visibility(child.id, VisibilityLevel::Members, "u1")
            .await
            .unwrap();
        grant(&kernel, &parent, "member", RelationshipType::Membership, None).await;

        let stranger = kernel.check_access("stranger", child.id, Action::View).await.unwrap();
        assert!(!stranger.allowed);

        let member = kernel.check_access("member", child.id, Action::OpenProposal).await.unwrap();
        assert!(member.allowed);

        let err = kernel
            .open_proposal(child.id, "text", json!({ "content": "let me in" }), "stranger", None)
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::AccessDenied { action: Action::OpenProposal, .. }));
    }

    #[tokio::test]
    async fn private_organisms_are_steward_only() {
        let (kernel, _store) = setup();
        let organism = create_text(&kernel, "u1", "secret", false).await;
        kernel
            .change_visibility(organism.id, VisibilityLevel::Private, "u1")
            .await
            .unwrap();
        grant(&kernel, &organism, "member", RelationshipType::Membership, None).await;

        assert!(kernel.check_access("u1", organism.id, Action::View).await.unwrap().allowed);
        assert!(!kernel.check_access("member", organism.id, Action::View).await.unwrap().allowed);
        assert!(kernel
            .check_access_or_deny("member", organism.id, Action::Fork)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn founders_integrate_but_plain_members_do_not() {
        let (kernel, _store) = setup();
        let organism = create_text(&kernel, "u1", "draft", false).await;
        grant(&kernel, &organism, "founder", RelationshipType::Membership, Some(MembershipRole::Founder)).await;
        grant(&kernel, &organism, "member", RelationshipType::Membership, None).await;

        assert!(kernel
            .check_access("founder", organism.id, Action::IntegrateProposal)
            .await
            .unwrap()
            .allowed);
        assert!(!kernel
            .check_access("member", organism.id, Action::IntegrateProposal)
            .await
            .unwrap()
            .allowed);
        assert!(kernel
            .check_access("member", organism.id, Action::RecordObservation)
            .await
            .unwrap()
            .allowed);
    }

    #[tokio::test]
    async fn trusted_kernel_skips_checks() {
        let (kernel, _store) = setup();
        let organism = create_text(&kernel, "u1", "draft", false).await;

        assert!(kernel.change_open_trunk(organism.id, true, "stranger").await.is_err());

        let trusted = kernel.trusted();
        assert_eq!(trusted.access_mode(), AccessMode::Trusted);
        let updated = trusted.change_open_trunk(organism.id, true, "stranger").await.unwrap();
        assert!(updated.open_trunk);
        assert_eq!(kernel.access_mode(), AccessMode::Enforced);
    }
}

mod proposals {
    use super::*;
    use std::sync::Arc;

    use organism_kernel::ports::{CompositionStore, IntegrateWrite, ProposalStore, ProposalWrite};

    /// Lets a direct compose land just before every integration write.
    struct ComposeFirst {
        store: MemoryStore,
        competing: CompositionRecord,
    }

    #[async_trait]
    impl ProposalStore for ComposeFirst {
        async fn save(&self, proposal: &Proposal) -> anyhow::Result<()> {
            ProposalStore::save(&self.store, proposal).await
        }

        async fn update(&self, id: ProposalId, resolution: &ProposalResolution) -> anyhow::Result<bool> {
            ProposalStore::update(&self.store, id, resolution).await
        }

        async fn integrate(
            &self,
            id: ProposalId,
            resolution: &ProposalResolution,
            write: &ProposalWrite,
        ) -> anyhow::Result<IntegrateWrite> {
            CompositionStore::save(&self.store, &self.competing).await?;
            ProposalStore::integrate(&self.store, id, resolution, write).await
        }

        async fn find_by_id(&self, id: ProposalId) -> anyhow::Result<Option<Proposal>> {
            ProposalStore::find_by_id(&self.store, id).await
        }

        async fn find_by_organism_id(&self, organism_id: OrganismId) -> anyhow::Result<Vec<Proposal>> {
            ProposalStore::find_by_organism_id(&self.store, organism_id).await
        }

        async fn find_open_by_organism_id(&self, organism_id: OrganismId) -> anyhow::Result<Vec<Proposal>> {
            ProposalStore::find_open_by_organism_id(&self.store, organism_id).await
        }
    }

    async fn propose_text(kernel: &Kernel, organism: &Organism, user: &str, content: &str) -> Proposal {
        kernel
            .open_proposal(organism.id, "text", json!({ "content": content }), user, None)
            .await
            .expect("Failed to open proposal")
    }

    async fn attach_policy(kernel: &Kernel, target: &Organism, content_type: &str, payload: Value) -> Organism {
        let policy = create(kernel, &target.created_by, content_type, payload, false).await;
        compose(kernel, target, &policy, &target.created_by).await.unwrap();
        policy
    }

    #[tokio::test]
    async fn opening_validates_the_proposed_payload() {
        let (kernel, _store) = setup();
        let organism = create_text(&kernel, "u1", "draft", false).await;

        let err = kernel
            .open_proposal(organism.id, "text", json!({ "content": "" }), "u2", None)
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::ValidationFailed { .. }));
        assert!(kernel.list_proposals(organism.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn integrating_without_policies_appends_the_state() {
        let (kernel, store) = setup();
        let organism = create_text(&kernel, "u1", "draft", false).await;
        let proposal = propose_text(&kernel, &organism, "u2", "better draft").await;
        assert_eq!(proposal.proposed_content_type_id(), Some("text"));

        let outcome = kernel.integrate_proposal(proposal.id, "u1").await.unwrap();

        match outcome {
            IntegrationOutcome::Integrated { proposal, evaluation, applied } => {
                assert_eq!(proposal.status, ProposalStatus::Integrated);
                assert_eq!(proposal.resolved_by.as_deref(), Some("u1"));
                assert!(evaluation.passed);
                match applied {
                    AppliedMutation::AppendState { state } => {
                        assert_eq!(state.sequence_number, 2);
                        assert_eq!(state.created_by, "u1");
                    }
                    other => panic!("unexpected mutation {:?}", other),
                }
            }
            other => panic!("expected integration, got {:?}", other),
        }

        let current = kernel.current_state(organism.id).await.unwrap().unwrap();
        assert_eq!(current.payload, json!({ "content": "better draft" }));
        assert!(kernel.open_proposals(organism.id).await.unwrap().is_empty());
        let types = event_types(&store, organism.id);
        assert!(types.contains(&EventType::ProposalOpened));
        assert!(types.contains(&EventType::ProposalIntegrated));
    }

    #[tokio::test]
    async fn declining_policy_blocks_and_leaves_everything_unchanged() {
        let (kernel, store) = setup();
        let organism = create_text(&kernel, "u1", "draft", false).await;
        let policy = attach_policy(&kernel, &organism, "veto", json!({})).await;
        let proposal = propose_text(&kernel, &organism, "u2", "sneaky edit").await;

        let outcome = kernel.integrate_proposal(proposal.id, "u1").await.unwrap();

        assert!(!outcome.is_integrated());
        assert!(!outcome.evaluation().passed);
        assert_eq!(outcome.evaluation().blocking().unwrap().policy_organism_id, policy.id);
        assert_eq!(outcome.proposal().status, ProposalStatus::Open);

        let stored = kernel.get_proposal(proposal.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ProposalStatus::Open);
        assert_eq!(kernel.state_history(organism.id).await.unwrap().len(), 1);
        assert!(event_types(&store, organism.id).contains(&EventType::ProposalEvaluationFailed));
        assert!(!event_types(&store, organism.id).contains(&EventType::ProposalIntegrated));
    }

    #[tokio::test]
    async fn grandchild_policies_are_ignored() {
        let (kernel, _store) = setup();
        let organism = create_text(&kernel, "u1", "draft", false).await;
        let section = create_text(&kernel, "u1", "section", false).await;
        compose(&kernel, &organism, &section, "u1").await.unwrap();
        attach_policy(&kernel, &section, "veto", json!({})).await;

        let proposal = propose_text(&kernel, &organism, "u2", "edit").await;
        let report = kernel.evaluate_proposal(&proposal).await.unwrap();
        assert!(report.passed);
        assert!(report.results.is_empty());

        let section_proposal = propose_text(&kernel, &section, "u2", "edit").await;
        assert!(!kernel.evaluate_proposal(&section_proposal).await.unwrap().passed);
    }

    #[tokio::test]
    async fn first_decline_short_circuits() {
        let (kernel, _store) = setup();
        let organism = create_text(&kernel, "u1", "draft", false).await;
        let frozen = attach_policy(&kernel, &organism, "freeze-policy", json!({ "frozen": true, "reason": "release week" })).await;
        attach_policy(&kernel, &organism, "length-policy", json!({ "maxLength": 100 })).await;

        let proposal = propose_text(&kernel, &organism, "u2", "edit").await;
        let report = kernel.evaluate_proposal(&proposal).await.unwrap();

        assert!(!report.passed);
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].policy_organism_id, frozen.id);
        assert_eq!(report.results[0].result.reason.as_deref(), Some("release week"));
    }

    #[tokio::test]
    async fn passing_policies_are_all_recorded() {
        let (kernel, _store) = setup();
        let organism = create_text(&kernel, "u1", "draft", false).await;
        attach_policy(&kernel, &organism, "freeze-policy", json!({ "frozen": false })).await;
        attach_policy(&kernel, &organism, "length-policy", json!({ "maxLength": 10 })).await;

        let short = propose_text(&kernel, &organism, "u2", "short").await;
        let report = kernel.evaluate_proposal(&short).await.unwrap();
        assert!(report.passed);
        assert_eq!(report.results.len(), 2);

        let long = propose_text(&kernel, &organism, "u2", "much too long for the limit").await;
        assert!(!kernel.evaluate_proposal(&long).await.unwrap().passed);
    }

    #[tokio::test]
    async fn kind_policy_governs_structural_proposals() {
        let (kernel, _store) = setup();
        let organism = create_text(&kernel, "u1", "draft", false).await;
        attach_policy(&kernel, &organism, "kind-policy", json!({ "allowedKinds": ["append-state"] })).await;
        let newcomer = create_text(&kernel, "u2", "newcomer", false).await;

        let proposal = kernel
            .open_mutation_proposal(OpenProposalInput {
                organism_id: organism.id,
                mutation: ProposalMutation::Compose { child_id: newcomer.id, position: None },
                proposed_by: "u2".to_string(),
                description: Some("add a section".to_string()),
            })
            .await
            .unwrap();

        let outcome = kernel.integrate_proposal(proposal.id, "u1").await.unwrap();
        assert!(!outcome.is_integrated());
        assert!(kernel.query_parent(newcomer.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn structural_proposals_apply_on_integration() {
        let (kernel, _store) = setup();
        let organism = create_text(&kernel, "u1", "draft", false).await;
        let newcomer = create_text(&kernel, "u2", "newcomer", false).await;

        let compose_proposal = kernel
            .open_mutation_proposal(OpenProposalInput {
                organism_id: organism.id,
                mutation: ProposalMutation::Compose { child_id: newcomer.id, position: Some(0) },
                proposed_by: "u2".to_string(),
                description: None,
            })
            .await
            .unwrap();
        let outcome = kernel.integrate_proposal(compose_proposal.id, "u1").await.unwrap();
        assert!(matches!(outcome, IntegrationOutcome::Integrated { applied: AppliedMutation::Compose { .. }, .. }));
        assert_eq!(kernel.query_parent(newcomer.id).await.unwrap().unwrap().parent_id, organism.id);

        let visibility_proposal = kernel
            .open_mutation_proposal(OpenProposalInput {
                organism_id: organism.id,
                mutation: ProposalMutation::ChangeVisibility { level: VisibilityLevel::Members },
                proposed_by: "u2".to_string(),
                description: None,
            })
            .await
            .unwrap();
        kernel.integrate_proposal(visibility_proposal.id, "u1").await.unwrap();
        assert_eq!(kernel.visibility_of(organism.id).await.unwrap(), VisibilityLevel::Members);

        let decompose_proposal = kernel
            .open_mutation_proposal(OpenProposalInput {
                organism_id: organism.id,
                mutation: ProposalMutation::Decompose { child_id: newcomer.id },
                proposed_by: "u1".to_string(),
                description: None,
            })
            .await
            .unwrap();
        kernel.integrate_proposal(decompose_proposal.id, "u1").await.unwrap();
        assert!(kernel.query_parent(newcomer.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn compose_proposal_for_a_parented_child_fails_preflight() {
        let (kernel, _store) = setup();
        let organism = create_text(&kernel, "u1", "draft", false).await;
        let other = create_text(&kernel, "u1", "other", false).await;
        let child = create_text(&kernel, "u1", "child", false).await;

        let proposal = kernel
            .open_mutation_proposal(OpenProposalInput {
                organism_id: organism.id,
                mutation: ProposalMutation::Compose { child_id: child.id, position: None },
                proposed_by: "u1".to_string(),
                description: None,
            })
            .await
            .unwrap();
        compose(&kernel, &other, &child, "u1").await.unwrap();

        let err = kernel.integrate_proposal(proposal.id, "u1").await.unwrap_err();
        assert!(matches!(err, KernelError::Composition { .. }));
        let stored = kernel.get_proposal(proposal.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ProposalStatus::Open);
    }

    #[tokio::test]
    async fn compose_landing_during_integration_leaves_the_proposal_open() {
        let (kernel, store) = setup();
        let target = create_text(&kernel, "u1", "target", false).await;
        let rival = create_text(&kernel, "u1", "rival", false).await;
        let child = create_text(&kernel, "u1", "child", false).await;

        let mut ports = Ports::from_store(store.clone());
        ports.proposals = Arc::new(ComposeFirst {
            store: store.clone(),
            competing: CompositionRecord {
                parent_id: rival.id,
                child_id: child.id,
                composed_at: chrono::Utc::now(),
                composed_by: "u1".to_string(),
                position: None,
            },
        });
        let kernel = Kernel::new(ports, registry());

        let proposal = kernel
            .open_mutation_proposal(OpenProposalInput {
                organism_id: target.id,
                mutation: ProposalMutation::Compose { child_id: child.id, position: None },
                proposed_by: "u1".to_string(),
                description: None,
            })
            .await
            .unwrap();

        let err = kernel.integrate_proposal(proposal.id, "u1").await.unwrap_err();
        assert!(matches!(err, KernelError::Composition { .. }));

        let stored = kernel.get_proposal(proposal.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ProposalStatus::Open);
        assert!(stored.resolved_at.is_none());
        assert_eq!(kernel.query_parent(child.id).await.unwrap().unwrap().parent_id, rival.id);
        assert_eq!(store.parent_count(child.id), 1);

        let events = event_types(&store, target.id);
        assert!(!events.contains(&EventType::ProposalIntegrated));
        assert!(!events.contains(&EventType::OrganismComposed));
    }

    #[tokio::test]
    async fn integrated_append_publishes_the_state_event() {
        let (kernel, store) = setup();
        let organism = create_text(&kernel, "u1", "draft", false).await;
        let proposal = propose_text(&kernel, &organism, "u2", "edit").await;

        kernel.integrate_proposal(proposal.id, "u1").await.unwrap();

        let events = event_types(&store, organism.id);
        let appended = events.iter().position(|t| *t == EventType::StateAppended).unwrap();
        let integrated = events.iter().position(|t| *t == EventType::ProposalIntegrated).unwrap();
        assert!(appended < integrated);
    }

    #[tokio::test]
    async fn decline_records_reason_and_is_final() {
        let (kernel, store) = setup();
        let organism = create_text(&kernel, "u1", "draft", false).await;
        let proposal = propose_text(&kernel, &organism, "u2", "edit").await;

        let declined = kernel
            .decline_proposal(proposal.id, "u1", Some("off topic".to_string()))
            .await
            .unwrap();
        assert_eq!(declined.status, ProposalStatus::Declined);
        assert_eq!(declined.decline_reason.as_deref(), Some("off topic"));
        assert!(event_types(&store, organism.id).contains(&EventType::ProposalDeclined));

        let err = kernel.integrate_proposal(proposal.id, "u1").await.unwrap_err();
        assert!(matches!(
            err,
            KernelError::ProposalAlreadyResolved { current_status: ProposalStatus::Declined, .. }
        ));
        let err = kernel.decline_proposal(proposal.id, "u1", None).await.unwrap_err();
        assert!(matches!(err, KernelError::ProposalAlreadyResolved { .. }));
    }

    #[tokio::test]
    async fn proposer_without_authority_cannot_integrate() {
        let (kernel, _store) = setup();
        let organism = create_text(&kernel, "u1", "draft", false).await;
        let proposal = propose_text(&kernel, &organism, "u2", "edit").await;

        let err = kernel.integrate_proposal(proposal.id, "u2").await.unwrap_err();
        assert!(matches!(err, KernelError::AccessDenied { action: Action::IntegrateProposal, .. }));

        grant(&kernel, &organism, "u2", RelationshipType::IntegrationAuthority, None).await;
        assert!(kernel.integrate_proposal(proposal.id, "u2").await.unwrap().is_integrated());
    }

    #[tokio::test]
    async fn unknown_proposal_is_not_found() {
        let (kernel, _store) = setup();
        let id = uuid::Uuid::new_v4();

        let err = kernel.integrate_proposal(id, "u1").await.unwrap_err();
        assert!(matches!(err, KernelError::ProposalNotFound(missing) if missing == id));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_integrate_and_decline_resolve_once() {
        let (kernel, _store) = setup();
        let organism = create_text(&kernel, "u1", "draft", false).await;
        let proposal = propose_text(&kernel, &organism, "u2", "race").await;

        let integrating = {
            let kernel = kernel.clone();
            tokio::spawn(async move { kernel.integrate_proposal(proposal.id, "u1").await.map(|_| ()) })
        };
        let declining = {
            let kernel = kernel.clone();
            tokio::spawn(async move { kernel.decline_proposal(proposal.id, "u1", None).await.map(|_| ()) })
        };
        let results = [integrating.await.unwrap(), declining.await.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(KernelError::ProposalAlreadyResolved { .. }))));

        let stored = kernel.get_proposal(proposal.id).await.unwrap().unwrap();
        let states = kernel.state_history(organism.id).await.unwrap().len();
        match stored.status {
            ProposalStatus::Integrated => assert_eq!(states, 2),
            ProposalStatus::Declined => assert_eq!(states, 1),
            ProposalStatus::Open => panic!("proposal left open"),
        }
    }
}

mod governance {
    use super::*;
    use organism_kernel::ports::VisibilityStore;

    #[tokio::test]
    async fn memberships_default_to_member_role() {
        let (kernel, store) = setup();
        let organism = create_text(&kernel, "u1", "draft", false).await;

        let membership = grant(&kernel, &organism, "u2", RelationshipType::Membership, None).await;
        let authority = grant(&kernel, &organism, "u3", RelationshipType::IntegrationAuthority, Some(MembershipRole::Founder)).await;

        assert_eq!(membership.role, Some(MembershipRole::Member));
        assert_eq!(authority.role, None);
        assert_eq!(kernel.organisms_of_user("u2").await.unwrap().len(), 1);
        assert!(event_types(&store, organism.id).contains(&EventType::RelationshipGranted));
    }

    #[tokio::test]
    async fn stewardship_cannot_be_granted_or_revoked() {
        let (kernel, _store) = setup();
        let organism = create_text(&kernel, "u1", "draft", false).await;

        let err = kernel
            .grant_relationship(GrantRelationshipInput {
                organism_id: organism.id,
                user_id: "u2".to_string(),
                kind: RelationshipType::Stewardship,
                role: None,
                granted_by: "u1".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::AccessDenied { action: Action::ManageRelationships, .. }));

        let steward = kernel.relationships_of(organism.id).await.unwrap()[0].clone();
        let err = kernel
            .revoke_relationship(steward.id, organism.id, "u1")
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::AccessDenied { .. }));
    }

    #[tokio::test]
    async fn revoking_removes_the_relationship() {
        let (kernel, store) = setup();
        let organism = create_text(&kernel, "u1", "draft", false).await;
        let membership = grant(&kernel, &organism, "u2", RelationshipType::Membership, None).await;

        let err = kernel
            .revoke_relationship(membership.id, organism.id, "u2")
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::AccessDenied { .. }));

        let revoked = kernel
            .revoke_relationship(membership.id, organism.id, "u1")
            .await
            .unwrap();
        assert_eq!(revoked.map(|r| r.id), Some(membership.id));
        assert!(kernel.organisms_of_user("u2").await.unwrap().is_empty());
        assert!(event_types(&store, organism.id).contains(&EventType::RelationshipRevoked));

        let again = kernel
            .revoke_relationship(membership.id, organism.id, "u1")
            .await
            .unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn visibility_defaults_to_public_and_changes_once() {
        let (kernel, store) = setup();
        let organism = create_text(&kernel, "u1", "draft", false).await;
        assert_eq!(kernel.visibility_of(organism.id).await.unwrap(), VisibilityLevel::Public);

        kernel.change_visibility(organism.id, VisibilityLevel::Members, "u1").await.unwrap();
        kernel.change_visibility(organism.id, VisibilityLevel::Members, "u1").await.unwrap();

        let changes = event_types(&store, organism.id)
            .into_iter()
            .filter(|t| *t == EventType::VisibilityChanged)
            .count();
        assert_eq!(changes, 1);
        assert_eq!(kernel.visibility_of(organism.id).await.unwrap(), VisibilityLevel::Members);

        let err = kernel
            .change_visibility(organism.id, VisibilityLevel::Public, "u2")
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::AccessDenied { action: Action::ChangeVisibility, .. }));
    }

    #[tokio::test]
    async fn setting_the_default_level_changes_nothing() {
        let (kernel, store) = setup();
        let organism = create_text(&kernel, "u1", "draft", false).await;

        let record = kernel
            .change_visibility(organism.id, VisibilityLevel::Public, "u1")
            .await
            .unwrap();
        assert_eq!(record.level, VisibilityLevel::Public);

        assert!(!event_types(&store, organism.id).contains(&EventType::VisibilityChanged));
        assert!(VisibilityStore::find_by_organism_id(&store, organism.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn kernel_default_visibility_applies_without_a_record() {
        let store = MemoryStore::new();
        let kernel = Kernel::new(Ports::from_store(store), registry())
            .with_default_visibility(VisibilityLevel::Private);
        let organism = create_text(&kernel, "u1", "draft", false).await;

        assert_eq!(kernel.visibility_of(organism.id).await.unwrap(), VisibilityLevel::Private);
        assert!(!kernel.check_access("u2", organism.id, Action::View).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn observations_need_instrumentation_rights() {
        let (kernel, store) = setup();
        let organism = create_text(&kernel, "u1", "draft", false).await;
        grant(&kernel, &organism, "sensor", RelationshipType::Membership, None).await;

        let err = kernel
            .record_observation(organism.id, "stranger", json!({ "reads": 1 }))
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::AccessDenied { action: Action::RecordObservation, .. }));

        let event = kernel
            .record_observation(organism.id, "sensor", json!({ "reads": 42 }))
            .await
            .unwrap();
        assert_eq!(event.kind, EventType::OrganismObserved);
        assert_eq!(event.payload, json!({ "reads": 42 }));
        assert!(event_types(&store, organism.id).contains(&EventType::OrganismObserved));
        assert_eq!(kernel.state_history(organism.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fork_seeds_a_new_lineage_from_the_current_state() {
        let (kernel, store) = setup();
        let source = create_text(&kernel, "u1", "v1", true).await;
        append(&kernel, &source, "u1", "v2").await.unwrap();

        let fork = kernel
            .fork_organism(ForkOrganismInput {
                source_id: source.id,
                forked_by: "u2".to_string(),
                open_trunk: None,
            })
            .await
            .unwrap();

        assert_eq!(fork.organism.forked_from_id, Some(source.id));
        assert_eq!(fork.organism.created_by, "u2");
        assert!(!fork.organism.open_trunk);
        assert_eq!(fork.initial_state.sequence_number, 1);
        assert_eq!(fork.initial_state.payload, json!({ "content": "v2" }));
        assert_eq!(fork.stewardship.user_id, "u2");

        assert!(event_types(&store, source.id).contains(&EventType::OrganismForked));
        assert_eq!(event_types(&store, fork.organism.id), vec![EventType::OrganismCreated]);
        assert_eq!(kernel.state_history(source.id).await.unwrap().len(), 2);
    }
}

mod events {
    use super::*;

    #[tokio::test]
    async fn failing_publisher_does_not_fail_mutations() {
        let store = MemoryStore::new();
        let ports = Ports::from_store(store.clone()).with_events(FailingPublisher);
        let kernel = Kernel::new(ports, registry());

        let organism = create_text(&kernel, "u1", "draft", true).await;
        append(&kernel, &organism, "u1", "still works").await.unwrap();

        assert!(store.events().is_empty());
        assert_eq!(kernel.state_history(organism.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn every_event_names_its_actor() {
        let (kernel, store) = setup();
        let organism = create_text(&kernel, "u1", "draft", false).await;
        let proposal = kernel
            .open_proposal(organism.id, "text", json!({ "content": "edit" }), "u2", None)
            .await
            .unwrap();
        kernel.integrate_proposal(proposal.id, "u1").await.unwrap();

        let actors: Vec<(EventType, String)> = store
            .events_for(organism.id)
            .into_iter()
            .map(|e| (e.kind, e.actor_id))
            .collect();
        assert_eq!(
            actors,
            vec![
                (EventType::OrganismCreated, "u1".to_string()),
                (EventType::ProposalOpened, "u2".to_string()),
                (EventType::StateAppended, "u1".to_string()),
                (EventType::ProposalIntegrated, "u1".to_string()),
            ]
        );
    }
}

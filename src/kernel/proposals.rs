use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::organisms::{append_exhausted, MAX_APPEND_ATTEMPTS};
use super::Kernel;
use crate::access::Action;
use crate::content_types::Evaluation;
use crate::error::{KernelError, KernelResult};
use crate::models::*;
use crate::ports::{IntegrateWrite, ProposalWrite};

/// One policy's verdict during an evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyResult {
    pub policy_organism_id: OrganismId,
    pub content_type_id: String,
    pub result: Evaluation,
}

/// Outcome of consulting the policies nested directly in a proposal's target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvaluationReport {
    pub passed: bool,
    /// Verdicts in composition order, ending at the first decline.
    pub results: Vec<PolicyResult>,
}

impl EvaluationReport {
    /// The verdict that failed the evaluation, if any.
    pub fn blocking(&self) -> Option<&PolicyResult> {
        self.results.iter().find(|r| r.result.is_decline())
    }
}

/// The store change made when a proposal was integrated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AppliedMutation {
    AppendState { state: OrganismState },
    Compose { record: CompositionRecord },
    Decompose { record: CompositionRecord },
    ChangeVisibility { record: VisibilityRecord },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IntegrationOutcome {
    /// Policies passed; the proposal is resolved and its mutation applied.
    Integrated {
        proposal: Proposal,
        evaluation: EvaluationReport,
        applied: AppliedMutation,
    },
    /// A policy declined. The proposal is left open and nothing was applied.
    Blocked {
        proposal: Proposal,
        evaluation: EvaluationReport,
    },
}

impl IntegrationOutcome {
    pub fn is_integrated(&self) -> bool {
        matches!(self, Self::Integrated { .. })
    }

    pub fn proposal(&self) -> &Proposal {
        match self {
            Self::Integrated { proposal, .. } | Self::Blocked { proposal, .. } => proposal,
        }
    }

    pub fn evaluation(&self) -> &EvaluationReport {
        match self {
            Self::Integrated { evaluation, .. } | Self::Blocked { evaluation, .. } => evaluation,
        }
    }
}

impl Kernel {
    /// Propose a new state for `organism_id`.
    pub async fn open_proposal(
        &self,
        organism_id: OrganismId,
        proposed_content_type_id: impl Into<String>,
        proposed_payload: Value,
        proposed_by: impl Into<UserId>,
        description: Option<String>,
    ) -> KernelResult<Proposal> {
        self.open_mutation_proposal(OpenProposalInput {
            organism_id,
            mutation: ProposalMutation::AppendState {
                content_type_id: proposed_content_type_id.into(),
                payload: proposed_payload,
            },
            proposed_by: proposed_by.into(),
            description,
        })
        .await
    }

    /// Propose any mutation against `input.organism_id`.
    pub async fn open_mutation_proposal(&self, input: OpenProposalInput) -> KernelResult<Proposal> {
        let organism = self.require_organism(input.organism_id).await?;
        self.authorize(&input.proposed_by, &organism, Action::OpenProposal)
            .await?;

        match &input.mutation {
            ProposalMutation::AppendState {
                content_type_id,
                payload,
            } => self.validate(content_type_id, payload)?,
            ProposalMutation::Compose { child_id, .. } | ProposalMutation::Decompose { child_id } => {
                self.require_exists(*child_id).await?
            }
            ProposalMutation::ChangeVisibility { .. } => {}
        }

        let proposal = Proposal {
            id: self.ports.identity.proposal_id(),
            organism_id: organism.id,
            mutation: input.mutation,
            description: input.description,
            proposed_by: input.proposed_by,
            status: ProposalStatus::Open,
            created_at: self.ports.identity.now(),
            resolved_at: None,
            resolved_by: None,
            decline_reason: None,
        };
        self.ports.proposals.save(&proposal).await?;

        info!(proposal_id = %proposal.id, organism_id = %organism.id, kind = proposal.mutation.kind().as_str(), "Proposal opened");
        self.emit(
            EventType::ProposalOpened,
            organism.id,
            &proposal.proposed_by,
            json!({ "proposalId": proposal.id, "kind": proposal.mutation.kind() }),
        )
        .await;

        Ok(proposal)
    }

    /// Ask each policy nested directly in the target organism for a verdict.
    ///
    /// Only direct children are consulted; a policy nested deeper governs
    /// its own parent, not the target. Children without a current state,
    /// with an unregistered content type, or whose content type does not
    /// evaluate are skipped. The first decline ends the walk.
    pub async fn evaluate_proposal(&self, proposal: &Proposal) -> KernelResult<EvaluationReport> {
        let view = proposal.view();
        let mut results = Vec::new();

        for record in self.ports.compositions.find_children(proposal.organism_id).await? {
            let Some(state) = self
                .ports
                .states
                .find_current_by_organism_id(record.child_id)
                .await?
            else {
                continue;
            };
            let Some(contract) = self.registry.get(&state.content_type_id) else {
                debug!(child_id = %record.child_id, content_type = %state.content_type_id, "Child content type not registered, skipping");
                continue;
            };
            let Some(result) = contract.evaluate(&view, &state.payload) else {
                continue;
            };

            debug!(
                proposal_id = %proposal.id,
                policy_organism_id = %record.child_id,
                decision = ?result.decision,
                "Policy consulted"
            );
            let declined = result.is_decline();
            results.push(PolicyResult {
                policy_organism_id: record.child_id,
                content_type_id: state.content_type_id,
                result,
            });
            if declined {
                return Ok(EvaluationReport {
                    passed: false,
                    results,
                });
            }
        }

        Ok(EvaluationReport {
            passed: true,
            results,
        })
    }

    /// Evaluate and, if every policy passes, apply a proposal.
    ///
    /// A declining policy leaves the proposal open and emits
    /// `proposal.evaluation-failed`; the caller decides whether to decline
    /// it. On success the resolution and the mutation are written together
    /// through the store's open-only integrate, with `integrated_by` as the
    /// actor. If the write no longer applies, the proposal stays open.
    pub async fn integrate_proposal(
        &self,
        proposal_id: ProposalId,
        integrated_by: &str,
    ) -> KernelResult<IntegrationOutcome> {
        let mut proposal = self.require_proposal(proposal_id).await?;
        let organism = self.require_organism(proposal.organism_id).await?;
        self.authorize(integrated_by, &organism, Action::IntegrateProposal)
            .await?;
        ensure_open(&proposal)?;

        let evaluation = self.evaluate_proposal(&proposal).await?;
        if !evaluation.passed {
            let blocking = evaluation.blocking();
            warn!(
                proposal_id = %proposal.id,
                policy_organism_id = ?blocking.map(|b| b.policy_organism_id),
                "Integration blocked by policy"
            );
            self.emit(
                EventType::ProposalEvaluationFailed,
                organism.id,
                integrated_by,
                json!({
                    "proposalId": proposal.id,
                    "policyOrganismId": blocking.map(|b| b.policy_organism_id),
                    "reason": blocking.and_then(|b| b.result.reason.clone()),
                }),
            )
            .await;
            return Ok(IntegrationOutcome::Blocked {
                proposal,
                evaluation,
            });
        }

        self.preflight(&proposal).await?;

        let resolution = ProposalResolution {
            status: ProposalStatus::Integrated,
            resolved_at: self.ports.identity.now(),
            resolved_by: integrated_by.to_string(),
            decline_reason: None,
        };
        let unchanged = match &proposal.mutation {
            ProposalMutation::ChangeVisibility { level } => {
                self.visibility_level(organism.id).await? == *level
            }
            _ => false,
        };
        let applied = self
            .write_integration(&proposal, &resolution, integrated_by)
            .await?;
        resolution.apply_to(&mut proposal);

        if !unchanged {
            self.announce_applied(&applied, integrated_by).await;
        }
        info!(proposal_id = %proposal.id, organism_id = %organism.id, integrated_by = %integrated_by, "Proposal integrated");
        self.emit(
            EventType::ProposalIntegrated,
            organism.id,
            integrated_by,
            json!({ "proposalId": proposal.id, "kind": proposal.mutation.kind() }),
        )
        .await;

        Ok(IntegrationOutcome::Integrated {
            proposal,
            evaluation,
            applied,
        })
    }

    /// Reject an open proposal.
    pub async fn decline_proposal(
        &self,
        proposal_id: ProposalId,
        declined_by: &str,
        reason: Option<String>,
    ) -> KernelResult<Proposal> {
        let mut proposal = self.require_proposal(proposal_id).await?;
        let organism = self.require_organism(proposal.organism_id).await?;
        self.authorize(declined_by, &organism, Action::DeclineProposal)
            .await?;
        ensure_open(&proposal)?;

        let resolution = ProposalResolution {
            status: ProposalStatus::Declined,
            resolved_at: self.ports.identity.now(),
            resolved_by: declined_by.to_string(),
            decline_reason: reason,
        };
        if !self.ports.proposals.update(proposal.id, &resolution).await? {
            return Err(self.resolution_conflict(proposal.id).await);
        }
        resolution.apply_to(&mut proposal);

        info!(proposal_id = %proposal.id, organism_id = %organism.id, declined_by = %declined_by, "Proposal declined");
        self.emit(
            EventType::ProposalDeclined,
            organism.id,
            declined_by,
            json!({ "proposalId": proposal.id, "reason": proposal.decline_reason }),
        )
        .await;

        Ok(proposal)
    }

    pub async fn get_proposal(&self, id: ProposalId) -> KernelResult<Option<Proposal>> {
        Ok(self.ports.proposals.find_by_id(id).await?)
    }

    /// Every proposal against an organism, oldest first.
    pub async fn list_proposals(&self, organism_id: OrganismId) -> KernelResult<Vec<Proposal>> {
        Ok(self.ports.proposals.find_by_organism_id(organism_id).await?)
    }

    pub async fn open_proposals(&self, organism_id: OrganismId) -> KernelResult<Vec<Proposal>> {
        Ok(self
            .ports
            .proposals
            .find_open_by_organism_id(organism_id)
            .await?)
    }

    async fn require_proposal(&self, id: ProposalId) -> KernelResult<Proposal> {
        self.ports
            .proposals
            .find_by_id(id)
            .await?
            .ok_or(KernelError::ProposalNotFound(id))
    }

    /// Explain why an open-only update did not apply.
    async fn resolution_conflict(&self, id: ProposalId) -> KernelError {
        match self.ports.proposals.find_by_id(id).await {
            Ok(Some(current)) => KernelError::ProposalAlreadyResolved {
                proposal_id: id,
                current_status: current.status,
            },
            Ok(None) => KernelError::ProposalNotFound(id),
            Err(e) => KernelError::Storage(e),
        }
    }

    /// Check that the mutation would apply, without writing anything.
    async fn preflight(&self, proposal: &Proposal) -> KernelResult<()> {
        match &proposal.mutation {
            ProposalMutation::AppendState {
                content_type_id,
                payload,
            } => self.validate(content_type_id, payload),
            ProposalMutation::Compose { child_id, .. } => {
                self.ensure_composable(proposal.organism_id, *child_id).await
            }
            ProposalMutation::Decompose { child_id } => self
                .require_edge(proposal.organism_id, *child_id)
                .await
                .map(|_| ()),
            ProposalMutation::ChangeVisibility { .. } => Ok(()),
        }
    }

    /// Resolve the proposal and apply its mutation through one atomic
    /// store call. A refused append is retried with a fresh sequence number;
    /// any other refusal leaves the proposal open and reports why.
    async fn write_integration(
        &self,
        proposal: &Proposal,
        resolution: &ProposalResolution,
        actor: &str,
    ) -> KernelResult<AppliedMutation> {
        for attempt in 1..=MAX_APPEND_ATTEMPTS {
            let (write, applied) = self.prepare_write(proposal, actor).await?;
            match self
                .ports
                .proposals
                .integrate(proposal.id, resolution, &write)
                .await?
            {
                IntegrateWrite::Applied => return Ok(applied),
                IntegrateWrite::NotOpen => return Err(self.resolution_conflict(proposal.id).await),
                IntegrateWrite::Refused => {
                    if let ProposalWrite::AppendState(state) = &write {
                        debug!(
                            proposal_id = %proposal.id,
                            sequence = state.sequence_number,
                            attempt,
                            "Sequence number taken by a concurrent append, retrying"
                        );
                        continue;
                    }
                    warn!(proposal_id = %proposal.id, kind = proposal.mutation.kind().as_str(), "Store refused the integration write, proposal left open");
                    self.preflight(proposal).await?;
                    return Err(KernelError::composition(format!(
                        "{} for proposal {} no longer applies",
                        proposal.mutation.kind().as_str(),
                        proposal.id
                    )));
                }
            }
        }

        Err(append_exhausted(proposal.organism_id))
    }

    /// The store write for a proposal's mutation, and what it will have applied.
    async fn prepare_write(
        &self,
        proposal: &Proposal,
        actor: &str,
    ) -> KernelResult<(ProposalWrite, AppliedMutation)> {
        let target = proposal.organism_id;

        Ok(match &proposal.mutation {
            ProposalMutation::AppendState {
                content_type_id,
                payload,
            } => {
                let state = self
                    .next_state(target, content_type_id.clone(), payload.clone(), actor.to_string())
                    .await?;
                (
                    ProposalWrite::AppendState(state.clone()),
                    AppliedMutation::AppendState { state },
                )
            }
            ProposalMutation::Compose { child_id, position } => {
                let record = CompositionRecord {
                    parent_id: target,
                    child_id: *child_id,
                    composed_at: self.ports.identity.now(),
                    composed_by: actor.to_string(),
                    position: *position,
                };
                (
                    ProposalWrite::Compose(record.clone()),
                    AppliedMutation::Compose { record },
                )
            }
            ProposalMutation::Decompose { child_id } => {
                let record = self.require_edge(target, *child_id).await?;
                (
                    ProposalWrite::Decompose {
                        parent_id: record.parent_id,
                        child_id: record.child_id,
                    },
                    AppliedMutation::Decompose { record },
                )
            }
            ProposalMutation::ChangeVisibility { level } => {
                let record = VisibilityRecord {
                    organism_id: target,
                    level: *level,
                    updated_at: self.ports.identity.now(),
                };
                (
                    ProposalWrite::ChangeVisibility(record.clone()),
                    AppliedMutation::ChangeVisibility { record },
                )
            }
        })
    }

    /// Publish the event the equivalent direct mutation would have published.
    async fn announce_applied(&self, applied: &AppliedMutation, actor: &str) {
        match applied {
            AppliedMutation::AppendState { state } => self.announce_state(state).await,
            AppliedMutation::Compose { record } => self.announce_composed(record).await,
            AppliedMutation::Decompose { record } => self.announce_decomposed(record, actor).await,
            AppliedMutation::ChangeVisibility { record } => {
                self.announce_visibility(record, actor).await
            }
        }
    }
}

fn ensure_open(proposal: &Proposal) -> KernelResult<()> {
    if proposal.is_open() {
        Ok(())
    } else {
        Err(KernelError::ProposalAlreadyResolved {
            proposal_id: proposal.id,
            current_status: proposal.status,
        })
    }
}

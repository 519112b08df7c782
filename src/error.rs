use thiserror::Error;

use crate::access::Action;
use crate::models::{OrganismId, ProposalId, ProposalStatus, UserId};

/// Failures raised by kernel operations.
///
/// Every variant except `Storage` is raised before the failing call touches
/// any store, so a caller that sees one can assume nothing was written.
/// Callers match on the variant to pick a transport status.
#[derive(Error, Debug)]
pub enum KernelError {
    #[error("organism not found: {0}")]
    OrganismNotFound(OrganismId),

    #[error("no state found for organism {organism_id}")]
    StateNotFound { organism_id: OrganismId },

    #[error("access denied: {user_id} may not {action} organism {organism_id}")]
    AccessDenied {
        user_id: UserId,
        action: Action,
        organism_id: OrganismId,
    },

    #[error("payload failed validation for content type {content_type_id}: {}", format_issues(.issues))]
    ValidationFailed {
        content_type_id: String,
        issues: Vec<ValidationIssue>,
    },

    #[error("content type not registered: {content_type_id}")]
    ContentTypeNotRegistered { content_type_id: String },

    #[error("composition error: {message}")]
    Composition { message: String },

    #[error("proposal not found: {0}")]
    ProposalNotFound(ProposalId),

    #[error("proposal {proposal_id} already resolved ({current_status})")]
    ProposalAlreadyResolved {
        proposal_id: ProposalId,
        current_status: ProposalStatus,
    },

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl KernelError {
    pub(crate) fn composition(message: impl Into<String>) -> Self {
        Self::Composition {
            message: message.into(),
        }
    }

    /// Stable tag for mapping errors onto transport codes.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::OrganismNotFound(_) => "organism_not_found",
            Self::StateNotFound { .. } => "state_not_found",
            Self::AccessDenied { .. } => "access_denied",
            Self::ValidationFailed { .. } => "validation_failed",
            Self::ContentTypeNotRegistered { .. } => "content_type_not_registered",
            Self::Composition { .. } => "composition_error",
            Self::ProposalNotFound(_) => "proposal_not_found",
            Self::ProposalAlreadyResolved { .. } => "proposal_already_resolved",
            Self::Storage(_) => "storage_error",
        }
    }
}

/// A single reason a payload was rejected by its content type.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ValidationIssue {
    /// JSON-pointer-ish location of the offending field; empty for the whole payload.
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| {
            if i.path.is_empty() {
                i.message.clone()
            } else {
                format!("{}: {}", i.path, i.message)
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

pub type KernelResult<T> = Result<T, KernelError>;

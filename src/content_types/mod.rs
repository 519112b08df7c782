//! Content type contracts and their registry.
//!
//! The kernel never inspects payloads itself. Each content type is a value
//! implementing [`ContentTypeContract`], registered once at startup and
//! looked up by id on every mutation path.

mod builtin;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use builtin::*;

use crate::error::ValidationIssue;
use crate::models::ProposalView;

/// Behaviour a content type plugs into the kernel.
pub trait ContentTypeContract: Send + Sync {
    /// Registry key, e.g. `"text"`.
    fn id(&self) -> &str;

    /// Check a payload. An empty issue list is never returned as `Err`.
    fn validate(&self, payload: &Value) -> Result<(), Vec<ValidationIssue>>;

    /// Vote on a proposal against the organism this policy is nested in.
    ///
    /// `None` means this content type does not act as a policy. Evaluators
    /// must be free of side effects; the kernel may call them in any order.
    fn evaluate(&self, _proposal: &ProposalView, _policy_payload: &Value) -> Option<Evaluation> {
        None
    }
}

/// A policy's verdict on a proposal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Evaluation {
    pub decision: PolicyDecision,
    pub reason: Option<String>,
}

impl Evaluation {
    pub fn pass() -> Self {
        Self {
            decision: PolicyDecision::Pass,
            reason: None,
        }
    }

    pub fn decline(reason: impl Into<String>) -> Self {
        Self {
            decision: PolicyDecision::Decline,
            reason: Some(reason.into()),
        }
    }

    pub fn is_decline(&self) -> bool {
        self.decision == PolicyDecision::Decline
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecision {
    Pass,
    Decline,
}

/// Content types known to the kernel, keyed by id.
#[derive(Clone, Default)]
pub struct ContentTypeRegistry {
    types: BTreeMap<String, Arc<dyn ContentTypeContract>>,
}

impl ContentTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the built-in content types.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(TextContentType);
        registry.register(FreezePolicy);
        registry.register(LengthPolicy);
        registry.register(KindPolicy);
        registry
    }

    /// Register a contract. A later registration under the same id replaces the earlier one.
    pub fn register(&mut self, contract: impl ContentTypeContract + 'static) {
        self.register_arc(Arc::new(contract));
    }

    pub fn register_arc(&mut self, contract: Arc<dyn ContentTypeContract>) {
        let id = contract.id().to_string();
        if self.types.insert(id.clone(), contract).is_some() {
            tracing::warn!(content_type = %id, "Content type re-registered, replacing contract");
        } else {
            tracing::debug!(content_type = %id, "Content type registered");
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ContentTypeContract>> {
        self.types.get(id).cloned()
    }

    pub fn has(&self, id: &str) -> bool {
        self.types.contains_key(id)
    }

    /// All registered contracts, ordered by id.
    pub fn get_all(&self) -> Vec<Arc<dyn ContentTypeContract>> {
        self.types.values().cloned().collect()
    }
}

impl std::fmt::Debug for ContentTypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentTypeRegistry")
            .field("types", &self.types.keys().collect::<Vec<_>>())
            .finish()
    }
}

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use super::{ContentTypeContract, Evaluation};
use crate::error::ValidationIssue;
use crate::models::{MutationKind, ProposalView};

fn parse<T: for<'de> Deserialize<'de>>(payload: &Value) -> Result<T, Vec<ValidationIssue>> {
    if !payload.is_object() {
        return Err(vec![ValidationIssue::new("", "payload must be an object")]);
    }
    serde_json::from_value(payload.clone()).map_err(|e| vec![ValidationIssue::new("", e.to_string())])
}

/// Read a stored policy payload. One that no longer parses declines.
fn policy_settings<T: for<'de> Deserialize<'de>>(
    policy: &str,
    payload: &Value,
) -> Result<T, Evaluation> {
    serde_json::from_value(payload.clone()).map_err(|e| {
        warn!(policy, "Stored policy payload is malformed, declining: {}", e);
        Evaluation::decline(format!("{} payload is malformed: {}", policy, e))
    })
}

/// Plain text: `{"content": "..."}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextContentType;

#[derive(Deserialize)]
struct TextPayload {
    content: String,
}

impl ContentTypeContract for TextContentType {
    fn id(&self) -> &str {
        "text"
    }

    fn validate(&self, payload: &Value) -> Result<(), Vec<ValidationIssue>> {
        let text: TextPayload = parse(payload)?;
        if text.content.trim().is_empty() {
            return Err(vec![ValidationIssue::new("/content", "must not be empty")]);
        }
        Ok(())
    }
}

/// Declines every proposal while frozen: `{"frozen": true, "reason": "..."}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FreezePolicy;

#[derive(Deserialize)]
struct FreezePayload {
    frozen: bool,
    #[serde(default)]
    reason: Option<String>,
}

impl ContentTypeContract for FreezePolicy {
    fn id(&self) -> &str {
        "freeze-policy"
    }

    fn validate(&self, payload: &Value) -> Result<(), Vec<ValidationIssue>> {
        parse::<FreezePayload>(payload).map(|_| ())
    }

    fn evaluate(&self, _proposal: &ProposalView, policy_payload: &Value) -> Option<Evaluation> {
        let policy: FreezePayload = match policy_settings(self.id(), policy_payload) {
            Ok(policy) => policy,
            Err(verdict) => return Some(verdict),
        };
        Some(if policy.frozen {
            Evaluation::decline(policy.reason.unwrap_or_else(|| "organism is frozen".to_string()))
        } else {
            Evaluation::pass()
        })
    }
}

/// Caps the length of proposed text content: `{"maxLength": 280}`.
///
/// Only append-state proposals carrying a string `content` are measured;
/// everything else passes.
#[derive(Debug, Clone, Copy, Default)]
pub struct LengthPolicy;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LengthPayload {
    max_length: usize,
}

impl ContentTypeContract for LengthPolicy {
    fn id(&self) -> &str {
        "length-policy"
    }

    fn validate(&self, payload: &Value) -> Result<(), Vec<ValidationIssue>> {
        parse::<LengthPayload>(payload).map(|_| ())
    }

    fn evaluate(&self, proposal: &ProposalView, policy_payload: &Value) -> Option<Evaluation> {
        let policy: LengthPayload = match policy_settings(self.id(), policy_payload) {
            Ok(policy) => policy,
            Err(verdict) => return Some(verdict),
        };
        let length = proposal
            .proposed_payload
            .as_ref()
            .and_then(|p| p.get("content"))
            .and_then(Value::as_str)
            .map(|s| s.chars().count());

        Some(match length {
            Some(n) if n > policy.max_length => Evaluation::decline(format!(
                "content is {} characters, limit is {}",
                n, policy.max_length
            )),
            _ => Evaluation::pass(),
        })
    }
}

/// Restricts which mutation kinds may be integrated:
/// `{"allowedKinds": ["append-state"]}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct KindPolicy;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct KindPayload {
    allowed_kinds: Vec<MutationKind>,
}

impl ContentTypeContract for KindPolicy {
    fn id(&self) -> &str {
        "kind-policy"
    }

    fn validate(&self, payload: &Value) -> Result<(), Vec<ValidationIssue>> {
        parse::<KindPayload>(payload).map(|_| ())
    }

    fn evaluate(&self, proposal: &ProposalView, policy_payload: &Value) -> Option<Evaluation> {
        let policy: KindPayload = match policy_settings(self.id(), policy_payload) {
            Ok(policy) => policy,
            Err(verdict) => return Some(verdict),
        };
        Some(if policy.allowed_kinds.contains(&proposal.kind) {
            Evaluation::pass()
        } else {
            Evaluation::decline(format!("{} proposals are not allowed", proposal.kind.as_str()))
        })
    }
}

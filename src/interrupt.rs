//! Order confirmation interrupts
//!
//! `submit_order` pauses the agent until the customer approves or rejects the
//! order. The pause spans HTTP requests, so everything needed to finish the
//! suspended call is captured in a [`PendingInterrupt`] stored with the
//! session and rebuilt on the next request.
//!
//! NONE → AWAITING_CONFIRMATION → APPROVED | REJECTED → NONE

use crate::memory::ToolResponseRecord;
use crate::models::Beverage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::io::Write;

/// Whether a session is waiting on a confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationState {
    None,
    AwaitingConfirmation,
}

/// Decision supplied when resuming a pending interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeDecision {
    Approved,
    Rejected,
}

impl ResumeDecision {
    /// Only an explicit `{"approved": true}` approves; anything else rejects.
    pub fn from_payload(payload: &Value) -> Self {
        match payload.get("approved").and_then(Value::as_bool) {
            Some(true) => ResumeDecision::Approved,
            _ => ResumeDecision::Rejected,
        }
    }
}

impl From<bool> for ResumeDecision {
    fn from(approved: bool) -> Self {
        if approved {
            ResumeDecision::Approved
        } else {
            ResumeDecision::Rejected
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmitStatus {
    OrderSubmitted,
    MakeChanges,
}

/// Result returned to the model for a `submit_order` call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmitResult {
    pub status: SubmitStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SubmitResult {
    pub fn submitted(name: impl Into<String>) -> Self {
        Self {
            status: SubmitStatus::OrderSubmitted,
            name: Some(name.into()),
            message: None,
        }
    }

    pub fn make_changes(message: Option<&str>) -> Self {
        Self {
            status: SubmitStatus::MakeChanges,
            name: None,
            message: message.map(str::to_string),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({ "status": "MAKE_CHANGES" }))
    }
}

/// A suspended `submit_order` call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingInterrupt {
    /// Every `submit_order` call answered by this confirmation. A repeated
    /// call in the same round joins the existing interrupt.
    pub tool_call_ids: Vec<String>,
    pub order_snapshot: Vec<Beverage>,
    pub snapshot_hash: String,
    pub raised_at: DateTime<Utc>,
    /// Responses for the other calls of the interrupted round, replayed to the
    /// model together with the resolution.
    #[serde(default)]
    pub completed_responses: Vec<ToolResponseRecord>,
}

impl PendingInterrupt {
    pub fn new(tool_call_id: impl Into<String>, order: &[Beverage]) -> Self {
        Self {
            tool_call_ids: vec![tool_call_id.into()],
            order_snapshot: order.to_vec(),
            snapshot_hash: order_snapshot_hash(order),
            raised_at: Utc::now(),
            completed_responses: Vec::new(),
        }
    }

    /// Fold a newer raise into this one: the latest snapshot wins and the
    /// call ids accumulate.
    pub fn replace_with(&mut self, newer: PendingInterrupt) {
        for id in newer.tool_call_ids {
            if !self.tool_call_ids.contains(&id) {
                self.tool_call_ids.push(id);
            }
        }
        self.order_snapshot = newer.order_snapshot;
        self.snapshot_hash = newer.snapshot_hash;
        self.raised_at = newer.raised_at;
    }

    /// Re-capture the order shown to the customer alongside the question.
    pub fn refresh_snapshot(&mut self, order: &[Beverage]) {
        self.order_snapshot = order.to_vec();
        self.snapshot_hash = order_snapshot_hash(order);
    }

    /// True when `order` is still the order the customer was asked about.
    pub fn matches_order(&self, order: &[Beverage]) -> bool {
        order_snapshot_hash(order) == self.snapshot_hash
    }

    /// All function responses for the interrupted round, with `result`
    /// answering each suspended `submit_order` call.
    pub fn into_responses(self, result: &SubmitResult) -> Vec<ToolResponseRecord> {
        let value = result.to_value();
        let mut responses = self.completed_responses;
        responses.extend(self.tool_call_ids.into_iter().map(|id| ToolResponseRecord {
            id,
            name: "submit_order".to_string(),
            response: json!({ "output": value.clone() }),
        }));
        responses
    }
}

/// SHA256 over the JSON form of an order.
pub fn order_snapshot_hash(order: &[Beverage]) -> String {
    let mut hasher = Sha256::new();

    if serde_json::to_writer(&mut HashWriter(&mut hasher), order).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn latte() -> Beverage {
        Beverage::new("Latte", vec!["Oat milk".to_string()])
    }

    #[test]
    fn test_only_explicit_approval_approves() {
        assert_eq!(
            ResumeDecision::from_payload(&json!({ "approved": true })),
            ResumeDecision::Approved
        );
        assert_eq!(
            ResumeDecision::from_payload(&json!({ "approved": "yes" })),
            ResumeDecision::Rejected
        );
        assert_eq!(ResumeDecision::from_payload(&json!(null)), ResumeDecision::Rejected);
    }

    #[test]
    fn test_snapshot_hash_tracks_order() {
        let pending = PendingInterrupt::new("call-1", &[latte()]);
        assert!(pending.matches_order(&[latte()]));
        assert!(!pending.matches_order(&[]));
        assert_eq!(pending.snapshot_hash.len(), 64);
    }

    #[test]
    fn test_replace_keeps_single_pending() {
        let mut pending = PendingInterrupt::new("call-1", &[]);
        pending.replace_with(PendingInterrupt::new("call-2", &[latte()]));

        assert_eq!(pending.tool_call_ids, vec!["call-1", "call-2"]);
        assert!(pending.matches_order(&[latte()]));
    }

    #[test]
    fn test_responses_answer_every_call() {
        let mut pending = PendingInterrupt::new("call-1", &[latte()]);
        pending.completed_responses.push(ToolResponseRecord {
            id: "call-0".into(),
            name: "get_order".into(),
            response: json!({ "output": [] }),
        });
        pending.replace_with(PendingInterrupt::new("call-2", &[latte()]));

        let responses = pending.into_responses(&SubmitResult::make_changes(None));
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0].name, "get_order");
        assert_eq!(responses[2].response["output"]["status"], "MAKE_CHANGES");
    }

    #[test]
    fn test_submit_result_wire_form() {
        let value = SubmitResult::submitted("Amazing Aardvark").to_value();
        assert_eq!(value, json!({ "status": "ORDER_SUBMITTED", "name": "Amazing Aardvark" }));
    }
}

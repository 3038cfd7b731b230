//! Per-session agent state
//!
//! The in-progress order plus the flags the client renders. Tools mutate it
//! through the helpers here so the confirmation invariants hold:
//! `last_interrupt` is set iff `ready_for_submission` is, and a submitted
//! order is never also ready for submission.

use crate::interrupt::{ConfirmationState, PendingInterrupt};
use crate::models::Beverage;
use serde::{Deserialize, Serialize};

/// Maximum number of suggestions `suggest_responses` keeps.
pub const MAX_STORED_SUGGESTIONS: usize = 3;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    #[serde(default)]
    pub in_progress_order: Vec<Beverage>,
    #[serde(default)]
    pub suggested_responses: Vec<String>,
    #[serde(default)]
    pub order_submitted: bool,
    #[serde(default)]
    pub ready_for_submission: bool,
    #[serde(default)]
    pub featured_item_name: Option<String>,
    #[serde(default)]
    pub last_interrupt: Option<PendingInterrupt>,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct AgentStatePatch {
    pub in_progress_order: Option<Vec<Beverage>>,
    pub suggested_responses: Option<Vec<String>>,
    pub order_submitted: Option<bool>,
    pub featured_item_name: Option<Option<String>>,
}

impl AgentState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_order(&self) -> &[Beverage] {
        &self.in_progress_order
    }

    pub fn set_order(&mut self, order: Vec<Beverage>) {
        self.in_progress_order = order;
    }

    pub fn patch(&mut self, patch: AgentStatePatch) {
        if let Some(order) = patch.in_progress_order {
            self.in_progress_order = order;
        }
        if let Some(suggestions) = patch.suggested_responses {
            self.set_suggestions(suggestions);
        }
        if let Some(submitted) = patch.order_submitted {
            self.order_submitted = submitted;
            if submitted {
                self.ready_for_submission = false;
            }
        }
        if let Some(featured) = patch.featured_item_name {
            self.featured_item_name = featured;
        }
    }

    /// Store suggestions, keeping the first three. Returns how many were kept.
    pub fn set_suggestions(&mut self, suggestions: Vec<String>) -> usize {
        self.suggested_responses = suggestions
            .into_iter()
            .take(MAX_STORED_SUGGESTIONS)
            .collect();
        self.suggested_responses.len()
    }

    /// Clear the fields that only live for one turn.
    pub fn reset_turn_flags(&mut self) {
        self.suggested_responses.clear();
        self.featured_item_name = None;
        self.order_submitted = false;
    }

    pub fn confirmation(&self) -> ConfirmationState {
        if self.last_interrupt.is_some() {
            ConfirmationState::AwaitingConfirmation
        } else {
            ConfirmationState::None
        }
    }

    /// Enter AWAITING_CONFIRMATION. A second raise while one is outstanding is
    /// folded into the existing interrupt.
    pub fn await_confirmation(&mut self, pending: PendingInterrupt) {
        match self.last_interrupt.as_mut() {
            Some(existing) => existing.replace_with(pending),
            None => self.last_interrupt = Some(pending),
        }
        self.ready_for_submission = true;
        self.order_submitted = false;
    }

    /// Leave AWAITING_CONFIRMATION, handing back the interrupt to resolve.
    pub fn take_interrupt(&mut self) -> Option<PendingInterrupt> {
        self.ready_for_submission = false;
        self.last_interrupt.take()
    }

    /// Record a successful submission: the order is gone and nothing is
    /// pending.
    pub fn mark_submitted(&mut self) {
        self.in_progress_order.clear();
        self.last_interrupt = None;
        self.ready_for_submission = false;
        self.order_submitted = true;
    }

    #[cfg(test)]
    pub(crate) fn invariants_hold(&self) -> bool {
        (!self.order_submitted || !self.ready_for_submission)
            && (self.last_interrupt.is_some() == self.ready_for_submission)
    }
}

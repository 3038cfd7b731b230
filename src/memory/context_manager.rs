//! Context Window Management
//!
//! Selects the slice of history sent to the model on each round. The window
//! always starts on a user turn so a function response is never sent without
//! the call that produced it.

use crate::memory::store::{ConversationHistory, ConversationTurn, TurnPart, TurnRole};
use tracing::debug;

/// Configuration for context window management
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Maximum approximate tokens of history sent to the model
    pub max_context_tokens: usize,
    /// Number of recent turns to consider
    pub preserve_recent_count: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 100_000,
            preserve_recent_count: 40,
        }
    }
}

pub struct ContextManager {
    config: ContextConfig,
}

impl ContextManager {
    pub fn new() -> Self {
        Self {
            config: ContextConfig::default(),
        }
    }

    pub fn with_config(config: ContextConfig) -> Self {
        Self { config }
    }

    fn starts_exchange(turn: &ConversationTurn) -> bool {
        turn.role == TurnRole::User
            && turn
                .parts
                .iter()
                .all(|p| !matches!(p, TurnPart::FunctionResponse(_)))
    }

    /// Prepare turns for the model request, oldest first.
    pub fn prepare_context_for_llm<'a>(
        &self,
        history: &'a ConversationHistory,
    ) -> Vec<&'a ConversationTurn> {
        let turns: Vec<&ConversationTurn> = history.turns().collect();
        let total = turns.len();

        let mut start = total.saturating_sub(self.config.preserve_recent_count);
        let mut tokens: usize = turns[start..].iter().map(|t| t.token_count).sum();

        while start < total && tokens > self.config.max_context_tokens {
            tokens -= turns[start].token_count;
            start += 1;
        }

        // Never cut an exchange in half.
        while start < total && start > 0 && !Self::starts_exchange(turns[start]) {
            start += 1;
        }

        // The current exchange is always sent, even when over budget.
        if let Some(current) = turns.iter().rposition(|t| Self::starts_exchange(t)) {
            start = start.min(current);
        }

        if start > 0 {
            debug!(
                dropped = start,
                kept = total - start,
                "Trimmed history for model context"
            );
        }

        turns[start..].to_vec()
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }
}

impl Default for ContextManager {
    fn default() -> Self {
        Self::new()
    }
}

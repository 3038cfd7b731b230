//! Conversation history storage
//!
//! Stores the turns exchanged with the model, including tool calls and their
//! responses, so a session can be replayed into the next model request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use uuid::Uuid;

/// Author of a turn
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Model,
    Tool,
}

/// A function call emitted by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// The answer fed back to the model for one function call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResponseRecord {
    pub id: String,
    pub name: String,
    pub response: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnPart {
    Text { text: String },
    Media { storage_url: String, mime_type: String },
    FunctionCall(ToolCallRecord),
    FunctionResponse(ToolResponseRecord),
}

impl TurnPart {
    fn approx_tokens(&self) -> usize {
        let len = match self {
            TurnPart::Text { text } => text.len(),
            // Images are billed at a flat rate by the model.
            TurnPart::Media { .. } => 1032,
            TurnPart::FunctionCall(call) => call.name.len() + call.args.to_string().len(),
            TurnPart::FunctionResponse(resp) => resp.name.len() + resp.response.to_string().len(),
        };
        (len + 3) / 4
    }
}

/// A single turn in the conversation history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub turn_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub role: TurnRole,
    pub parts: Vec<TurnPart>,
    /// Approximate token count for context window management
    pub token_count: usize,
}

impl ConversationTurn {
    pub fn new(role: TurnRole, parts: Vec<TurnPart>) -> Self {
        let token_count = parts.iter().map(TurnPart::approx_tokens).sum();

        Self {
            turn_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            role,
            parts,
            token_count,
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(TurnRole::User, vec![TurnPart::Text { text: text.into() }])
    }

    pub fn model_text(text: impl Into<String>) -> Self {
        Self::new(TurnRole::Model, vec![TurnPart::Text { text: text.into() }])
    }

    pub fn tool_responses(responses: Vec<ToolResponseRecord>) -> Self {
        Self::new(
            TurnRole::Tool,
            responses.into_iter().map(TurnPart::FunctionResponse).collect(),
        )
    }

    /// Concatenated text parts
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                TurnPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn function_calls(&self) -> impl Iterator<Item = &ToolCallRecord> {
        self.parts.iter().filter_map(|p| match p {
            TurnPart::FunctionCall(call) => Some(call),
            _ => None,
        })
    }

    pub fn has_function_calls(&self) -> bool {
        self.function_calls().next().is_some()
    }
}

/// Conversation history for a user session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationHistory {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    turns: VecDeque<ConversationTurn>,
    /// Total token count (approximate)
    total_tokens: usize,
}

impl ConversationHistory {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            turns: VecDeque::new(),
            total_tokens: 0,
        }
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.total_tokens += turn.token_count;
        self.turns.push_back(turn);
        self.updated_at = Utc::now();
    }

    /// Iterate over all turns
    pub fn turns(&self) -> impl DoubleEndedIterator<Item = &ConversationTurn> + ExactSizeIterator {
        self.turns.iter()
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.back()
    }

    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Clear history
    pub fn clear(&mut self) {
        self.turns.clear();
        self.total_tokens = 0;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_turn_token_estimate() {
        let turn = ConversationTurn::user_text("I'll take a latte please");
        assert_eq!(turn.role, TurnRole::User);
        assert!(turn.token_count > 0);
        assert_eq!(turn.text(), "I'll take a latte please");
    }

    #[test]
    fn test_history_tracks_tokens() {
        let mut history = ConversationHistory::new("user-1");
        history.push(ConversationTurn::user_text("A mocha"));
        history.push(ConversationTurn::new(
            TurnRole::Model,
            vec![TurnPart::FunctionCall(ToolCallRecord {
                id: "c1".into(),
                name: "add_to_order".into(),
                args: json!({ "drink": "Mocha" }),
            })],
        ));

        assert_eq!(history.len(), 2);
        assert!(history.total_tokens() > 0);
        assert!(history.last().unwrap().has_function_calls());

        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.total_tokens(), 0);
    }

    #[test]
    fn test_part_serialization_is_tagged() {
        let part = TurnPart::Media {
            storage_url: "users/u1/x".into(),
            mime_type: "image/png".into(),
        };
        let value = serde_json::to_value(&part).unwrap();
        assert_eq!(value["type"], "media");

        let back: TurnPart = serde_json::from_value(value).unwrap();
        assert_eq!(back, part);
    }
}

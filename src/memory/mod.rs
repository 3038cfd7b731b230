//! Conversation memory
//!
//! History of model/tool turns per session and the window selection applied
//! before each model request.

pub mod context_manager;
pub mod store;

pub use context_manager::{ContextConfig, ContextManager};
pub use store::{
    ConversationHistory, ConversationTurn, ToolCallRecord, ToolResponseRecord, TurnPart, TurnRole,
};

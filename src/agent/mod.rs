//! Agent orchestration loop
//!
//! One turn: load the session, send history plus the new message to the
//! model, run the tool calls it asks for, repeat until it answers with text
//! (or a submit confirmation pauses the turn), then save the session.
//! Nothing is written to the session store before that final save.

pub mod prompt;

use crate::config::AgentConfig;
use crate::error::OrchestrationError;
use crate::interrupt::{ConfirmationState, ResumeDecision, SubmitResult};
use crate::llm::{Content, ContentPart, ContentRole, FunctionDeclaration, ModelClient, ModelRequest};
use crate::media::{belongs_to, decode_inline, MediaStore};
use crate::memory::{
    ContextConfig, ContextManager, ConversationHistory, ConversationTurn, ToolCallRecord,
    ToolResponseRecord, TurnPart, TurnRole,
};
use crate::menu::image_slug;
use crate::models::{Beverage, Caller, ChatMessage, ChatResponse, MediaInput};
use crate::session::{Session, SessionLocks, SessionStore};
use crate::state::AgentState;
use crate::tools::{tool_catalog, OrderToolSet, ToolOutcome, EMPTY_ORDER_MESSAGE};
use crate::Result;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

const CONFIRM_ORDER_TEXT: &str = "Can you confirm your order please?";
const NOTHING_TO_APPROVE_TEXT: &str = "There is no order waiting for approval right now.";
const FALLBACK_TEXT: &str = "Sorry, I didn't catch that. What can I get for you?";

fn submitted_text(name: &str) -> String {
    format!(
        "Your order has been submitted! Collect it under the name: {}.",
        name
    )
}

/// Main orchestrator that coordinates a conversation turn
pub struct Orchestrator {
    model: Arc<dyn ModelClient>,
    tools: OrderToolSet,
    sessions: Arc<dyn SessionStore>,
    media: Arc<dyn MediaStore>,
    locks: SessionLocks,
    context_manager: ContextManager,
    catalog: Vec<FunctionDeclaration>,
    system_instruction: String,
    config: AgentConfig,
}

/// How a turn is entered.
struct TurnStart {
    allow_tools: bool,
    submitted_name: Option<String>,
}

impl Orchestrator {
    pub fn new(
        model: Arc<dyn ModelClient>,
        tools: OrderToolSet,
        sessions: Arc<dyn SessionStore>,
        media: Arc<dyn MediaStore>,
        config: AgentConfig,
    ) -> Self {
        let context_manager = ContextManager::with_config(ContextConfig {
            preserve_recent_count: config.history_window,
            ..ContextConfig::default()
        });

        Self {
            model,
            tools,
            sessions,
            media,
            locks: SessionLocks::new(),
            context_manager,
            catalog: tool_catalog(),
            system_instruction: prompt::system_instruction(),
            config,
        }
    }

    /// Handle a chat message from the customer.
    pub async fn chat(&self, caller: &Caller, message: ChatMessage) -> Result<ChatResponse> {
        let span = info_span!("session", uid = %caller.session_id);

        async move {
            let _guard = self.locks.acquire(&caller.session_id).await;
            info!("Processing chat message");

            let mut session = self.open_session(&caller.session_id).await?;
            session.state.reset_turn_flags();

            let user_parts = self.user_parts(caller, message).await?;
            if user_parts.is_empty() {
                return Err(OrchestrationError::ValidationError(
                    "Message must contain text or media".to_string(),
                ));
            }

            // A new message while a confirmation is pending counts as "no".
            if session.state.confirmation() == ConfirmationState::AwaitingConfirmation {
                info!("Message received while confirmation pending, treating as rejection");
                let (pending, result) = self
                    .tools
                    .resume_submit(&mut session.state, ResumeDecision::Rejected, caller)
                    .await?;
                session
                    .history
                    .push(ConversationTurn::tool_responses(pending.into_responses(&result)));
            }

            session
                .history
                .push(ConversationTurn::new(TurnRole::User, user_parts));

            self.run_turn(
                session,
                TurnStart {
                    allow_tools: true,
                    submitted_name: None,
                },
            )
            .await
        }
        .instrument(span)
        .await
    }

    /// Resolve a pending order confirmation.
    pub async fn approve_order(&self, caller: &Caller, approved: bool) -> Result<ChatResponse> {
        let span = info_span!("session", uid = %caller.session_id);

        async move {
            let _guard = self.locks.acquire(&caller.session_id).await;
            info!(approved, "Processing order approval");

            let mut session = self.open_session(&caller.session_id).await?;
            session.state.reset_turn_flags();

            if session.state.confirmation() == ConfirmationState::None {
                info!("No confirmation pending");
                return Ok(self.assemble_response(&session.state, NOTHING_TO_APPROVE_TEXT.to_string()));
            }

            let (pending, result) = self
                .tools
                .resume_submit(&mut session.state, ResumeDecision::from(approved), caller)
                .await?;
            session
                .history
                .push(ConversationTurn::tool_responses(pending.into_responses(&result)));

            if session.state.order_submitted {
                // The order is durable now, so the session must not go back
                // to awaiting confirmation even if the model call fails.
                let mut checkpoint = session.clone();
                checkpoint.state.featured_item_name = None;
                self.sessions.save(&mut checkpoint).await?;
            }

            self.run_turn(
                session,
                TurnStart {
                    // submit_order ends the turn: the model only writes text.
                    allow_tools: false,
                    submitted_name: result.name,
                },
            )
            .await
        }
        .instrument(span)
        .await
    }

    /// Delete the session and every media object stored for the caller.
    /// Returns whether there was a session to clear.
    pub async fn clear_session(&self, caller: &Caller) -> Result<bool> {
        let _guard = self.locks.acquire(&caller.session_id).await;

        let existed = self.sessions.clear(&caller.session_id).await?;
        let removed = self.media.delete_owner(&caller.session_id).await?;
        info!(uid = %caller.session_id, existed, media_removed = removed, "Session cleared");
        Ok(existed)
    }

    pub async fn in_progress_order(&self, caller: &Caller) -> Result<Vec<Beverage>> {
        Ok(self
            .sessions
            .load(&caller.session_id)
            .await?
            .map(|s| s.state.in_progress_order)
            .unwrap_or_default())
    }

    /// Remove expired sessions together with their media.
    pub async fn purge_expired_sessions(&self) -> Result<usize> {
        let expired = self.sessions.purge_expired(Utc::now()).await?;
        for session_id in &expired {
            if let Err(error) = self.media.delete_owner(session_id).await {
                warn!(uid = %session_id, "Failed to delete media for expired session: {}", error);
            }
        }
        self.locks.prune().await;

        if !expired.is_empty() {
            info!(count = expired.len(), "Purged expired sessions");
        }
        Ok(expired.len())
    }

    async fn open_session(&self, session_id: &str) -> Result<Session> {
        match self.sessions.load(session_id).await? {
            Some(session) => Ok(session),
            None => {
                debug!("Starting new session");
                self.sessions.create(session_id, AgentState::new()).await
            }
        }
    }

    async fn user_parts(&self, caller: &Caller, message: ChatMessage) -> Result<Vec<TurnPart>> {
        let mut parts = Vec::new();

        if !message.text.trim().is_empty() {
            parts.push(TurnPart::Text { text: message.text });
        }

        match message.media {
            Some(MediaInput::Inline {
                base64_data,
                mime_type,
            }) => {
                if !mime_type.starts_with("image/") {
                    return Err(OrchestrationError::ValidationError(format!(
                        "Unsupported media type: {}",
                        mime_type
                    )));
                }
                let bytes = decode_inline(&base64_data)?;
                let storage_url = self.media.put(&caller.session_id, &mime_type, bytes).await?;
                debug!(storage_url = %storage_url, "Stored uploaded media");
                parts.push(TurnPart::Media {
                    storage_url,
                    mime_type,
                });
            }
            Some(MediaInput::Stored {
                storage_url,
                content_type,
            }) => {
                if !belongs_to(&storage_url, &caller.session_id) {
                    return Err(OrchestrationError::ValidationError(
                        "Media reference does not belong to this user".to_string(),
                    ));
                }
                parts.push(TurnPart::Media {
                    storage_url,
                    mime_type: content_type,
                });
            }
            None => {}
        }

        Ok(parts)
    }

    async fn run_turn(&self, mut session: Session, start: TurnStart) -> Result<ChatResponse> {
        let mut allow_tools = start.allow_tools;
        let mut best_text = String::new();
        let mut rounds = 0;

        loop {
            if rounds >= self.config.max_tool_rounds {
                warn!(rounds, "Tool round limit reached, answering with best text so far");
                if !best_text.is_empty() {
                    session
                        .history
                        .push(ConversationTurn::model_text(best_text.clone()));
                }
                break;
            }
            rounds += 1;

            let request = self.build_request(&session.history, allow_tools).await?;
            let response = tokio::time::timeout(self.config.model_timeout, self.model.generate(&request))
                .await
                .map_err(|_| OrchestrationError::ModelTimeout(self.config.model_timeout))??;

            if !response.text.trim().is_empty() {
                best_text = response.text.clone();
            }

            let calls: Vec<ToolCallRecord> = if allow_tools {
                response
                    .function_calls
                    .into_iter()
                    .map(|call| ToolCallRecord {
                        id: format!("call_{}", Uuid::new_v4().simple()),
                        name: call.name,
                        args: call.args,
                    })
                    .collect()
            } else {
                if !response.function_calls.is_empty() {
                    warn!(
                        ignored = response.function_calls.len(),
                        "Model called tools on a text-only round"
                    );
                }
                Vec::new()
            };

            let mut parts = Vec::new();
            if !response.text.is_empty() {
                parts.push(TurnPart::Text {
                    text: response.text.clone(),
                });
            }
            parts.extend(calls.iter().cloned().map(TurnPart::FunctionCall));
            if !parts.is_empty() {
                session.history.push(ConversationTurn::new(TurnRole::Model, parts));
            }

            if calls.is_empty() {
                break;
            }

            debug!(round = rounds, calls = calls.len(), "Dispatching tool calls");

            let mut responses = Vec::with_capacity(calls.len());
            let mut interrupted = false;
            let mut turn_ending = false;

            for call in &calls {
                let (outcome, ends_turn) = self.tools.execute(&mut session.state, call).await;
                turn_ending |= ends_turn;

                match outcome {
                    ToolOutcome::Interrupted(_) => interrupted = true,
                    other => responses.push(ToolResponseRecord {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        response: other.to_response(),
                    }),
                }
            }

            // A later call in the same round may have emptied the order.
            if interrupted && session.state.get_order().is_empty() {
                warn!("Order emptied after submit_order in the same round, withdrawing confirmation");
                if let Some(mut pending) = session.state.take_interrupt() {
                    pending.completed_responses = responses;
                    responses = pending
                        .into_responses(&SubmitResult::make_changes(Some(EMPTY_ORDER_MESSAGE)));
                }
                interrupted = false;
            }

            if interrupted {
                let order = session.state.in_progress_order.clone();
                if let Some(pending) = session.state.last_interrupt.as_mut() {
                    pending.completed_responses = responses;
                    pending.refresh_snapshot(&order);
                }

                let text = if response.text.trim().is_empty() {
                    CONFIRM_ORDER_TEXT.to_string()
                } else {
                    response.text
                };
                info!(items = order.len(), "Awaiting order confirmation");
                return self.finish(session, text).await;
            }

            session.history.push(ConversationTurn::tool_responses(responses));

            if turn_ending {
                allow_tools = false;
            }
        }

        let text = if !best_text.is_empty() {
            best_text
        } else if let Some(name) = start.submitted_name.as_deref() {
            submitted_text(name)
        } else {
            FALLBACK_TEXT.to_string()
        };

        self.finish(session, text).await
    }

    /// Assemble the response, then persist the session.
    async fn finish(&self, mut session: Session, text: String) -> Result<ChatResponse> {
        let response = self.assemble_response(&session.state, text);

        session.state.featured_item_name = None;
        self.sessions.save(&mut session).await?;

        info!(
            items = response.order.len(),
            ready_for_submission = response.ready_for_submission,
            order_submitted = response.order_submitted,
            "Turn complete"
        );
        Ok(response)
    }

    fn assemble_response(&self, state: &AgentState, text: String) -> ChatResponse {
        let mut response = ChatResponse::new(text);
        if !state.ready_for_submission {
            response = response.with_suggestions(&state.suggested_responses);
        }
        response.ready_for_submission = state.ready_for_submission;
        response.order_submitted = state.order_submitted;
        response.order = state.in_progress_order.clone();
        response.featured_item_image = state.featured_item_name.as_deref().map(|name| {
            format!("{}/{}.png", self.config.menu_image_base_url, image_slug(name))
        });
        response
    }

    async fn build_request(
        &self,
        history: &ConversationHistory,
        allow_tools: bool,
    ) -> Result<ModelRequest> {
        let mut contents: Vec<Content> = Vec::new();

        for turn in self.context_manager.prepare_context_for_llm(history) {
            let role = match turn.role {
                TurnRole::Model => ContentRole::Model,
                TurnRole::User | TurnRole::Tool => ContentRole::User,
            };

            let mut parts = Vec::with_capacity(turn.parts.len());
            for part in &turn.parts {
                match part {
                    TurnPart::Text { text } => parts.push(ContentPart::Text(text.clone())),
                    TurnPart::Media {
                        storage_url,
                        mime_type,
                    } => match self.media.get(storage_url).await? {
                        Some(media) => parts.push(ContentPart::InlineData {
                            mime_type: mime_type.clone(),
                            data: media.to_base64(),
                        }),
                        None => {
                            warn!(storage_url = %storage_url, "Media referenced from history is gone");
                            parts.push(ContentPart::Text("[image no longer available]".to_string()));
                        }
                    },
                    TurnPart::FunctionCall(call) => parts.push(ContentPart::FunctionCall(call.clone())),
                    TurnPart::FunctionResponse(response) => {
                        parts.push(ContentPart::FunctionResponse(response.clone()))
                    }
                }
            }

            if parts.is_empty() {
                continue;
            }

            // Tool responses and the next user message share the user role.
            match contents.last_mut() {
                Some(last) if last.role == role => last.parts.extend(parts),
                _ => contents.push(Content { role, parts }),
            }
        }

        Ok(ModelRequest {
            system_instruction: self.system_instruction.clone(),
            contents,
            tools: self.catalog.clone(),
            allow_tool_calls: allow_tools,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ModelResponse, ScriptedModel};
    use crate::media::InMemoryMediaStore;
    use crate::session::InMemorySessionStore;
    use crate::submission::{InMemorySubmittedOrderStore, SubmittedOrderStore};
    use crate::tools::recommendation::FixedRecommendation;
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        orchestrator: Orchestrator,
        model: Arc<ScriptedModel>,
        sessions: Arc<InMemorySessionStore>,
        submissions: Arc<InMemorySubmittedOrderStore>,
        media: Arc<InMemoryMediaStore>,
        caller: Caller,
    }

    fn harness_with(config: AgentConfig, model: Arc<dyn ModelClient>) -> Harness {
        let sessions = Arc::new(InMemorySessionStore::default());
        let submissions = Arc::new(InMemorySubmittedOrderStore::default());
        let media = Arc::new(InMemoryMediaStore::new());
        let tools = OrderToolSet::new(submissions.clone(), Arc::new(FixedRecommendation::default()));

        Harness {
            orchestrator: Orchestrator::new(model, tools, sessions.clone(), media.clone(), config),
            model: Arc::new(ScriptedModel::new()),
            sessions,
            submissions,
            media,
            caller: Caller::authenticated("user-1"),
        }
    }

    fn harness() -> Harness {
        let model = Arc::new(ScriptedModel::new());
        let mut h = harness_with(AgentConfig::default(), model.clone());
        h.model = model;
        h
    }

    fn order_names(order: &[Beverage]) -> Vec<&str> {
        order.iter().map(|b| b.name.as_str()).collect()
    }

    fn last_function_responses(request: &ModelRequest) -> Vec<ToolResponseRecord> {
        request
            .contents
            .iter()
            .flat_map(|c| c.parts.iter())
            .filter_map(|p| match p {
                ContentPart::FunctionResponse(r) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_latte_order_end_to_end() {
        let h = harness();

        h.model
            .push(ModelResponse::calls(vec![
                ("add_to_order", json!({ "drink": "Latte", "modifiers": ["Oat"] })),
                ("suggest_responses", json!({ "responses": ["Submit order", "Add another drink"] })),
            ]))
            .push(ModelResponse::text("One oat latte coming up. Anything else?"));

        let response = h
            .orchestrator
            .chat(&h.caller, ChatMessage::text("A latte with oat milk please"))
            .await
            .unwrap();
        assert_eq!(response.text, "One oat latte coming up. Anything else?");
        assert_eq!(order_names(&response.order), vec!["Latte"]);
        assert_eq!(response.suggested_responses.len(), 2);
        assert!(!response.ready_for_submission);

        let requests = h.model.requests();
        assert!(requests[0].allow_tool_calls);
        assert!(!requests[1].allow_tool_calls);

        h.model.push(
            ModelResponse::calls(vec![("submit_order", json!({ "readyForSubmission": true }))])
                .with_text("That's one oat latte. Shall I submit it?"),
        );
        let response = h
            .orchestrator
            .chat(&h.caller, ChatMessage::text("That's all"))
            .await
            .unwrap();
        assert!(response.ready_for_submission);
        assert_eq!(response.text, "That's one oat latte. Shall I submit it?");
        assert_eq!(order_names(&response.order), vec!["Latte"]);

        h.model
            .push(ModelResponse::text("Your order is submitted! Collect it under your name."));
        let response = h.orchestrator.approve_order(&h.caller, true).await.unwrap();
        assert!(response.order_submitted);
        assert!(!response.ready_for_submission);
        assert!(response.order.is_empty());

        let approval_request = h.model.requests().last().cloned().unwrap();
        assert!(!approval_request.allow_tool_calls);
        let answered = last_function_responses(&approval_request);
        assert_eq!(answered.last().unwrap().response["output"]["status"], "ORDER_SUBMITTED");

        let stored = h.submissions.list_orders("user-1").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].beverages[0].modifiers, vec!["Oat"]);

        h.model.push(ModelResponse::text("Enjoy!"));
        let response = h
            .orchestrator
            .chat(&h.caller, ChatMessage::text("Thanks"))
            .await
            .unwrap();
        assert!(!response.order_submitted);
        assert!(response.order.is_empty());
    }

    #[tokio::test]
    async fn test_remove_two_identical_espressos() {
        let h = harness();

        h.model
            .push(ModelResponse::calls(vec![
                ("add_to_order", json!({ "drink": "Espresso" })),
                ("add_to_order", json!({ "drink": "Espresso" })),
                ("add_to_order", json!({ "drink": "Latte" })),
            ]))
            .push(ModelResponse::text("Two espressos and a latte."))
            .push(ModelResponse::calls(vec![("get_order", json!({}))]))
            .push(ModelResponse::calls(vec![
                ("remove_item", json!({ "index": 0 })),
                ("remove_item", json!({ "index": 0 })),
            ]))
            .push(ModelResponse::text("Your order has 1 Latte. Anything else?"));

        h.orchestrator
            .chat(&h.caller, ChatMessage::text("Two espressos and a latte"))
            .await
            .unwrap();
        let response = h
            .orchestrator
            .chat(&h.caller, ChatMessage::text("Remove the two espressos"))
            .await
            .unwrap();

        assert_eq!(order_names(&response.order), vec!["Latte"]);
        assert_eq!(h.model.remaining(), 0);
    }

    #[tokio::test]
    async fn test_clear_session_removes_order_and_media() {
        let h = harness();
        h.model
            .push(ModelResponse::calls(vec![("add_to_order", json!({ "drink": "Mocha" }))]))
            .push(ModelResponse::text("Added a mocha."));

        let message = ChatMessage {
            media: Some(MediaInput::Inline {
                base64_data: "aGk=".into(),
                mime_type: "image/png".into(),
            }),
            ..ChatMessage::text("This one please")
        };
        h.orchestrator.chat(&h.caller, message).await.unwrap();
        assert_eq!(h.orchestrator.in_progress_order(&h.caller).await.unwrap().len(), 1);

        let first = &h.model.requests()[0];
        assert!(first.contents[0]
            .parts
            .iter()
            .any(|p| matches!(p, ContentPart::InlineData { .. })));

        assert!(h.orchestrator.clear_session(&h.caller).await.unwrap());
        assert!(!h.orchestrator.clear_session(&h.caller).await.unwrap());

        assert!(h.orchestrator.in_progress_order(&h.caller).await.unwrap().is_empty());
        assert!(!h.sessions.has("user-1").await.unwrap());
        assert_eq!(h.media.delete_owner("user-1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_double_submit_answers_both_calls() {
        let h = harness();
        h.model
            .push(ModelResponse::calls(vec![("add_to_order", json!({ "drink": "Latte" }))]))
            .push(ModelResponse::text("Added."))
            .push(ModelResponse::calls(vec![
                ("submit_order", json!({ "readyForSubmission": true })),
                ("submit_order", json!({ "readyForSubmission": true })),
            ]));

        h.orchestrator.chat(&h.caller, ChatMessage::text("A latte")).await.unwrap();
        let response = h
            .orchestrator
            .chat(&h.caller, ChatMessage::text("Submit it"))
            .await
            .unwrap();
        assert!(response.ready_for_submission);
        assert_eq!(response.text, CONFIRM_ORDER_TEXT);

        let session = h.sessions.load("user-1").await.unwrap().unwrap();
        assert_eq!(session.state.last_interrupt.as_ref().unwrap().tool_call_ids.len(), 2);

        h.model.push(ModelResponse::text(""));
        let response = h.orchestrator.approve_order(&h.caller, true).await.unwrap();
        assert!(response.text.starts_with("Your order has been submitted! Collect it under the name: "));

        let answered = last_function_responses(h.model.requests().last().unwrap());
        let submits: Vec<_> = answered.iter().filter(|r| r.name == "submit_order").collect();
        assert_eq!(submits.len(), 2);
        assert_eq!(h.submissions.list_orders("user-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_order_submit_does_not_interrupt() {
        let h = harness();
        h.model
            .push(ModelResponse::calls(vec![("submit_order", json!({ "readyForSubmission": true }))]))
            .push(ModelResponse::text("Your order is empty. What can I get you?"));

        let response = h
            .orchestrator
            .chat(&h.caller, ChatMessage::text("Submit my order"))
            .await
            .unwrap();
        assert!(!response.ready_for_submission);

        let answered = last_function_responses(&h.model.requests()[1]);
        assert_eq!(answered[0].response["output"]["status"], "MAKE_CHANGES");
        assert!(h.submissions.list_orders("user-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submit_then_clear_in_one_round_withdraws_confirmation() {
        let h = harness();
        h.model
            .push(ModelResponse::calls(vec![("add_to_order", json!({ "drink": "Latte" }))]))
            .push(ModelResponse::text("Added."))
            .push(ModelResponse::calls(vec![
                ("submit_order", json!({ "readyForSubmission": true })),
                ("clear_order", json!({})),
            ]))
            .push(ModelResponse::text("Your order is empty now. What would you like?"));

        h.orchestrator.chat(&h.caller, ChatMessage::text("A latte")).await.unwrap();
        let response = h
            .orchestrator
            .chat(&h.caller, ChatMessage::text("Submit it, actually no, start over"))
            .await
            .unwrap();

        assert!(!response.ready_for_submission);
        assert!(response.order.is_empty());
        assert_eq!(response.text, "Your order is empty now. What would you like?");

        let request = h.model.requests().last().cloned().unwrap();
        assert!(!request.allow_tool_calls);
        let answered = last_function_responses(&request);
        let submit = answered.iter().find(|r| r.name == "submit_order").unwrap();
        assert_eq!(submit.response["output"]["status"], "MAKE_CHANGES");
        assert!(answered.iter().any(|r| r.name == "clear_order"));

        let session = h.sessions.load("user-1").await.unwrap().unwrap();
        assert!(session.state.last_interrupt.is_none());
        assert!(!session.state.ready_for_submission);

        let response = h.orchestrator.approve_order(&h.caller, true).await.unwrap();
        assert_eq!(response.text, NOTHING_TO_APPROVE_TEXT);
        assert!(h.submissions.list_orders("user-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chat_while_pending_rejects_confirmation() {
        let h = harness();
        h.model
            .push(ModelResponse::calls(vec![("add_to_order", json!({ "drink": "Latte" }))]))
            .push(ModelResponse::text("Added."))
            .push(ModelResponse::calls(vec![("submit_order", json!({ "readyForSubmission": true }))]))
            .push(ModelResponse::text("Sure, what would you like to change?"));

        h.orchestrator.chat(&h.caller, ChatMessage::text("A latte")).await.unwrap();
        h.orchestrator.chat(&h.caller, ChatMessage::text("Done")).await.unwrap();
        let response = h
            .orchestrator
            .chat(&h.caller, ChatMessage::text("Wait, make it iced"))
            .await
            .unwrap();

        assert!(!response.ready_for_submission);
        assert_eq!(order_names(&response.order), vec!["Latte"]);

        let request = h.model.requests().last().cloned().unwrap();
        let answered = last_function_responses(&request);
        assert_eq!(answered.last().unwrap().response["output"]["status"], "MAKE_CHANGES");

        let last = request.contents.last().unwrap();
        assert_eq!(last.role, ContentRole::User);
        assert!(matches!(last.parts.last(), Some(ContentPart::Text(t)) if t == "Wait, make it iced"));

        let session = h.sessions.load("user-1").await.unwrap().unwrap();
        assert!(session.state.last_interrupt.is_none());
    }

    #[tokio::test]
    async fn test_rejected_approval_keeps_order() {
        let h = harness();
        h.model
            .push(ModelResponse::calls(vec![("add_to_order", json!({ "drink": "Cortado" }))]))
            .push(ModelResponse::text("Added."))
            .push(ModelResponse::calls(vec![("submit_order", json!({ "readyForSubmission": true }))]))
            .push(ModelResponse::text("Okay, what would you like to change?"));

        h.orchestrator.chat(&h.caller, ChatMessage::text("A cortado")).await.unwrap();
        h.orchestrator.chat(&h.caller, ChatMessage::text("Done")).await.unwrap();
        let response = h.orchestrator.approve_order(&h.caller, false).await.unwrap();

        assert!(!response.order_submitted);
        assert!(!response.ready_for_submission);
        assert_eq!(order_names(&response.order), vec!["Cortado"]);
        assert!(h.submissions.list_orders("user-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_approve_without_pending_skips_model() {
        let h = harness();
        let response = h.orchestrator.approve_order(&h.caller, true).await.unwrap();

        assert_eq!(response.text, NOTHING_TO_APPROVE_TEXT);
        assert!(!response.order_submitted);
        assert!(h.model.requests().is_empty());
    }

    #[tokio::test]
    async fn test_unauthenticated_approval_keeps_pending() {
        let h = harness();
        h.model
            .push(ModelResponse::calls(vec![("add_to_order", json!({ "drink": "Latte" }))]))
            .push(ModelResponse::text("Added."))
            .push(ModelResponse::calls(vec![("submit_order", json!({ "readyForSubmission": true }))]));

        h.orchestrator.chat(&h.caller, ChatMessage::text("A latte")).await.unwrap();
        h.orchestrator.chat(&h.caller, ChatMessage::text("Done")).await.unwrap();

        let anonymous = Caller {
            session_id: "user-1".into(),
            principal_id: None,
        };
        let err = h.orchestrator.approve_order(&anonymous, true).await.unwrap_err();
        assert_eq!(err.status_code(), 401);

        let session = h.sessions.load("user-1").await.unwrap().unwrap();
        assert!(session.state.last_interrupt.is_some());
        assert!(session.state.ready_for_submission);
    }

    #[tokio::test]
    async fn test_model_error_leaves_last_good_state() {
        let h = harness();
        h.model
            .push(ModelResponse::calls(vec![("add_to_order", json!({ "drink": "Latte" }))]))
            .push_error(OrchestrationError::UpstreamModelError("boom".into()));

        let err = h
            .orchestrator
            .chat(&h.caller, ChatMessage::text("A latte"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 502);
        assert!(h.orchestrator.in_progress_order(&h.caller).await.unwrap().is_empty());
    }

    struct SlowModel;

    #[async_trait::async_trait]
    impl ModelClient for SlowModel {
        async fn generate(&self, _request: &ModelRequest) -> Result<ModelResponse> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ModelResponse::text("too late"))
        }
    }

    #[tokio::test]
    async fn test_model_timeout_is_turn_failure() {
        let config = AgentConfig {
            model_timeout: Duration::from_millis(20),
            ..AgentConfig::default()
        };
        let h = harness_with(config, Arc::new(SlowModel));

        let err = h
            .orchestrator
            .chat(&h.caller, ChatMessage::text("Hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::ModelTimeout(_)));
        assert_eq!(err.status_code(), 504);
    }

    #[tokio::test]
    async fn test_round_limit_returns_best_text() {
        let model = Arc::new(ScriptedModel::new());
        let config = AgentConfig {
            max_tool_rounds: 2,
            ..AgentConfig::default()
        };
        let mut h = harness_with(config, model.clone());
        h.model = model;

        for _ in 0..3 {
            h.model.push(
                ModelResponse::calls(vec![("get_order", json!({}))]).with_text("Let me check."),
            );
        }

        let response = h
            .orchestrator
            .chat(&h.caller, ChatMessage::text("What's my order?"))
            .await
            .unwrap();
        assert_eq!(response.text, "Let me check.");
        assert_eq!(h.model.remaining(), 1);
    }

    #[tokio::test]
    async fn test_featured_item_and_suggestion_caps() {
        let h = harness();
        h.model
            .push(ModelResponse::calls(vec![
                ("feature_item", json!({ "itemName": "Chai Latte" })),
                ("suggest_responses", json!({ "responses": ["a", "b", "c", "d", "e"] })),
            ]))
            .push(ModelResponse::text("How about a chai latte?"));

        let response = h
            .orchestrator
            .chat(&h.caller, ChatMessage::text("Something spicy?"))
            .await
            .unwrap();
        assert_eq!(
            response.featured_item_image.as_deref(),
            Some("/images/menu/chai-latte.png")
        );
        assert_eq!(response.suggested_responses, vec!["a", "b", "c"]);

        let session = h.sessions.load("user-1").await.unwrap().unwrap();
        assert!(session.state.featured_item_name.is_none());
    }

    #[tokio::test]
    async fn test_unknown_tool_is_reported_to_model() {
        let h = harness();
        h.model
            .push(ModelResponse::calls(vec![("brew_coffee", json!({}))]))
            .push(ModelResponse::text("Sorry about that."));

        h.orchestrator
            .chat(&h.caller, ChatMessage::text("Brew it"))
            .await
            .unwrap();

        let answered = last_function_responses(&h.model.requests()[1]);
        assert_eq!(answered[0].response["error"]["kind"], "ToolNotFound");
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected() {
        let h = harness();
        let err = h
            .orchestrator
            .chat(&h.caller, ChatMessage::text("   "))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(h.model.requests().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_media_reference_is_rejected() {
        let h = harness();
        let message = ChatMessage {
            media: Some(MediaInput::Stored {
                storage_url: "users/someone-else/abc".into(),
                content_type: "image/png".into(),
            }),
            ..ChatMessage::text("Look")
        };
        assert!(h.orchestrator.chat(&h.caller, message).await.is_err());
    }

    #[tokio::test]
    async fn test_purge_expired_sessions() {
        let sessions = Arc::new(InMemorySessionStore::new(chrono::Duration::seconds(-1)));
        let media = Arc::new(InMemoryMediaStore::new());
        let tools = OrderToolSet::new(
            Arc::new(InMemorySubmittedOrderStore::default()),
            Arc::new(FixedRecommendation::default()),
        );
        let orchestrator = Orchestrator::new(
            Arc::new(ScriptedModel::new()),
            tools,
            sessions.clone(),
            media.clone(),
            AgentConfig::default(),
        );

        sessions.create("user-9", AgentState::new()).await.unwrap();
        media.put("user-9", "image/png", b"x".to_vec()).await.unwrap();

        assert_eq!(orchestrator.purge_expired_sessions().await.unwrap(), 1);
        assert_eq!(media.delete_owner("user-9").await.unwrap(), 0);
    }
}

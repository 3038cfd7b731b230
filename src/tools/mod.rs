//! Order tools
//!
//! The closed set of tools the model may call. Calls arrive as a name plus
//! JSON arguments and are parsed into [`OrderToolCall`] before anything
//! touches the order, so unknown tools and malformed arguments are rejected at
//! the boundary. Every tool validates before it mutates.

pub mod recommendation;

use crate::error::OrchestrationError;
use crate::interrupt::{PendingInterrupt, ResumeDecision, SubmitResult};
use crate::llm::FunctionDeclaration;
use crate::memory::ToolCallRecord;
use crate::menu::{is_on_menu, ALL_BEVERAGES};
use crate::models::{Beverage, Caller};
use crate::state::AgentState;
use crate::submission::{generate_name, SubmittedOrderStore};
use crate::Result;
use recommendation::RecommendationProvider;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

pub const ADD_TO_ORDER: &str = "add_to_order";
pub const UPDATE_ITEM: &str = "update_item";
pub const GET_ORDER: &str = "get_order";
pub const REMOVE_ITEM: &str = "remove_item";
pub const CLEAR_ORDER: &str = "clear_order";
pub const SUBMIT_ORDER: &str = "submit_order";
pub const SUGGEST_RESPONSES: &str = "suggest_responses";
pub const FEATURE_ITEM: &str = "feature_item";
pub const RECOMMENDATION_AGENT: &str = "recommendation_agent";

/// Returned to the model when `submit_order` finds nothing to submit.
pub const EMPTY_ORDER_MESSAGE: &str = "The order is empty. Add at least one drink before submitting.";

#[derive(Debug, Clone, PartialEq)]
pub enum OrderToolCall {
    AddToOrder {
        drink: String,
        modifiers: Vec<String>,
    },
    UpdateItem {
        index: usize,
        drink: String,
        modifiers: Vec<String>,
    },
    GetOrder,
    RemoveItem {
        index: usize,
    },
    ClearOrder,
    SubmitOrder {
        ready_for_submission: bool,
    },
    SuggestResponses {
        responses: Vec<String>,
    },
    FeatureItem {
        item_name: String,
    },
    RecommendationAgent,
}

#[derive(Deserialize)]
struct DrinkArgs {
    drink: String,
    #[serde(default)]
    modifiers: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct UpdateArgs {
    index: Value,
    drink: String,
    #[serde(default)]
    modifiers: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct IndexArgs {
    index: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitArgs {
    #[serde(default = "default_ready")]
    ready_for_submission: bool,
}

fn default_ready() -> bool {
    true
}

#[derive(Deserialize)]
struct SuggestArgs {
    #[serde(default)]
    responses: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeatureArgs {
    item_name: String,
}

fn parse_args<T: for<'de> Deserialize<'de>>(name: &str, args: &Value) -> Result<T> {
    let args = if args.is_null() { json!({}) } else { args.clone() };
    serde_json::from_value(args).map_err(|e| {
        OrchestrationError::InvalidToolInput(format!("Invalid arguments for {}: {}", name, e))
    })
}

/// Indices arrive as integers, integral floats or numeric strings.
fn parse_index(value: &Value) -> Result<usize> {
    let parsed = match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };

    parsed.map(|i| i as usize).ok_or_else(|| {
        OrchestrationError::ValidationError(format!(
            "Index must be a zero-based, non-negative whole number, got {}",
            value
        ))
    })
}

impl OrderToolCall {
    pub fn parse(name: &str, args: &Value) -> Result<Self> {
        let call = match name {
            ADD_TO_ORDER => {
                let a: DrinkArgs = parse_args(name, args)?;
                OrderToolCall::AddToOrder {
                    drink: a.drink,
                    modifiers: a.modifiers.unwrap_or_default(),
                }
            }
            UPDATE_ITEM => {
                let a: UpdateArgs = parse_args(name, args)?;
                OrderToolCall::UpdateItem {
                    index: parse_index(&a.index)?,
                    drink: a.drink,
                    modifiers: a.modifiers.unwrap_or_default(),
                }
            }
            GET_ORDER => OrderToolCall::GetOrder,
            REMOVE_ITEM => {
                let a: IndexArgs = parse_args(name, args)?;
                OrderToolCall::RemoveItem {
                    index: parse_index(&a.index)?,
                }
            }
            CLEAR_ORDER => OrderToolCall::ClearOrder,
            SUBMIT_ORDER => {
                let a: SubmitArgs = parse_args(name, args)?;
                OrderToolCall::SubmitOrder {
                    ready_for_submission: a.ready_for_submission,
                }
            }
            SUGGEST_RESPONSES => {
                let a: SuggestArgs = parse_args(name, args)?;
                OrderToolCall::SuggestResponses {
                    responses: a.responses,
                }
            }
            FEATURE_ITEM => {
                let a: FeatureArgs = parse_args(name, args)?;
                OrderToolCall::FeatureItem {
                    item_name: a.item_name,
                }
            }
            RECOMMENDATION_AGENT => OrderToolCall::RecommendationAgent,
            other => return Err(OrchestrationError::ToolNotFound(other.to_string())),
        };
        Ok(call)
    }

    pub fn name(&self) -> &'static str {
        match self {
            OrderToolCall::AddToOrder { .. } => ADD_TO_ORDER,
            OrderToolCall::UpdateItem { .. } => UPDATE_ITEM,
            OrderToolCall::GetOrder => GET_ORDER,
            OrderToolCall::RemoveItem { .. } => REMOVE_ITEM,
            OrderToolCall::ClearOrder => CLEAR_ORDER,
            OrderToolCall::SubmitOrder { .. } => SUBMIT_ORDER,
            OrderToolCall::SuggestResponses { .. } => SUGGEST_RESPONSES,
            OrderToolCall::FeatureItem { .. } => FEATURE_ITEM,
            OrderToolCall::RecommendationAgent => RECOMMENDATION_AGENT,
        }
    }

    /// After one of these the model gets one more text-only round.
    pub fn is_turn_ending(&self) -> bool {
        matches!(
            self,
            OrderToolCall::AddToOrder { .. }
                | OrderToolCall::UpdateItem { .. }
                | OrderToolCall::RemoveItem { .. }
                | OrderToolCall::ClearOrder
                | OrderToolCall::SubmitOrder { .. }
        )
    }
}

/// Result of running one tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Completed(Value),
    /// A typed failure the model gets to see and react to.
    Failed { kind: &'static str, message: String },
    /// `submit_order` paused the turn; the state is now awaiting confirmation.
    Interrupted(PendingInterrupt),
}

impl ToolOutcome {
    pub fn from_error(error: OrchestrationError) -> Self {
        let kind = match &error {
            OrchestrationError::ValidationError(_) => "ValidationError",
            OrchestrationError::StateError(_) => "StateError",
            OrchestrationError::ToolNotFound(_) => "ToolNotFound",
            OrchestrationError::InvalidToolInput(_) => "InvalidToolInput",
            _ => "ToolError",
        };
        ToolOutcome::Failed {
            kind,
            message: error.to_string(),
        }
    }

    /// Function response payload fed back to the model.
    pub fn to_response(&self) -> Value {
        match self {
            ToolOutcome::Completed(output) => json!({ "output": output }),
            ToolOutcome::Failed { kind, message } => {
                json!({ "error": { "kind": kind, "message": message } })
            }
            ToolOutcome::Interrupted(_) => json!({ "status": "AWAITING_CONFIRMATION" }),
        }
    }
}

fn order_tuples(order: &[Beverage]) -> Value {
    json!(order.iter().map(Beverage::to_tuple).collect::<Vec<_>>())
}

fn ensure_on_menu(drink: &str) -> Result<()> {
    if is_on_menu(drink) {
        Ok(())
    } else {
        Err(OrchestrationError::ValidationError(format!(
            "'{}' is not on the menu",
            drink
        )))
    }
}

fn ensure_index(index: usize, order: &[Beverage]) -> Result<()> {
    if index < order.len() {
        Ok(())
    } else {
        Err(OrchestrationError::ValidationError(format!(
            "Index {} is out of range, the order has {} item(s)",
            index,
            order.len()
        )))
    }
}

/// Function declarations for every order tool.
pub fn tool_catalog() -> Vec<FunctionDeclaration> {
    let drinks: Vec<&str> = ALL_BEVERAGES.iter().copied().collect();
    let modifiers = json!({
        "type": "array",
        "items": { "type": "string" },
        "description": "Modifiers for the drink (optional)."
    });
    let index = |verb: &str| {
        json!({
            "type": "integer",
            "description": format!("The zero-based index of the item to {}.", verb)
        })
    };

    vec![
        FunctionDeclaration {
            name: ADD_TO_ORDER.to_string(),
            description: "Adds a drink to the customer's order with optional modifiers.".to_string(),
            parameters: Some(json!({
                "type": "object",
                "properties": {
                    "drink": { "type": "string", "enum": drinks, "description": "The name of the drink." },
                    "modifiers": modifiers,
                },
                "required": ["drink"]
            })),
        },
        FunctionDeclaration {
            name: UPDATE_ITEM.to_string(),
            description: "Replaces an existing drink in the customer's order with new details and modifiers.".to_string(),
            parameters: Some(json!({
                "type": "object",
                "properties": {
                    "index": index("update"),
                    "drink": { "type": "string", "enum": drinks, "description": "The name of the drink." },
                    "modifiers": modifiers,
                },
                "required": ["index", "drink"]
            })),
        },
        FunctionDeclaration {
            name: GET_ORDER.to_string(),
            description: "Returns the customer's order as a list of [drink, modifiers] pairs. This is the only reliable view of the order.".to_string(),
            parameters: None,
        },
        FunctionDeclaration {
            name: REMOVE_ITEM.to_string(),
            description: "Removes the nth (zero-based) item from the order. Later items shift down by one.".to_string(),
            parameters: Some(json!({
                "type": "object",
                "properties": { "index": index("remove") },
                "required": ["index"]
            })),
        },
        FunctionDeclaration {
            name: CLEAR_ORDER.to_string(),
            description: "Removes all items from the customer's order.".to_string(),
            parameters: None,
        },
        FunctionDeclaration {
            name: SUBMIT_ORDER.to_string(),
            description: "Submits the order. The customer is asked to approve it first. Returns ORDER_SUBMITTED with a collection name once submitted, or MAKE_CHANGES if the customer wants changes.".to_string(),
            parameters: Some(json!({
                "type": "object",
                "properties": {
                    "readyForSubmission": {
                        "type": "boolean",
                        "description": "True when the customer has said they are done ordering."
                    }
                },
                "required": ["readyForSubmission"]
            })),
        },
        FunctionDeclaration {
            name: SUGGEST_RESPONSES.to_string(),
            description: "Short replies shown on screen that the customer can tap to answer. At most 3 are kept.".to_string(),
            parameters: Some(json!({
                "type": "object",
                "properties": {
                    "responses": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Replies to show. Short and concise; can be empty."
                    }
                },
                "required": ["responses"]
            })),
        },
        FunctionDeclaration {
            name: FEATURE_ITEM.to_string(),
            description: "Shows a picture of a drink from the menu next to the reply.".to_string(),
            parameters: Some(json!({
                "type": "object",
                "properties": {
                    "itemName": { "type": "string", "enum": drinks, "description": "The drink to feature." }
                },
                "required": ["itemName"]
            })),
        },
        FunctionDeclaration {
            name: RECOMMENDATION_AGENT.to_string(),
            description: "Gets the barista's current drink recommendation.".to_string(),
            parameters: None,
        },
    ]
}

/// Executes order tools against a session's state.
pub struct OrderToolSet {
    submissions: Arc<dyn SubmittedOrderStore>,
    recommendations: Arc<dyn RecommendationProvider>,
}

impl OrderToolSet {
    pub fn new(
        submissions: Arc<dyn SubmittedOrderStore>,
        recommendations: Arc<dyn RecommendationProvider>,
    ) -> Self {
        Self {
            submissions,
            recommendations,
        }
    }

    /// Parse and run a raw call from the model. The flag is true when the
    /// call was a turn-ending tool; rejected calls never end the turn.
    pub async fn execute(
        &self,
        state: &mut AgentState,
        call: &ToolCallRecord,
    ) -> (ToolOutcome, bool) {
        match OrderToolCall::parse(&call.name, &call.args) {
            Ok(parsed) => {
                let turn_ending = parsed.is_turn_ending();
                (self.dispatch(state, &call.id, parsed).await, turn_ending)
            }
            Err(error) => {
                warn!(tool = %call.name, "Rejected tool call: {}", error);
                (ToolOutcome::from_error(error), false)
            }
        }
    }

    pub async fn dispatch(
        &self,
        state: &mut AgentState,
        call_id: &str,
        call: OrderToolCall,
    ) -> ToolOutcome {
        let result = match call {
            OrderToolCall::SubmitOrder {
                ready_for_submission,
            } => return Self::submit_order(state, call_id, ready_for_submission),
            OrderToolCall::AddToOrder { drink, modifiers } => {
                Self::add_to_order(state, drink, modifiers)
            }
            OrderToolCall::UpdateItem {
                index,
                drink,
                modifiers,
            } => Self::update_item(state, index, drink, modifiers),
            OrderToolCall::GetOrder => {
                info!(tool = GET_ORDER, items = state.get_order().len(), "Reading order");
                Ok(order_tuples(state.get_order()))
            }
            OrderToolCall::RemoveItem { index } => Self::remove_item(state, index),
            OrderToolCall::ClearOrder => {
                info!(tool = CLEAR_ORDER, "Clearing order");
                state.set_order(Vec::new());
                Ok(json!(state.get_order().is_empty()))
            }
            OrderToolCall::SuggestResponses { responses } => {
                let kept = state.set_suggestions(responses);
                info!(tool = SUGGEST_RESPONSES, kept, "Stored suggested responses");
                Ok(json!(kept))
            }
            OrderToolCall::FeatureItem { item_name } => Ok(Self::feature_item(state, item_name)),
            OrderToolCall::RecommendationAgent => {
                let recommendation = self.recommendations.recommend().await;
                Ok(json!({
                    "name": recommendation.name,
                    "modifiers": recommendation.modifiers,
                }))
            }
        };

        match result {
            Ok(output) => ToolOutcome::Completed(output),
            Err(error) => {
                warn!("Tool call failed: {}", error);
                ToolOutcome::from_error(error)
            }
        }
    }

    fn add_to_order(state: &mut AgentState, drink: String, modifiers: Vec<String>) -> Result<Value> {
        ensure_on_menu(&drink)?;

        let beverage = Beverage::new(drink, modifiers);
        info!(tool = ADD_TO_ORDER, beverage = %beverage, "Adding drink");

        state.in_progress_order.push(beverage);
        Ok(json!({
            "orderSize": state.get_order().len(),
            "order": order_tuples(state.get_order()),
        }))
    }

    fn update_item(
        state: &mut AgentState,
        index: usize,
        drink: String,
        modifiers: Vec<String>,
    ) -> Result<Value> {
        ensure_index(index, state.get_order())?;
        ensure_on_menu(&drink)?;

        let beverage = Beverage::new(drink, modifiers);
        info!(tool = UPDATE_ITEM, index, beverage = %beverage, "Updating drink");

        let tuple = beverage.to_tuple();
        state.in_progress_order[index] = beverage;
        Ok(json!(tuple))
    }

    fn remove_item(state: &mut AgentState, index: usize) -> Result<Value> {
        ensure_index(index, state.get_order())?;

        let removed = state.in_progress_order.remove(index);
        info!(tool = REMOVE_ITEM, index, beverage = %removed, "Removed drink");
        Ok(json!(removed.to_tuple()))
    }

    fn feature_item(state: &mut AgentState, item_name: String) -> Value {
        if is_on_menu(&item_name) {
            info!(tool = FEATURE_ITEM, item = %item_name, "Featuring item");
            state.featured_item_name = Some(item_name.clone());
            json!({ "itemFeatured": item_name, "success": true })
        } else {
            json!({
                "itemFeatured": item_name,
                "success": false,
                "error": format!("'{}' is not on the menu", item_name),
            })
        }
    }

    fn submit_order(state: &mut AgentState, call_id: &str, ready_for_submission: bool) -> ToolOutcome {
        if !ready_for_submission {
            info!(tool = SUBMIT_ORDER, "Customer is not ready to submit");
            return ToolOutcome::Completed(
                SubmitResult::make_changes(Some(
                    "The customer has not finished ordering. Ask if they want anything else before submitting.",
                ))
                .to_value(),
            );
        }

        if state.get_order().is_empty() {
            info!(tool = SUBMIT_ORDER, "Refusing to submit an empty order");
            return ToolOutcome::Completed(
                SubmitResult::make_changes(Some(EMPTY_ORDER_MESSAGE))
                .to_value(),
            );
        }

        info!(tool = SUBMIT_ORDER, items = state.get_order().len(), "Asking customer to confirm order");
        let pending = PendingInterrupt::new(call_id, state.get_order());
        state.await_confirmation(pending.clone());
        ToolOutcome::Interrupted(pending)
    }

    /// Resolve the outstanding confirmation. Returns the resolved interrupt
    /// together with the result that answers its `submit_order` calls.
    ///
    /// An approval on a changed order is treated as a rejection. An empty
    /// order, a missing principal or a storage failure is fatal and leaves
    /// `state` untouched.
    pub async fn resume_submit(
        &self,
        state: &mut AgentState,
        decision: ResumeDecision,
        caller: &Caller,
    ) -> Result<(PendingInterrupt, SubmitResult)> {
        let pending = state.last_interrupt.clone().ok_or_else(|| {
            OrchestrationError::StateError("There is no order awaiting confirmation".to_string())
        })?;

        if decision == ResumeDecision::Rejected {
            info!("Customer did not approve the order");
            state.take_interrupt();
            return Ok((pending, SubmitResult::make_changes(None)));
        }

        if state.get_order().is_empty() {
            return Err(OrchestrationError::StateError("Order is empty".to_string()));
        }

        if !pending.matches_order(state.get_order()) {
            warn!(
                expected = %pending.snapshot_hash,
                "Order changed after confirmation was requested, treating approval as rejection"
            );
            state.take_interrupt();
            return Ok((
                pending,
                SubmitResult::make_changes(Some(
                    "The order changed before it was approved. Confirm the current order with the customer.",
                )),
            ));
        }

        let owner = caller
            .principal_id
            .as_deref()
            .ok_or_else(|| OrchestrationError::AuthError("User not authenticated".to_string()))?;

        let name = generate_name();
        let receipt = self
            .submissions
            .submit_order(owner, &name, state.get_order())
            .await?;
        info!(receipt = %receipt, "Order successfully submitted");

        state.take_interrupt();
        state.mark_submitted();
        Ok((pending, SubmitResult::submitted(name)))
    }
}

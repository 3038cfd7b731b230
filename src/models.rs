//! Core data models for the barista agent

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of suggested replies sent to the client.
pub const MAX_RESPONSE_SUGGESTIONS: usize = 4;

//
// ================= Beverage =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Beverage {
    pub name: String,
    #[serde(default)]
    pub modifiers: Vec<String>,
}

impl Beverage {
    pub fn new(name: impl Into<String>, modifiers: Vec<String>) -> Self {
        Self {
            name: name.into(),
            modifiers,
        }
    }

    /// Two items are identical when the drink matches and the modifiers are the
    /// same multiset, regardless of the order they were given in.
    pub fn is_identical_to(&self, other: &Beverage) -> bool {
        if self.name != other.name || self.modifiers.len() != other.modifiers.len() {
            return false;
        }
        let mut lhs: Vec<&str> = self.modifiers.iter().map(String::as_str).collect();
        let mut rhs: Vec<&str> = other.modifiers.iter().map(String::as_str).collect();
        lhs.sort_unstable();
        rhs.sort_unstable();
        lhs == rhs
    }

    /// Tool wire form: `[name, modifiers]`
    pub fn to_tuple(&self) -> (String, Vec<String>) {
        (self.name.clone(), self.modifiers.clone())
    }
}

impl fmt::Display for Beverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.modifiers.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{} ({})", self.name, self.modifiers.join(", "))
        }
    }
}

/// Group identical items, keeping first-seen order, into a one-line summary
/// such as `2 x Espresso, 1 x Latte (Oat milk)`.
pub fn summarize_order(order: &[Beverage]) -> String {
    let mut groups: Vec<(&Beverage, usize)> = Vec::new();
    for item in order {
        match groups.iter_mut().find(|(seen, _)| seen.is_identical_to(item)) {
            Some((_, count)) => *count += 1,
            None => groups.push((item, 1)),
        }
    }
    groups
        .iter()
        .map(|(item, count)| format!("{} x {}", count, item))
        .collect::<Vec<_>>()
        .join(", ")
}

//
// ================= Inbound =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    User,
}

/// Media attached to a chat message: either inline base64 data or a reference
/// to an object that was already stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MediaInput {
    #[serde(rename_all = "camelCase")]
    Inline { base64_data: String, mime_type: String },
    #[serde(rename_all = "camelCase")]
    Stored { storage_url: String, content_type: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: UserRole,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub media: Option<MediaInput>,
}

impl ChatMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            role: UserRole::User,
            text: text.into(),
            media: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderConfirmation {
    pub order_approved: bool,
}

/// Identity of the caller as established by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    /// Session key; one session per user identity.
    pub session_id: String,
    /// Authenticated principal allowed to submit orders, if any.
    pub principal_id: Option<String>,
}

impl Caller {
    pub fn authenticated(uid: impl Into<String>) -> Self {
        let uid = uid.into();
        Self {
            principal_id: Some(uid.clone()),
            session_id: uid,
        }
    }
}

//
// ================= Outbound =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    #[default]
    Agent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub role: AgentRole,
    pub text: String,
    pub suggested_responses: Vec<String>,
    pub ready_for_submission: bool,
    pub order_submitted: bool,
    pub order: Vec<Beverage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub featured_item_image: Option<String>,
}

impl ChatResponse {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            role: AgentRole::Agent,
            text: text.into(),
            suggested_responses: Vec::new(),
            ready_for_submission: false,
            order_submitted: false,
            order: Vec::new(),
            featured_item_image: None,
        }
    }

    pub fn with_suggestions(mut self, suggestions: &[String]) -> Self {
        self.suggested_responses = suggestions
            .iter()
            .take(MAX_RESPONSE_SUGGESTIONS)
            .cloned()
            .collect();
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextResponse {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub text: String,
    pub status_code: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bev(name: &str, modifiers: &[&str]) -> Beverage {
        Beverage::new(name, modifiers.iter().map(|m| m.to_string()).collect())
    }

    #[test]
    fn test_identical_ignores_modifier_order() {
        let a = bev("Latte", &["Decaf", "Oat milk"]);
        let b = bev("Latte", &["Oat milk", "Decaf"]);
        assert!(a.is_identical_to(&b));
    }

    #[test]
    fn test_identical_respects_multiplicity() {
        let a = bev("Latte", &["sugar", "sugar"]);
        let b = bev("Latte", &["sugar"]);
        assert!(!a.is_identical_to(&b));
        assert!(!bev("Latte", &[]).is_identical_to(&bev("Mocha", &[])));
    }

    #[test]
    fn test_summarize_groups_identical_items() {
        let order = vec![
            bev("Espresso", &[]),
            bev("Latte", &["Oat milk"]),
            bev("Espresso", &[]),
        ];
        assert_eq!(summarize_order(&order), "2 x Espresso, 1 x Latte (Oat milk)");
    }

    #[test]
    fn test_media_input_variants() {
        let inline: MediaInput =
            serde_json::from_str(r#"{"base64Data":"aGk=","mimeType":"image/png"}"#).unwrap();
        assert!(matches!(inline, MediaInput::Inline { .. }));

        let stored: MediaInput = serde_json::from_str(
            r#"{"storageUrl":"users/u1/a","contentType":"image/jpeg"}"#,
        )
        .unwrap();
        assert!(matches!(stored, MediaInput::Stored { .. }));
    }

    #[test]
    fn test_response_caps_suggestions_at_four() {
        let suggestions: Vec<String> = (0..6).map(|i| format!("s{}", i)).collect();
        let response = ChatResponse::new("hi").with_suggestions(&suggestions);
        assert_eq!(response.suggested_responses.len(), MAX_RESPONSE_SUGGESTIONS);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["role"], "agent");
        assert!(json.get("featuredItemImage").is_none());
        assert_eq!(json["readyForSubmission"], false);
    }
}

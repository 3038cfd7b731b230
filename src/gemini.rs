//! Gemini API client
//!
//! Implements [`ModelClient`] on top of `generateContent` with function
//! calling. Uses a long-lived reqwest::Client for connection pooling.

use crate::error::OrchestrationError;
use crate::llm::{
    Content, ContentPart, ContentRole, FunctionCall, FunctionDeclaration, ModelClient,
    ModelRequest, ModelResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, error, info};

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Every harm category is blocked from low probability upwards.
const SAFETY_CATEGORIES: &[&str] = &[
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
];

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: impl Into<String>) -> crate::Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: model.into(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/{}:generateContent?key={}", BASE_URL, self.model, self.api_key)
    }
}

#[async_trait::async_trait]
impl ModelClient for GeminiClient {
    async fn generate(&self, request: &ModelRequest) -> crate::Result<ModelResponse> {
        if self.api_key.is_empty() {
            return Err(OrchestrationError::ConfigError(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let body = GeminiRequest::from_model_request(request);

        debug!(
            contents = body.contents.len(),
            tools_enabled = request.allow_tool_calls,
            "Calling Gemini API"
        );

        let response = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                // The key is part of the URL.
                let e = e.without_url();
                error!("Gemini API request failed: {}", e);
                OrchestrationError::UpstreamModelError(format!("Gemini API error: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Gemini API error response ({}): {}", status, error_text);
            return Err(OrchestrationError::UpstreamModelError(format!(
                "Gemini API returned {}",
                status
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            let e = e.without_url();
            error!("Failed to parse Gemini response: {}", e);
            OrchestrationError::UpstreamModelError(format!("Gemini parse error: {}", e))
        })?;

        let parsed = gemini_response.into_model_response()?;

        info!(
            calls = parsed.function_calls.len(),
            finish_reason = parsed.finish_reason.as_deref().unwrap_or("UNKNOWN"),
            "Gemini response received"
        );

        Ok(parsed)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<WireContent>,
    system_instruction: SystemInstruction,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_config: Option<ToolConfig>,
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

impl GeminiRequest {
    fn from_model_request(request: &ModelRequest) -> Self {
        let tools = if request.tools.is_empty() {
            Vec::new()
        } else {
            vec![ToolBlock {
                function_declarations: request.tools.clone(),
            }]
        };

        let tool_config = (!tools.is_empty()).then(|| ToolConfig {
            function_calling_config: FunctionCallingConfig {
                mode: if request.allow_tool_calls { "AUTO" } else { "NONE" },
            },
        });

        Self {
            contents: request.contents.iter().map(WireContent::from).collect(),
            system_instruction: SystemInstruction {
                parts: vec![WirePart::text(&request.system_instruction)],
            },
            tools,
            tool_config,
            generation_config: GenerationConfig {
                temperature: 0.3,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 1024,
            },
            safety_settings: SAFETY_CATEGORIES
                .iter()
                .map(|category| SafetySetting {
                    category: *category,
                    threshold: "BLOCK_LOW_AND_ABOVE",
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireContent {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<WirePart>,
}

impl From<&Content> for WireContent {
    fn from(content: &Content) -> Self {
        let role = match content.role {
            ContentRole::User => "user",
            ContentRole::Model => "model",
        };

        Self {
            role: Some(role.to_string()),
            parts: content.parts.iter().map(WirePart::from).collect(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<WireFunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<WireFunctionResponse>,
}

impl WirePart {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            ..Default::default()
        }
    }
}

impl From<&ContentPart> for WirePart {
    fn from(part: &ContentPart) -> Self {
        match part {
            ContentPart::Text(text) => WirePart::text(text),
            ContentPart::InlineData { mime_type, data } => Self {
                inline_data: Some(InlineData {
                    mime_type: mime_type.clone(),
                    data: data.clone(),
                }),
                ..Default::default()
            },
            ContentPart::FunctionCall(call) => Self {
                function_call: Some(WireFunctionCall {
                    name: call.name.clone(),
                    args: call.args.clone(),
                }),
                ..Default::default()
            },
            ContentPart::FunctionResponse(response) => Self {
                function_response: Some(WireFunctionResponse {
                    name: response.name.clone(),
                    response: response.response.clone(),
                }),
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolBlock {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolConfig {
    function_calling_config: FunctionCallingConfig,
}

#[derive(Debug, Serialize)]
struct FunctionCallingConfig {
    mode: &'static str,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<WirePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<WireContent>,
    finish_reason: Option<String>,
}

impl GeminiResponse {
    fn into_model_response(self) -> crate::Result<ModelResponse> {
        let candidate = self.candidates.into_iter().next().ok_or_else(|| {
            OrchestrationError::UpstreamModelError("No response from Gemini API".to_string())
        })?;

        let mut text = String::new();
        let mut function_calls = Vec::new();

        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(t) = part.text {
                text.push_str(&t);
            }
            if let Some(call) = part.function_call {
                function_calls.push(FunctionCall {
                    name: call.name,
                    args: call.args,
                });
            }
        }

        Ok(ModelResponse {
            text,
            function_calls,
            finish_reason: candidate.finish_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ToolCallRecord, ToolResponseRecord};
    use serde_json::json;

    fn request(allow_tool_calls: bool) -> ModelRequest {
        ModelRequest {
            system_instruction: "You are a barista".to_string(),
            contents: vec![
                Content {
                    role: ContentRole::User,
                    parts: vec![ContentPart::Text("A latte please".to_string())],
                },
                Content {
                    role: ContentRole::Model,
                    parts: vec![ContentPart::FunctionCall(ToolCallRecord {
                        id: "c1".into(),
                        name: "add_to_order".into(),
                        args: json!({ "drink": "Latte" }),
                    })],
                },
                Content {
                    role: ContentRole::User,
                    parts: vec![ContentPart::FunctionResponse(ToolResponseRecord {
                        id: "c1".into(),
                        name: "add_to_order".into(),
                        response: json!({ "output": { "orderSize": 1 } }),
                    })],
                },
            ],
            tools: vec![FunctionDeclaration {
                name: "get_order".into(),
                description: "Returns the order".into(),
                parameters: None,
            }],
            allow_tool_calls,
        }
    }

    #[test]
    fn test_request_serialization() {
        let json = serde_json::to_value(GeminiRequest::from_model_request(&request(true))).unwrap();

        assert_eq!(json["contents"][0]["parts"][0]["text"], "A latte please");
        assert_eq!(json["contents"][1]["parts"][0]["functionCall"]["name"], "add_to_order");
        assert_eq!(
            json["contents"][2]["parts"][0]["functionResponse"]["response"]["output"]["orderSize"],
            1
        );
        assert_eq!(json["tools"][0]["functionDeclarations"][0]["name"], "get_order");
        assert_eq!(json["toolConfig"]["functionCallingConfig"]["mode"], "AUTO");
        assert_eq!(json["safetySettings"].as_array().unwrap().len(), 4);
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "You are a barista");
    }

    #[test]
    fn test_text_only_round_disables_calls() {
        let json = serde_json::to_value(GeminiRequest::from_model_request(&request(false))).unwrap();
        assert_eq!(json["toolConfig"]["functionCallingConfig"]["mode"], "NONE");
    }

    #[test]
    fn test_response_parsing() {
        let raw = json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        { "text": "Adding that now." },
                        { "functionCall": { "name": "add_to_order", "args": { "drink": "Mocha" } } }
                    ]
                },
                "finishReason": "STOP"
            }]
        });

        let parsed: GeminiResponse = serde_json::from_value(raw).unwrap();
        let response = parsed.into_model_response().unwrap();
        assert_eq!(response.text, "Adding that now.");
        assert_eq!(response.function_calls[0].args["drink"], "Mocha");
        assert_eq!(response.finish_reason.as_deref(), Some("STOP"));
    }

    #[test]
    fn test_blocked_response_has_no_content() {
        let raw = json!({ "candidates": [{ "finishReason": "SAFETY" }] });
        let parsed: GeminiResponse = serde_json::from_value(raw).unwrap();
        let response = parsed.into_model_response().unwrap();
        assert!(response.text.is_empty());
        assert!(response.function_calls.is_empty());

        let empty: GeminiResponse = serde_json::from_value(json!({})).unwrap();
        assert!(empty.into_model_response().is_err());
    }
}

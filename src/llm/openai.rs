//! OpenAI-compatible chat completion provider.
//!
//! Talks to `/chat/completions` with reqwest. Tool menus are sent as the
//! `tools` array; a forced function becomes
//! `tool_choice: {"type": "function", "function": {"name": ...}}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::llm::costs;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, ToolCall,
    ToolChoice, ToolCompletionRequest, ToolCompletionResponse, ToolDefinition,
};

const PROVIDER: &str = "openai";

/// OpenAI chat completion client.
pub struct OpenAiProvider {
    client: Client,
    api_key: SecretString,
    base_url: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(
        api_key: SecretString,
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn send(&self, body: &ChatRequest<'_>) -> Result<ChatResponse, LlmError> {
        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(self.api_key.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            let text = response.text().await.unwrap_or_default();
            return Err(map_status_error(status, retry_after, text));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| LlmError::InvalidResponse {
            provider: PROVIDER.to_string(),
            reason: format!("Failed to decode response body: {e}"),
        })?;

        if let Some(ref usage) = parsed.usage {
            let cost = costs::estimate_cost(
                self.cost_per_token(),
                usage.prompt_tokens,
                usage.completion_tokens,
            );
            tracing::debug!(
                model = %self.model,
                input_tokens = usage.prompt_tokens,
                output_tokens = usage.completion_tokens,
                cost_usd = %cost,
                "LLM call completed"
            );
        }
        Ok(parsed)
    }
}

/// Map a non-success HTTP status to an `LlmError`.
fn map_status_error(status: StatusCode, retry_after: Option<Duration>, body: String) -> LlmError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited {
            provider: PROVIDER.to_string(),
            retry_after,
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::AuthFailed {
            provider: PROVIDER.to_string(),
        },
        s if s.is_server_error() || s == StatusCode::REQUEST_TIMEOUT => LlmError::RequestFailed {
            provider: PROVIDER.to_string(),
            reason: format!("{s}: {body}"),
        },
        s => LlmError::InvalidResponse {
            provider: PROVIDER.to_string(),
            reason: format!("{s}: {body}"),
        },
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        costs::model_cost(&self.model).unwrap_or_else(costs::default_cost)
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = ChatRequest {
            model: &self.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            tools: None,
            tool_choice: None,
        };
        let response = self.send(&body).await?;
        let (usage_in, usage_out) = response.usage_pair();
        let choice = response.first_choice()?;
        Ok(CompletionResponse {
            content: choice.message.content.clone().unwrap_or_default(),
            input_tokens: usage_in,
            output_tokens: usage_out,
            finish_reason: FinishReason::from_openai(choice.finish_reason.as_deref()),
            response_id: response.id.clone(),
        })
    }

    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        let tools: Vec<WireTool<'_>> = request.tools.iter().map(WireTool::from).collect();
        let body = ChatRequest {
            model: &self.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            tools: Some(tools),
            tool_choice: Some(wire_tool_choice(&request.tool_choice)),
        };
        let response = self.send(&body).await?;
        let (usage_in, usage_out) = response.usage_pair();
        let choice = response.first_choice()?;

        let mut tool_calls = Vec::new();
        for call in choice.message.tool_calls.iter().flatten() {
            let arguments = serde_json::from_str(&call.function.arguments).map_err(|e| {
                LlmError::InvalidResponse {
                    provider: PROVIDER.to_string(),
                    reason: format!(
                        "Arguments for {} are not valid JSON: {e}",
                        call.function.name
                    ),
                }
            })?;
            tool_calls.push(ToolCall {
                id: call.id.clone(),
                name: call.function.name.clone(),
                arguments,
            });
        }

        Ok(ToolCompletionResponse {
            content: choice.message.content.clone(),
            tool_calls,
            input_tokens: usage_in,
            output_tokens: usage_out,
            finish_reason: FinishReason::from_openai(choice.finish_reason.as_deref()),
        })
    }
}

// ── Wire format ─────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolDefinition,
}

impl<'a> From<&'a ToolDefinition> for WireTool<'a> {
    fn from(def: &'a ToolDefinition) -> Self {
        Self {
            kind: "function",
            function: def,
        }
    }
}

fn wire_tool_choice(choice: &ToolChoice) -> serde_json::Value {
    match choice {
        ToolChoice::Auto => serde_json::json!("auto"),
        ToolChoice::Required => serde_json::json!("required"),
        ToolChoice::Function(name) => serde_json::json!({
            "type": "function",
            "function": { "name": name }
        }),
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    id: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

impl ChatResponse {
    fn first_choice(&self) -> Result<&Choice, LlmError> {
        self.choices.first().ok_or_else(|| LlmError::InvalidResponse {
            provider: PROVIDER.to_string(),
            reason: "response contained no choices".to_string(),
        })
    }

    fn usage_pair(&self) -> (u32, u32) {
        self.usage
            .as_ref()
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0))
    }
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::Role;

    #[test]
    fn forced_function_choice_wire_format() {
        let value = wire_tool_choice(&ToolChoice::Function("route_message".into()));
        assert_eq!(value["type"], "function");
        assert_eq!(value["function"]["name"], "route_message");
        assert_eq!(wire_tool_choice(&ToolChoice::Auto), "auto");
    }

    #[test]
    fn request_serializes_tools_and_messages() {
        let tool = ToolDefinition {
            name: "answer_from_knowledge_base".into(),
            description: "Answer from the website".into(),
            parameters: serde_json::json!({"type": "object"}),
        };
        let messages = vec![
            ChatMessage::system("sys"),
            ChatMessage::function("qualify_lead", "Wie heißen Sie?"),
        ];
        let body = ChatRequest {
            model: "gpt-4",
            messages: &messages,
            temperature: Some(0.0),
            max_tokens: None,
            tools: Some(vec![WireTool::from(&tool)]),
            tool_choice: Some(wire_tool_choice(&ToolChoice::Required)),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["tools"][0]["type"], "function");
        assert_eq!(json["tools"][0]["function"]["name"], "answer_from_knowledge_base");
        assert_eq!(json["messages"][1]["role"], Role::Function.as_str());
        assert_eq!(json["messages"][1]["name"], "qualify_lead");
        assert!(json.get("max_tokens").is_none());
    }

    #[test]
    fn response_decodes_tool_calls() {
        let raw = r#"{
            "id": "chatcmpl-1",
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "qualify_lead", "arguments": "{\"query\":\"Hallo\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 7}
        }"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        let choice = parsed.first_choice().unwrap();
        let call = &choice.message.tool_calls.as_ref().unwrap()[0];
        assert_eq!(call.function.name, "qualify_lead");
        assert_eq!(parsed.usage_pair(), (12, 7));
    }

    #[test]
    fn empty_choices_is_invalid_response() {
        let parsed: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(matches!(
            parsed.first_choice(),
            Err(LlmError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            map_status_error(StatusCode::TOO_MANY_REQUESTS, None, String::new()),
            LlmError::RateLimited { .. }
        ));
        assert!(matches!(
            map_status_error(StatusCode::UNAUTHORIZED, None, String::new()),
            LlmError::AuthFailed { .. }
        ));
        assert!(map_status_error(StatusCode::BAD_GATEWAY, None, String::new()).is_transient());
        assert!(!map_status_error(StatusCode::BAD_REQUEST, None, String::new()).is_transient());
    }
}

//! Forced single-function calls.
//!
//! Routing, the lead dialogue and lead extraction all need schema-shaped
//! output. Each of them declares one function and forces the model to call
//! it; the parsed arguments are the result.

use crate::error::LlmError;
use crate::llm::provider::{ChatMessage, LlmProvider, ToolChoice, ToolCompletionRequest, ToolDefinition};
use crate::llm::retry::{RetryConfig, with_retry};

/// Force `tool` and return its JSON arguments.
///
/// Fails with `InvalidResponse` if the model answers in text or calls a
/// different function.
pub async fn call_function(
    llm: &dyn LlmProvider,
    messages: Vec<ChatMessage>,
    tool: &ToolDefinition,
    temperature: f32,
    retry: &RetryConfig,
) -> Result<serde_json::Value, LlmError> {
    let response = with_retry(retry, &tool.name, || {
        let request = ToolCompletionRequest::new(messages.clone(), vec![tool.clone()])
            .with_tool_choice(ToolChoice::Function(tool.name.clone()))
            .with_temperature(temperature);
        llm.complete_with_tools(request)
    })
    .await?;

    let call = response
        .tool_calls
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::InvalidResponse {
            provider: llm.model_name().to_string(),
            reason: format!("expected a call to {}, got text", tool.name),
        })?;

    if call.name != tool.name {
        return Err(LlmError::InvalidResponse {
            provider: llm.model_name().to_string(),
            reason: format!("expected a call to {}, got {}", tool.name, call.name),
        });
    }

    // Some backends double-encode the argument object.
    match call.arguments {
        serde_json::Value::String(raw) => Ok(serde_json::from_str(&raw)?),
        other => Ok(other),
    }
}

//! Per-turn intent routing through a two-function menu.

use std::sync::Arc;

use crate::error::RoutingError;
use crate::llm::{
    ChatMessage, LlmProvider, RetryConfig, ToolChoice, ToolCompletionRequest,
    ToolCompletionResponse, ToolDefinition, with_retry,
};

pub const ANSWER_FUNCTION: &str = "answer_from_knowledge_base";
pub const QUALIFY_FUNCTION: &str = "qualify_lead";

/// What to do with a user message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    /// Answer from the knowledge base.
    Retrieve(String),
    /// Continue lead qualification.
    Qualify(String),
    /// The router replied in text instead of choosing an action.
    DirectAnswer(String),
}

impl RoutingDecision {
    /// Short label for logs.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Retrieve(_) => "retrieve",
            Self::Qualify(_) => "qualify",
            Self::DirectAnswer(_) => "direct_answer",
        }
    }
}

fn query_parameters(description: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": description,
            }
        },
        "required": ["query"],
    })
}

/// The action menu offered on every turn.
pub fn routing_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: ANSWER_FUNCTION.to_string(),
            description: "Read the relevant parts of the TCW website and answer the visitor's question."
                .to_string(),
            parameters: query_parameters("The visitor's question in plain text"),
        },
        ToolDefinition {
            name: QUALIFY_FUNCTION.to_string(),
            description: "Qualify the visitor as a lead and collect details like name, company, role and email."
                .to_string(),
            parameters: query_parameters("The visitor's message in plain text"),
        },
    ]
}

/// Turn a routing completion into a decision.
pub fn parse_decision(response: ToolCompletionResponse) -> Result<RoutingDecision, RoutingError> {
    let Some(call) = response.tool_calls.into_iter().next() else {
        return match response.content.map(|c| c.trim().to_string()) {
            Some(text) if !text.is_empty() => Ok(RoutingDecision::DirectAnswer(text)),
            _ => Err(RoutingError::NoFunctionCall),
        };
    };

    let arguments = match call.arguments {
        serde_json::Value::String(raw) => serde_json::from_str(&raw).map_err(|e| {
            RoutingError::InvalidArguments {
                function: call.name.clone(),
                reason: e.to_string(),
            }
        })?,
        other => other,
    };
    let query = arguments
        .get("query")
        .and_then(|q| q.as_str())
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| RoutingError::InvalidArguments {
            function: call.name.clone(),
            reason: "missing query".to_string(),
        })?
        .to_string();

    match call.name.as_str() {
        ANSWER_FUNCTION => Ok(RoutingDecision::Retrieve(query)),
        QUALIFY_FUNCTION => Ok(RoutingDecision::Qualify(query)),
        _ => Err(RoutingError::UnknownFunction(call.name)),
    }
}

/// Asks the model which action a message needs.
pub struct Router {
    llm: Arc<dyn LlmProvider>,
    retry: RetryConfig,
}

impl Router {
    pub fn new(llm: Arc<dyn LlmProvider>, retry: RetryConfig) -> Self {
        Self { llm, retry }
    }

    /// One routing completion over the whole conversation. The model must
    /// call one of [`routing_tools`].
    pub async fn decide(&self, messages: Vec<ChatMessage>) -> Result<RoutingDecision, RoutingError> {
        let tools = routing_tools();
        let response = with_retry(&self.retry, "route", || {
            let request = ToolCompletionRequest::new(messages.clone(), tools.clone())
                .with_tool_choice(ToolChoice::Required)
                .with_temperature(0.0);
            self.llm.complete_with_tools(request)
        })
        .await?;
        parse_decision(response)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::llm::{FinishReason, ToolCall};

    fn response(calls: Vec<(&str, serde_json::Value)>, content: Option<&str>) -> ToolCompletionResponse {
        ToolCompletionResponse {
            content: content.map(str::to_string),
            tool_calls: calls
                .into_iter()
                .map(|(name, arguments)| ToolCall {
                    id: "call".into(),
                    name: name.into(),
                    arguments,
                })
                .collect(),
            input_tokens: 0,
            output_tokens: 0,
            finish_reason: FinishReason::ToolUse,
        }
    }

    #[test]
    fn menu_has_exactly_two_actions_with_query() {
        let tools = routing_tools();
        assert_eq!(tools.len(), 2);
        for tool in &tools {
            assert_eq!(tool.parameters["required"], json!(["query"]));
        }
    }

    #[test]
    fn parses_both_actions() {
        let retrieve = parse_decision(response(
            vec![(ANSWER_FUNCTION, json!({"query": "Wer ist Prof. Wildemann?"}))],
            None,
        ))
        .unwrap();
        assert_eq!(retrieve, RoutingDecision::Retrieve("Wer ist Prof. Wildemann?".into()));

        let qualify = parse_decision(response(
            vec![(QUALIFY_FUNCTION, json!("{\"query\": \"Ich bin Merten\"}"))],
            None,
        ))
        .unwrap();
        assert_eq!(qualify, RoutingDecision::Qualify("Ich bin Merten".into()));
    }

    #[test]
    fn text_reply_is_a_direct_answer() {
        let decision = parse_decision(response(vec![], Some("Guten Tag!"))).unwrap();
        assert_eq!(decision, RoutingDecision::DirectAnswer("Guten Tag!".into()));
    }

    #[test]
    fn ambiguous_outputs_are_errors() {
        assert!(matches!(
            parse_decision(response(vec![], None)),
            Err(RoutingError::NoFunctionCall)
        ));
        assert!(matches!(
            parse_decision(response(vec![("book_meeting", json!({"query": "x"}))], None)),
            Err(RoutingError::UnknownFunction(_))
        ));
        assert!(matches!(
            parse_decision(response(vec![(ANSWER_FUNCTION, json!({"q": "x"}))], None)),
            Err(RoutingError::InvalidArguments { .. })
        ));
    }
}

//! Lead qualification dialogue.
//!
//! One forced function call per turn returns both the reply and a status
//! enum, so the orchestrator never has to pattern-match reply text.

use std::sync::Arc;

use crate::config::AssistantConfig;
use crate::conversation::{ConversationHistory, LeadQualificationState};
use crate::error::LlmError;
use crate::lead::model::LeadSchema;
use crate::lead::prompts;
use crate::llm::structured::call_function;
use crate::llm::{ChatMessage, LlmProvider, RetryConfig, Role, ToolDefinition};

/// Dialogue settings.
#[derive(Debug, Clone)]
pub struct DialogueConfig {
    pub schema: LeadSchema,
    pub reply_char_limit: usize,
    pub temperature: f32,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            schema: LeadSchema::default(),
            reply_char_limit: 100,
            temperature: 0.3,
        }
    }
}

impl DialogueConfig {
    pub fn from_assistant(config: &AssistantConfig) -> Self {
        Self {
            schema: config.lead_schema.clone(),
            reply_char_limit: config.lead_reply_char_limit,
            temperature: config.temperature,
        }
    }
}

/// Reply and status for one dialogue turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogueTurn {
    pub reply: String,
    pub status: LeadQualificationState,
}

/// Asks for missing lead fields one at a time.
pub struct LeadDialogue {
    llm: Arc<dyn LlmProvider>,
    config: DialogueConfig,
    retry: RetryConfig,
}

impl LeadDialogue {
    pub fn new(llm: Arc<dyn LlmProvider>, config: DialogueConfig, retry: RetryConfig) -> Self {
        Self { llm, config, retry }
    }

    fn tool() -> ToolDefinition {
        ToolDefinition {
            name: prompts::DIALOGUE_FUNCTION.to_string(),
            description: "Send the next lead qualification message and report the flow status"
                .to_string(),
            parameters: prompts::dialogue_function_schema(),
        }
    }

    /// Build the model input: dialogue instruction, then the conversation
    /// without its own system turns, ending with `user_message`.
    fn messages(&self, user_message: &str, history: &ConversationHistory) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(prompts::dialogue_system_prompt(
            &self.config.schema,
            self.config.reply_char_limit,
        ))];
        messages.extend(
            history
                .turns()
                .iter()
                .filter(|t| matches!(t.role, Role::User | Role::Assistant))
                .map(|t| t.to_message()),
        );
        let ends_with_message = history
            .last()
            .is_some_and(|t| t.role == Role::User && t.content == user_message);
        if !ends_with_message {
            messages.push(ChatMessage::user(user_message));
        }
        messages
    }

    /// Produce the next question and the flow status.
    pub async fn advance(
        &self,
        user_message: &str,
        history: &ConversationHistory,
    ) -> Result<DialogueTurn, LlmError> {
        let arguments = call_function(
            self.llm.as_ref(),
            self.messages(user_message, history),
            &Self::tool(),
            self.config.temperature,
            &self.retry,
        )
        .await?;

        let turn = self.parse(&arguments)?;
        let chars = turn.reply.chars().count();
        if chars > self.config.reply_char_limit {
            tracing::debug!(
                conversation_id = history.conversation_id(),
                chars,
                limit = self.config.reply_char_limit,
                "Lead dialogue reply exceeds limit"
            );
        }
        Ok(turn)
    }

    fn parse(&self, arguments: &serde_json::Value) -> Result<DialogueTurn, LlmError> {
        let invalid = |reason: String| LlmError::InvalidResponse {
            provider: self.llm.model_name().to_string(),
            reason,
        };
        let status = arguments
            .get("status")
            .and_then(|s| s.as_str())
            .ok_or_else(|| invalid("lead dialogue status is missing".to_string()))?
            .parse::<LeadQualificationState>()
            .map_err(invalid)?;
        let reply = arguments
            .get("reply")
            .and_then(|r| r.as_str())
            .map(str::trim)
            .unwrap_or_default()
            .to_string();

        let reply = match (reply.is_empty(), status) {
            (false, _) => reply,
            (true, LeadQualificationState::InProgress) => {
                return Err(invalid("lead dialogue reply is empty".to_string()));
            }
            (true, LeadQualificationState::Success) => {
                "Vielen Dank! Was möchten Sie als Nächstes über TCW wissen?".to_string()
            }
            (true, LeadQualificationState::Aborted) => {
                "Kein Problem. Haben Sie Fragen zu TCW?".to_string()
            }
        };
        Ok(DialogueTurn { reply, status })
    }
}

//! Append-only conversation history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::{ChatMessage, Role};

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    /// Function name for `Role::Function` turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn to_message(&self) -> ChatMessage {
        match (self.role, &self.name) {
            (Role::Function, Some(name)) => ChatMessage::function(name.clone(), self.content.clone()),
            (role, _) => ChatMessage::new(role, self.content.clone()),
        }
    }
}

/// A completed user/assistant pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub user: String,
    pub assistant: String,
}

/// Ordered turns of one conversation.
///
/// Turns can only be appended. The orchestrator works on a clone during a
/// turn and swaps it in once the reply is ready, so a dropped turn leaves
/// the stored history untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationHistory {
    conversation_id: String,
    user_id: Option<String>,
    started_at: DateTime<Utc>,
    turns: Vec<ConversationTurn>,
}

impl ConversationHistory {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            user_id: None,
            started_at: Utc::now(),
            turns: Vec::new(),
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    /// All turns as model messages.
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        self.turns.iter().map(ConversationTurn::to_message).collect()
    }

    /// Completed user/assistant exchanges, oldest first, at most `n`.
    ///
    /// An assistant turn without a preceding user turn (the greeting) and a
    /// trailing unanswered user turn are not exchanges.
    pub fn recent_exchanges(&self, n: usize) -> Vec<Exchange> {
        let mut exchanges = Vec::new();
        let mut pending_user: Option<&str> = None;
        for turn in &self.turns {
            match turn.role {
                Role::User => pending_user = Some(turn.content.as_str()),
                Role::Assistant => {
                    if let Some(user) = pending_user.take() {
                        exchanges.push(Exchange {
                            user: user.to_string(),
                            assistant: turn.content.clone(),
                        });
                    }
                }
                Role::System | Role::Function => {}
            }
        }
        let skip = exchanges.len().saturating_sub(n);
        exchanges.split_off(skip)
    }

    /// `user: ...` / `assistant: ...` lines, one per turn.
    ///
    /// System and function turns are left out. Used for lead extraction.
    pub fn transcript(&self) -> String {
        render_transcript(
            self.turns
                .iter()
                .filter(|t| matches!(t.role, Role::User | Role::Assistant))
                .map(|t| (t.role, t.content.as_str())),
        )
    }
}

/// Render `(role, content)` pairs as transcript lines.
pub fn render_transcript<'a>(turns: impl IntoIterator<Item = (Role, &'a str)>) -> String {
    let mut out = String::new();
    for (role, content) in turns {
        out.push_str(role.as_str());
        out.push_str(": ");
        out.push_str(content.trim());
        out.push('\n');
    }
    out
}

//! `LeadStore` trait — the persistence interface the assistant writes to.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::conversation::render_transcript;
use crate::error::DatabaseError;
use crate::lead::LeadRecord;
use crate::llm::Role;

/// One user message and the reply it got.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurnRecord {
    pub id: Uuid,
    pub user_id: Option<String>,
    pub conversation_id: String,
    pub user_msg: String,
    pub bot_msg: String,
    pub created_at: DateTime<Utc>,
}

impl ConversationTurnRecord {
    pub fn new(
        conversation_id: impl Into<String>,
        user_id: Option<String>,
        user_msg: impl Into<String>,
        bot_msg: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            conversation_id: conversation_id.into(),
            user_msg: user_msg.into(),
            bot_msg: bot_msg.into(),
            created_at: Utc::now(),
        }
    }
}

/// Rebuild a `user:` / `assistant:` transcript from stored turns.
pub fn turns_to_transcript(turns: &[ConversationTurnRecord]) -> String {
    render_transcript(turns.iter().flat_map(|t| {
        [(Role::User, t.user_msg.as_str()), (Role::Assistant, t.bot_msg.as_str())]
            .into_iter()
            .filter(|(_, text)| !text.trim().is_empty())
    }))
}

/// Storage for conversation turns and extracted leads.
///
/// Implementations must be safe for concurrent use by many conversations.
#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Append one exchange.
    async fn write_conversation_turn(&self, turn: &ConversationTurnRecord) -> Result<(), DatabaseError>;

    /// Insert or replace the lead for `record.conversation_id`.
    async fn write_lead_record(&self, record: &LeadRecord) -> Result<(), DatabaseError>;

    /// Distinct conversation ids, oldest first.
    async fn list_conversations(&self) -> Result<Vec<String>, DatabaseError>;

    /// All turns of one conversation in write order.
    async fn conversation_turns(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<ConversationTurnRecord>, DatabaseError>;

    /// The stored lead for a conversation, if any.
    async fn lead_record(&self, conversation_id: &str) -> Result<Option<LeadRecord>, DatabaseError>;
}

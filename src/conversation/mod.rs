//! Conversation history and lead qualification state.

pub mod history;
pub mod state;

pub use history::{ConversationHistory, ConversationTurn, Exchange, render_transcript};
pub use state::{LeadQualificationState, Transition};

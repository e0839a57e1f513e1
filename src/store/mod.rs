//! Persistence layer — libSQL storage for conversation turns and leads.

pub mod libsql_backend;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{ConversationTurnRecord, LeadStore, turns_to_transcript};

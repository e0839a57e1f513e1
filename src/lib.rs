//! Lead Assist — website chat assistant that answers from the knowledge base
//! and qualifies leads.

pub mod analysis;
pub mod channels;
pub mod config;
pub mod conversation;
pub mod error;
pub mod lead;
pub mod llm;
pub mod orchestrator;
pub mod retrieval;
pub mod store;

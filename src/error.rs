//! Error types for Lead Assist.

use std::time::Duration;

/// Top-level error type for the assistant.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Turn error: {0}")]
    Turn(#[from] TurnError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Whether a retry may succeed where this attempt failed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RequestFailed { .. } | Self::RateLimited { .. })
    }
}

/// Errors from the embedding service or the vector index.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Embedding has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Vector index query failed: {0}")]
    Index(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

/// Lead extraction errors.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Lead extraction output is not a valid record: {0}")]
    Parsing(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

/// The routing model did not produce a usable structured decision.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("Routing model answered without calling a function")]
    NoFunctionCall,

    #[error("Routing model called unknown function {0}")]
    UnknownFunction(String),

    #[error("Routing arguments for {function} are invalid: {reason}")]
    InvalidArguments { function: String, reason: String },

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

/// A conversation turn could not be completed.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("Upstream model failed for conversation {conversation_id}: {source}")]
    UpstreamModel {
        conversation_id: String,
        #[source]
        source: LlmError,
    },

    #[error("Retrieval failed for conversation {conversation_id}: {source}")]
    Retrieval {
        conversation_id: String,
        #[source]
        source: RetrievalError,
    },
}

/// Inbound transport / reply delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Failed to send response on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(String),
}

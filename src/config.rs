//! Configuration types.
//!
//! Every component receives its configuration through its constructor.
//! `from_env()` constructors exist for the binary; tests build the structs
//! directly from `Default`.

use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::lead::LeadSchema;
use crate::llm::OPENAI_BASE_URL;

pub const DEFAULT_CONTACT_URL: &str = "https://www.tcw.de/unternehmen/sonstiges/kontakt-170";

pub const DEFAULT_GREETING: &str = "Hallo, wie kann ich Ihnen weiterhelfen?";

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are TCW-GPT, the assistant on the TCW website. You help visitors with questions about TCW \
and its services, and you collect lead information from interested visitors.
- For questions about TCW, its services, publications or people, call answer_from_knowledge_base.
- When the visitor shows interest in working with TCW, wants to be contacted, or offers details \
about themselves, call qualify_lead.
- Always call exactly one of the two functions. Never answer directly.
- Pass the visitor's request as the query argument, in the visitor's language.";

/// Conversation behavior shared by the orchestrator and its components.
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// First system turn of every conversation; also the routing instruction.
    pub system_prompt: String,
    /// Opening assistant turn.
    pub greeting: String,
    /// Where visitors are sent when the knowledge base has no answer.
    pub contact_url: String,
    pub contact_label: String,
    /// Knowledge-base answer ceiling in characters.
    pub answer_char_limit: usize,
    /// Knowledge-base answer ceiling in words.
    pub answer_word_limit: usize,
    /// Lead dialogue reply ceiling in characters.
    pub lead_reply_char_limit: usize,
    /// Fraction a reply may exceed its ceiling before a warning is logged.
    pub limit_tolerance: f32,
    /// Passages requested from the vector index per query.
    pub top_k: usize,
    /// Number of user/assistant exchanges folded into a follow-up question.
    pub consolidation_window: usize,
    /// Sampling temperature for answers and dialogue replies.
    pub temperature: f32,
    /// Fields collected and extracted for every lead.
    pub lead_schema: LeadSchema,
    /// Sessions idle longer than this are dropped from memory.
    pub session_idle_timeout: Duration,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            greeting: DEFAULT_GREETING.to_string(),
            contact_url: DEFAULT_CONTACT_URL.to_string(),
            contact_label: "TCW Kontaktseite".to_string(),
            answer_char_limit: 250,
            answer_word_limit: 50,
            lead_reply_char_limit: 100,
            limit_tolerance: 0.2,
            top_k: 5,
            consolidation_window: 2,
            temperature: 0.3,
            lead_schema: LeadSchema::default(),
            session_idle_timeout: Duration::from_secs(3600), // 1 hour
        }
    }
}

impl AssistantConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let lead_schema = match env_opt("LEAD_ASSIST_LEAD_FIELDS") {
            Some(list) => LeadSchema::from_csv(&list).ok_or_else(|| ConfigError::InvalidValue {
                key: "LEAD_ASSIST_LEAD_FIELDS".to_string(),
                message: "field list is empty".to_string(),
            })?,
            None => defaults.lead_schema,
        };
        Ok(Self {
            system_prompt: env_or("LEAD_ASSIST_SYSTEM_PROMPT", &defaults.system_prompt),
            greeting: env_or("LEAD_ASSIST_GREETING", &defaults.greeting),
            contact_url: env_or("LEAD_ASSIST_CONTACT_URL", &defaults.contact_url),
            contact_label: env_or("LEAD_ASSIST_CONTACT_LABEL", &defaults.contact_label),
            answer_char_limit: parse_env("LEAD_ASSIST_ANSWER_CHAR_LIMIT", defaults.answer_char_limit)?,
            answer_word_limit: parse_env("LEAD_ASSIST_ANSWER_WORD_LIMIT", defaults.answer_word_limit)?,
            lead_reply_char_limit: parse_env(
                "LEAD_ASSIST_LEAD_REPLY_CHAR_LIMIT",
                defaults.lead_reply_char_limit,
            )?,
            limit_tolerance: parse_env("LEAD_ASSIST_LIMIT_TOLERANCE", defaults.limit_tolerance)?,
            top_k: parse_env("LEAD_ASSIST_TOP_K", defaults.top_k)?,
            consolidation_window: parse_env(
                "LEAD_ASSIST_CONSOLIDATION_WINDOW",
                defaults.consolidation_window,
            )?,
            temperature: parse_env("LEAD_ASSIST_TEMPERATURE", defaults.temperature)?,
            lead_schema,
            session_idle_timeout: Duration::from_secs(parse_env(
                "LEAD_ASSIST_SESSION_IDLE_SECS",
                defaults.session_idle_timeout.as_secs(),
            )?),
        })
    }

    /// Fallback reply pointing at the contact page, as a markdown link.
    pub fn contact_fallback(&self) -> String {
        format!(
            "Dazu habe ich leider keine Informationen. Bitte wenden Sie sich an uns: [{}]({})",
            self.contact_label, self.contact_url
        )
    }
}

/// Embedding service settings.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub api_key: SecretString,
    pub base_url: String,
    pub model: String,
    /// Vector length; must match the index.
    pub dimensions: usize,
    pub timeout: Duration,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_key: SecretString::from(String::new()),
            base_url: OPENAI_BASE_URL.to_string(),
            model: "text-embedding-ada-002".to_string(),
            dimensions: 1536,
            timeout: Duration::from_secs(30),
        }
    }
}

impl EmbeddingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let api_key = env_opt("OPENAI_API_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("OPENAI_API_KEY".to_string()))?;
        Ok(Self {
            api_key: SecretString::from(api_key),
            base_url: env_or("LEAD_ASSIST_EMBEDDING_BASE_URL", &defaults.base_url),
            model: env_or("LEAD_ASSIST_EMBEDDING_MODEL", &defaults.model),
            dimensions: parse_env("LEAD_ASSIST_EMBEDDING_DIMENSIONS", defaults.dimensions)?,
            timeout: Duration::from_secs(parse_env(
                "LEAD_ASSIST_EMBEDDING_TIMEOUT_SECS",
                defaults.timeout.as_secs(),
            )?),
        })
    }
}

/// Vector index settings.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Index host, e.g. `https://tcw-website-embeddings-index-abc123.svc.pinecone.io`.
    pub host: String,
    pub api_key: SecretString,
    pub namespace: Option<String>,
    pub timeout: Duration,
}

impl IndexConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env_opt("PINECONE_HOST")
            .ok_or_else(|| ConfigError::MissingEnvVar("PINECONE_HOST".to_string()))?;
        let api_key = env_opt("PINECONE_API_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("PINECONE_API_KEY".to_string()))?;
        Ok(Self {
            host,
            api_key: SecretString::from(api_key),
            namespace: env_opt("PINECONE_NAMESPACE"),
            timeout: Duration::from_secs(parse_env("LEAD_ASSIST_INDEX_TIMEOUT_SECS", 30)?),
        })
    }
}

/// Webhook server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Origins allowed by CORS. Empty means any origin.
    pub allowed_origins: Vec<String>,
    /// Base URL of the chat widget backend that receives replies.
    pub reply_base_url: String,
    /// Bearer token for posting replies.
    pub reply_token: Option<SecretString>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            allowed_origins: vec!["http://localhost:3000".to_string()],
            reply_base_url: "https://app.papercups.io".to_string(),
            reply_token: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let allowed_origins = match env_opt("LEAD_ASSIST_ALLOWED_ORIGINS") {
            Some(list) => list
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => defaults.allowed_origins,
        };
        Ok(Self {
            port: parse_env("LEAD_ASSIST_PORT", defaults.port)?,
            allowed_origins,
            reply_base_url: env_or("PAPERCUPS_BASE_URL", &defaults.reply_base_url),
            reply_token: env_opt("PAPERCUPS_API_KEY").map(SecretString::from),
        })
    }
}

/// Environment variable, treating empty values as unset.
pub(crate) fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

pub(crate) fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

/// Parse an environment variable, falling back to `default` when unset.
/// Unparseable values are an error, never silently replaced.
pub fn parse_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_opt(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}': {e}"),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_defaults() {
        let config = AssistantConfig::default();
        assert_eq!(config.greeting, "Hallo, wie kann ich Ihnen weiterhelfen?");
        assert_eq!(config.top_k, 5);
        assert_eq!(config.consolidation_window, 2);
        assert_eq!(config.answer_char_limit, 250);
        assert_eq!(config.lead_reply_char_limit, 100);
        assert_eq!(config.lead_schema.len(), 10);
    }

    #[test]
    fn contact_fallback_is_a_markdown_link() {
        let config = AssistantConfig::default();
        let fallback = config.contact_fallback();
        assert!(fallback.contains(&format!("({DEFAULT_CONTACT_URL})")));
        assert!(fallback.contains("[TCW Kontaktseite]"));
    }

    #[test]
    fn unset_variables_use_defaults() {
        let port: u16 = parse_env("LEAD_ASSIST_TEST_SURELY_UNSET_PORT", 8080).unwrap();
        assert_eq!(port, 8080);
        assert_eq!(env_or("LEAD_ASSIST_TEST_SURELY_UNSET", "x"), "x");
    }

    #[test]
    fn unparseable_values_are_rejected() {
        // SAFETY: the key is unique to this test.
        unsafe { std::env::set_var("LEAD_ASSIST_TEST_BAD_CONCURRENCY", "vier") };
        let err = parse_env::<usize>("LEAD_ASSIST_TEST_BAD_CONCURRENCY", 4).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref key, .. } if key == "LEAD_ASSIST_TEST_BAD_CONCURRENCY"
        ));
    }

    #[test]
    fn embedding_defaults_match_index() {
        let config = EmbeddingConfig::default();
        assert_eq!(config.model, "text-embedding-ada-002");
        assert_eq!(config.dimensions, 1536);
        assert_eq!(config.timeout, Duration::from_secs(30));
    }
}

//! LLM integration for Lead Assist.
//!
//! Supports:
//! - **OpenAI**: `api.openai.com` chat completions with function calling
//! - **Compatible**: any server speaking the same wire format (vLLM, LiteLLM, Ollama's `/v1`)
//!
//! Both go through [`OpenAiProvider`]; the backend only changes the defaults.

pub mod costs;
pub mod openai;
pub mod provider;
pub mod retry;
pub mod structured;

pub use openai::OpenAiProvider;
pub use provider::*;
pub use retry::{RetryConfig, with_retry};

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use crate::config::{env_opt, env_or, parse_env};
use crate::error::{ConfigError, LlmError};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    OpenAi,
    Compatible,
}

impl std::str::FromStr for LlmBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "compatible" | "openai-compatible" => Ok(Self::Compatible),
            other => Err(ConfigError::InvalidValue {
                key: "LEAD_ASSIST_LLM_BACKEND".to_string(),
                message: format!("unknown backend '{other}' (expected openai or compatible)"),
            }),
        }
    }
}

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: SecretString,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl LlmConfig {
    /// Read `OPENAI_API_KEY`, `LEAD_ASSIST_MODEL`, `LEAD_ASSIST_LLM_BACKEND`,
    /// `LEAD_ASSIST_LLM_BASE_URL` and `LEAD_ASSIST_LLM_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend: LlmBackend = env_or("LEAD_ASSIST_LLM_BACKEND", "openai").parse()?;
        let api_key = match (backend, env_opt("OPENAI_API_KEY")) {
            (_, Some(key)) => key,
            // Local compatible servers usually ignore the key.
            (LlmBackend::Compatible, None) => String::new(),
            (LlmBackend::OpenAi, None) => {
                return Err(ConfigError::MissingEnvVar("OPENAI_API_KEY".to_string()));
            }
        };
        let base_url = match (backend, env_opt("LEAD_ASSIST_LLM_BASE_URL")) {
            (_, Some(url)) => url,
            (LlmBackend::OpenAi, None) => OPENAI_BASE_URL.to_string(),
            (LlmBackend::Compatible, None) => {
                return Err(ConfigError::MissingEnvVar(
                    "LEAD_ASSIST_LLM_BASE_URL".to_string(),
                ));
            }
        };
        Ok(Self {
            backend,
            api_key: SecretString::from(api_key),
            model: env_or("LEAD_ASSIST_MODEL", "gpt-4"),
            base_url,
            timeout: Duration::from_secs(parse_env("LEAD_ASSIST_LLM_TIMEOUT_SECS", 60)?),
        })
    }
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let provider = OpenAiProvider::new(
        config.api_key.clone(),
        config.base_url.clone(),
        config.model.clone(),
        config.timeout,
    )?;
    match config.backend {
        LlmBackend::OpenAi => tracing::info!("Using OpenAI (model: {})", config.model),
        LlmBackend::Compatible => tracing::info!(
            "Using OpenAI-compatible endpoint {} (model: {})",
            config.base_url,
            config.model
        ),
    }
    Ok(Arc::new(provider))
}

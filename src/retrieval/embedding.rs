//! Query embedding.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::config::EmbeddingConfig;
use crate::error::RetrievalError;

/// Turns text into a fixed-length vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Vector length every call returns.
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError>;
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Debug, Deserialize)]
struct EmbedData {
    embedding: Vec<f32>,
}

/// OpenAI `/embeddings` client.
pub struct OpenAiEmbedder {
    client: Client,
    config: EmbeddingConfig,
}

impl OpenAiEmbedder {
    pub fn new(config: EmbeddingConfig) -> Result<Self, RetrievalError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RetrievalError::Embedding(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let url = format!("{}/embeddings", self.config.base_url.trim_end_matches('/'));
        let request = EmbedRequest {
            model: &self.config.model,
            input: text,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| RetrievalError::Embedding(format!("Embedding request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(RetrievalError::Embedding(format!(
                "Embedding failed: {status} - {text}"
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::Embedding(format!("Failed to parse embedding response: {e}")))?;

        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| RetrievalError::Embedding("No embedding returned".to_string()))?;
        check_dimensions(self.config.dimensions, &vector)?;
        Ok(vector)
    }
}

/// Reject vectors whose length differs from what the index expects.
pub fn check_dimensions(expected: usize, vector: &[f32]) -> Result<(), RetrievalError> {
    if vector.len() != expected {
        return Err(RetrievalError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_check() {
        assert!(check_dimensions(3, &[0.1, 0.2, 0.3]).is_ok());
        let err = check_dimensions(1536, &[0.1]).unwrap_err();
        assert!(matches!(
            err,
            RetrievalError::DimensionMismatch {
                expected: 1536,
                actual: 1
            }
        ));
    }

    #[test]
    fn response_shape() {
        let raw = r#"{"object":"list","data":[{"object":"embedding","index":0,"embedding":[0.5,-0.25]}],"model":"text-embedding-ada-002"}"#;
        let parsed: EmbedResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.data[0].embedding, vec![0.5, -0.25]);
    }

    #[tokio::test]
    async fn stalled_request_times_out() {
        // accepts connections and never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let embedder = OpenAiEmbedder::new(EmbeddingConfig {
            base_url: format!("http://{addr}"),
            timeout: std::time::Duration::from_millis(100),
            ..EmbeddingConfig::default()
        })
        .unwrap();
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), embedder.embed("Hallo"))
            .await
            .expect("client timeout should fire first");
        assert!(matches!(result, Err(RetrievalError::Embedding(_))));
        server.abort();
    }
}

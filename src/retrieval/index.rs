//! Vector index collaborators.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::IndexConfig;
use crate::error::RetrievalError;

/// Metadata stored with each indexed chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchMetadata {
    pub text: String,
    /// Source page URL.
    pub source: String,
}

/// One nearest-neighbor hit, best first.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMatch {
    pub id: String,
    pub score: f32,
    pub metadata: Option<MatchMetadata>,
}

/// Nearest-neighbor search. Must be safe for concurrent queries.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<IndexMatch>, RetrievalError>;
}

// ── Pinecone ────────────────────────────────────────────────────────

/// Keys the crawler has used for the page URL, in lookup order.
const SOURCE_KEYS: &[&str] = &["source-url", "source_url", "url", "source"];

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<WireMatch>,
}

#[derive(Debug, Deserialize)]
struct WireMatch {
    id: String,
    #[serde(default)]
    score: f32,
    metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl WireMatch {
    fn into_match(self) -> IndexMatch {
        let metadata = self.metadata.and_then(|meta| {
            let text = meta.get("text")?.as_str()?.to_string();
            let source = SOURCE_KEYS
                .iter()
                .find_map(|k| meta.get(*k).and_then(|v| v.as_str()))
                .unwrap_or_default()
                .to_string();
            Some(MatchMetadata { text, source })
        });
        IndexMatch {
            id: self.id,
            score: self.score,
            metadata,
        }
    }
}

/// Pinecone data-plane client.
pub struct PineconeIndex {
    client: Client,
    config: IndexConfig,
}

impl PineconeIndex {
    pub fn new(config: IndexConfig) -> Result<Self, RetrievalError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RetrievalError::Index(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn query_url(&self) -> String {
        let host = self.config.host.trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            format!("{host}/query")
        } else {
            format!("https://{host}/query")
        }
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<IndexMatch>, RetrievalError> {
        let request = QueryRequest {
            vector,
            top_k,
            include_metadata,
            namespace: self.config.namespace.as_deref(),
        };
        let response = self
            .client
            .post(self.query_url())
            .header("Api-Key", self.config.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| RetrievalError::Index(format!("Index request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(RetrievalError::Index(format!("Index query failed: {status} - {text}")));
        }

        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::Index(format!("Failed to parse index response: {e}")))?;
        Ok(parsed.matches.into_iter().map(WireMatch::into_match).collect())
    }
}

// ── In-memory ───────────────────────────────────────────────────────

/// A chunk held by [`InMemoryIndex`].
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub source: String,
}

/// Brute-force cosine index for tests and local runs.
#[derive(Default)]
pub struct InMemoryIndex {
    chunks: RwLock<Vec<IndexedChunk>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a chunk by id.
    pub async fn upsert(&self, chunk: IndexedChunk) {
        let mut chunks = self.chunks.write().await;
        match chunks.iter_mut().find(|c| c.id == chunk.id) {
            Some(existing) => *existing = chunk,
            None => chunks.push(chunk),
        }
    }

    pub async fn len(&self) -> usize {
        self.chunks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.chunks.read().await.is_empty()
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<IndexMatch>, RetrievalError> {
        let chunks = self.chunks.read().await;
        let mut scored: Vec<(f32, &IndexedChunk)> = chunks
            .iter()
            .map(|c| (cosine_similarity(vector, &c.vector), c))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, c)| IndexMatch {
                id: c.id.clone(),
                score,
                metadata: include_metadata.then(|| MatchMetadata {
                    text: c.text.clone(),
                    source: c.source.clone(),
                }),
            })
            .collect())
    }
}

/// Cosine similarity; 0.0 for mismatched or zero-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

impl std::fmt::Debug for PineconeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PineconeIndex")
            .field("host", &self.config.host)
            .field("namespace", &self.config.namespace)
            .finish()
    }
}

//! Grounded question answering over the website index.
//!
//! A question goes through four steps:
//! 1. `consolidate_query` folds the last exchanges into a standalone question
//! 2. `retrieve` embeds it and asks the vector index for `top_k` passages
//! 3. `group_by_source` merges passages per page
//! 4. `answer` writes a short reply citing the pages as markdown links
//!
//! An empty index result never reaches the model; the reply is the contact
//! page fallback.

pub mod citations;
pub mod embedding;
pub mod index;
pub mod prompts;

pub use citations::{Citation, extract_citations};
pub use embedding::{Embedder, OpenAiEmbedder};
pub use index::{InMemoryIndex, IndexMatch, IndexedChunk, MatchMetadata, PineconeIndex, VectorIndex};

use std::sync::Arc;

use crate::config::AssistantConfig;
use crate::conversation::ConversationHistory;
use crate::error::RetrievalError;
use crate::lead::LeadRecord;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, RetryConfig, Role, with_retry};

/// A passage returned by the index for one query.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedPassage {
    pub source: String,
    pub text: String,
    /// 1-based position in the index result.
    pub rank: usize,
}

/// Passages merged per source, in order of first appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupedContent {
    groups: Vec<(String, String)>,
}

impl GroupedContent {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|(s, _)| s.as_str())
    }

    /// Concatenated text for one source.
    pub fn get(&self, source: &str) -> Option<&str> {
        self.groups
            .iter()
            .find(|(s, _)| s == source)
            .map(|(_, t)| t.as_str())
    }

    /// Prompt context: one `SOURCE`/`CONTENT` block per page. Empty string
    /// when there is nothing to render.
    pub fn render(&self) -> String {
        self.groups
            .iter()
            .map(|(source, text)| format!("SOURCE: {source}\nCONTENT:\n{text}"))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Retrieval settings, usually taken from [`AssistantConfig`].
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub consolidation_window: usize,
    pub char_limit: usize,
    pub word_limit: usize,
    pub limit_tolerance: f32,
    pub contact_label: String,
    pub contact_url: String,
    pub fallback_reply: String,
    pub temperature: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self::from_assistant(&AssistantConfig::default())
    }
}

impl RetrievalConfig {
    pub fn from_assistant(config: &AssistantConfig) -> Self {
        Self {
            top_k: config.top_k,
            consolidation_window: config.consolidation_window,
            char_limit: config.answer_char_limit,
            word_limit: config.answer_word_limit,
            limit_tolerance: config.limit_tolerance,
            contact_label: config.contact_label.clone(),
            contact_url: config.contact_url.clone(),
            fallback_reply: config.contact_fallback(),
            temperature: config.temperature,
        }
    }
}

/// The "answer from knowledge base" action.
pub struct RetrievalEngine {
    llm: Arc<dyn LlmProvider>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    config: RetrievalConfig,
    retry: RetryConfig,
}

impl RetrievalEngine {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        config: RetrievalConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            llm,
            embedder,
            index,
            config,
            retry,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Rewrite a follow-up into a standalone question.
    ///
    /// Returns `raw_query` unchanged when there is no completed exchange.
    pub async fn consolidate_query(
        &self,
        raw_query: &str,
        history: &ConversationHistory,
    ) -> Result<String, RetrievalError> {
        let exchanges = history.recent_exchanges(self.config.consolidation_window);
        if exchanges.is_empty() {
            return Ok(raw_query.to_string());
        }
        let prompt = prompts::consolidation_prompt(raw_query, &exchanges);
        let response = with_retry(&self.retry, "consolidate_query", || {
            let request = CompletionRequest::new(vec![ChatMessage::user(prompt.clone())])
                .with_temperature(0.0);
            self.llm.complete(request)
        })
        .await?;

        let standalone = response.content.trim().trim_matches('"').trim();
        if standalone.is_empty() {
            return Ok(raw_query.to_string());
        }
        tracing::debug!(raw_query, standalone, "Consolidated query");
        Ok(standalone.to_string())
    }

    /// Embed `query` and fetch exactly `top_k` candidates with metadata.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedPassage>, RetrievalError> {
        let vector = self.embedder.embed(query).await?;
        embedding::check_dimensions(self.embedder.dimensions(), &vector)?;
        let matches = self.index.query(&vector, top_k, true).await?;

        let passages: Vec<RetrievedPassage> = matches
            .into_iter()
            .enumerate()
            .filter_map(|(i, m)| {
                let Some(meta) = m.metadata else {
                    tracing::debug!(id = %m.id, "Index match without metadata, skipping");
                    return None;
                };
                Some(RetrievedPassage {
                    source: meta.source,
                    text: meta.text,
                    rank: i + 1,
                })
            })
            .collect();
        tracing::debug!(query, passages = passages.len(), "Retrieved passages");
        Ok(passages)
    }

    /// Merge passages per source, keeping retrieval order and prefixing each
    /// passage with `- `.
    pub fn group_by_source(passages: &[RetrievedPassage]) -> GroupedContent {
        let mut groups: Vec<(String, String)> = Vec::new();
        for passage in passages {
            let text = passage.text.trim();
            if text.is_empty() {
                continue;
            }
            let bullet = format!("- {text}");
            match groups.iter_mut().find(|(s, _)| *s == passage.source) {
                Some((_, merged)) => {
                    merged.push('\n');
                    merged.push_str(&bullet);
                }
                None => groups.push((passage.source.clone(), bullet)),
            }
        }
        GroupedContent { groups }
    }

    /// Write the grounded answer.
    ///
    /// Never returns an empty string: no content, or an empty completion,
    /// yields the contact page fallback.
    pub async fn answer(
        &self,
        raw_query: &str,
        grouped: &GroupedContent,
        history: &ConversationHistory,
        lead: Option<&LeadRecord>,
    ) -> Result<String, RetrievalError> {
        if grouped.is_empty() {
            tracing::debug!(raw_query, "No retrieved content, answering with contact fallback");
            return Ok(self.config.fallback_reply.clone());
        }

        let rules = prompts::AnswerRules {
            char_limit: self.config.char_limit,
            word_limit: self.config.word_limit,
            contact_label: &self.config.contact_label,
            contact_url: &self.config.contact_url,
        };
        let lead_summary = lead.map(LeadRecord::summary);
        let mut messages = vec![ChatMessage::system(prompts::answer_system_prompt(
            &rules,
            &grouped.render(),
            lead_summary.as_deref(),
        ))];
        messages.extend(
            history
                .turns()
                .iter()
                .filter(|t| matches!(t.role, Role::User | Role::Assistant))
                .map(|t| t.to_message()),
        );
        let ends_with_query = history
            .last()
            .is_some_and(|t| t.role == Role::User && t.content == raw_query);
        if !ends_with_query {
            messages.push(ChatMessage::user(raw_query));
        }

        let response = with_retry(&self.retry, "answer", || {
            let request =
                CompletionRequest::new(messages.clone()).with_temperature(self.config.temperature);
            self.llm.complete(request)
        })
        .await?;

        let answer = response.content.trim();
        if answer.is_empty() {
            tracing::warn!(
                conversation_id = history.conversation_id(),
                "Model returned an empty answer, using contact fallback"
            );
            return Ok(self.config.fallback_reply.clone());
        }
        self.check_answer(history.conversation_id(), answer, grouped);
        Ok(answer.to_string())
    }

    /// consolidate → retrieve → group → answer.
    pub async fn chat(
        &self,
        query: &str,
        history: &ConversationHistory,
        lead: Option<&LeadRecord>,
    ) -> Result<String, RetrievalError> {
        let standalone = match self.consolidate_query(query, history).await {
            Ok(q) => q,
            Err(e) => {
                tracing::warn!(
                    conversation_id = history.conversation_id(),
                    error = %e,
                    "Query consolidation failed, searching with the raw query"
                );
                query.to_string()
            }
        };
        let passages = self.retrieve(&standalone, self.config.top_k).await?;
        let grouped = Self::group_by_source(&passages);
        self.answer(query, &grouped, history, lead).await
    }

    /// Log answers that break the length or citation contract.
    fn check_answer(&self, conversation_id: &str, answer: &str, grouped: &GroupedContent) {
        let tolerance = 1.0 + self.config.limit_tolerance.max(0.0);
        let chars = answer.chars().count();
        let words = answer.split_whitespace().count();
        if chars as f32 > self.config.char_limit as f32 * tolerance
            || words as f32 > self.config.word_limit as f32 * tolerance
        {
            tracing::warn!(
                conversation_id,
                chars,
                words,
                "Answer exceeds the configured length"
            );
        }

        let cited = extract_citations(answer);
        if cited.is_empty() {
            tracing::warn!(conversation_id, "Answer cites no source");
            return;
        }
        let mut allowed: Vec<&str> = grouped.sources().collect();
        allowed.push(&self.config.contact_url);
        let foreign = citations::foreign_citations(&cited, &allowed);
        if !foreign.is_empty() {
            tracing::warn!(conversation_id, ?foreign, "Answer cites URLs that were not retrieved");
        }
    }
}

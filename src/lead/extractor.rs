//! Lead extraction from conversation transcripts.

use std::sync::Arc;

use crate::error::{ExtractionError, LlmError};
use crate::lead::model::{LeadFields, LeadRecord, LeadSchema};
use crate::lead::prompts;
use crate::llm::structured::call_function;
use crate::llm::{ChatMessage, LlmProvider, RetryConfig, ToolDefinition};

/// Turns a transcript into a [`LeadRecord`] through a forced function call.
///
/// The model output is never trusted for shape: missing keys are filled,
/// placeholders like `"None"` become null and keys come out in schema order.
pub struct LeadExtractor {
    llm: Arc<dyn LlmProvider>,
    schema: LeadSchema,
    retry: RetryConfig,
}

impl LeadExtractor {
    pub fn new(llm: Arc<dyn LlmProvider>, schema: LeadSchema, retry: RetryConfig) -> Self {
        Self { llm, schema, retry }
    }

    pub fn schema(&self) -> &LeadSchema {
        &self.schema
    }

    fn tool(&self) -> ToolDefinition {
        ToolDefinition {
            name: prompts::EXTRACTION_FUNCTION.to_string(),
            description: "Record the lead information found in the conversation".to_string(),
            parameters: self.schema.json_schema(),
        }
    }

    /// Extract field values from a transcript.
    pub async fn extract_fields(&self, conversation_text: &str) -> Result<LeadFields, ExtractionError> {
        if conversation_text.trim().is_empty() {
            return Ok(LeadFields::empty(&self.schema));
        }
        let messages = vec![
            ChatMessage::system(prompts::extraction_system_prompt(&self.schema)),
            ChatMessage::user(conversation_text),
        ];
        let arguments = call_function(self.llm.as_ref(), messages, &self.tool(), 0.0, &self.retry)
            .await
            .map_err(|e| match e {
                LlmError::InvalidResponse { reason, .. } => ExtractionError::Parsing(reason),
                LlmError::Json(e) => ExtractionError::Parsing(e.to_string()),
                other => ExtractionError::Llm(other),
            })?;
        LeadFields::from_json(&self.schema, &arguments)
    }

    /// Extract a full record for one conversation.
    pub async fn extract(
        &self,
        conversation_id: &str,
        user_id: Option<&str>,
        conversation_text: &str,
    ) -> Result<LeadRecord, ExtractionError> {
        let fields = self.extract_fields(conversation_text).await?;
        tracing::info!(
            conversation_id,
            filled = fields.filled(),
            total = fields.len(),
            "Lead extracted"
        );
        Ok(LeadRecord::new(
            conversation_id,
            user_id.map(str::to_string),
            fields,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use rust_decimal::Decimal;

    use super::*;
    use crate::llm::{
        CompletionRequest, CompletionResponse, FinishReason, ToolCall, ToolCompletionRequest,
        ToolCompletionResponse,
    };

    /// Returns a fixed argument payload and remembers the request.
    struct FixedExtraction {
        arguments: serde_json::Value,
        last: Mutex<Option<ToolCompletionRequest>>,
    }

    #[async_trait]
    impl LlmProvider for FixedExtraction {
        fn model_name(&self) -> &str {
            "mock"
        }
        fn cost_per_token(&self) -> (Decimal, Decimal) {
            (Decimal::ZERO, Decimal::ZERO)
        }
        async fn complete(&self, _req: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            unimplemented!()
        }
        async fn complete_with_tools(
            &self,
            req: ToolCompletionRequest,
        ) -> Result<ToolCompletionResponse, LlmError> {
            *self.last.lock().unwrap() = Some(req);
            Ok(ToolCompletionResponse {
                content: None,
                tool_calls: vec![ToolCall {
                    id: "call_1".into(),
                    name: prompts::EXTRACTION_FUNCTION.into(),
                    arguments: self.arguments.clone(),
                }],
                input_tokens: 0,
                output_tokens: 0,
                finish_reason: FinishReason::ToolUse,
            })
        }
    }

    fn extractor(arguments: serde_json::Value) -> (Arc<FixedExtraction>, LeadExtractor) {
        let llm = Arc::new(FixedExtraction {
            arguments,
            last: Mutex::new(None),
        });
        let extractor = LeadExtractor::new(llm.clone(), LeadSchema::default(), RetryConfig::none());
        (llm, extractor)
    }

    #[tokio::test]
    async fn extraction_is_deterministic_and_complete() {
        let (llm, extractor) = extractor(serde_json::json!({
            "name": "Merten",
            "company": "TCW GmbH",
            "email": "merten@example.com",
            "role": "None"
        }));
        let record = extractor
            .extract("conv-1", Some("user-1"), "user: Ich bin Merten\n")
            .await
            .unwrap();

        assert_eq!(record.get("name"), Some("Merten"));
        assert_eq!(record.get("role"), None);
        assert_eq!(record.fields.len(), 10);
        assert_eq!(record.user_id.as_deref(), Some("user-1"));

        let request = llm.last.lock().unwrap().take().unwrap();
        assert_eq!(request.temperature, Some(0.0));
        assert_eq!(request.tools[0].name, "extract_lead_data");
    }

    #[tokio::test]
    async fn non_object_arguments_are_a_parsing_error() {
        let (_, extractor) = extractor(serde_json::Value::String("not json".into()));
        let err = extractor.extract_fields("user: Hallo\n").await.unwrap_err();
        assert!(matches!(err, ExtractionError::Parsing(_)));
    }

    #[tokio::test]
    async fn empty_transcript_skips_the_model() {
        let (llm, extractor) = extractor(serde_json::json!({"name": "ignored"}));
        let fields = extractor.extract_fields("  ").await.unwrap();
        assert_eq!(fields.filled(), 0);
        assert!(llm.last.lock().unwrap().is_none());
    }
}

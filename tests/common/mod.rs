//! Scripted collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;

use lead_assist::config::AssistantConfig;
use lead_assist::error::{LlmError, RetrievalError};
use lead_assist::lead::{DialogueConfig, LeadDialogue, LeadExtractor};
use lead_assist::llm::{
    CompletionRequest, CompletionResponse, FinishReason, LlmProvider, RetryConfig, ToolCall,
    ToolCompletionRequest, ToolCompletionResponse,
};
use lead_assist::orchestrator::{ANSWER_FUNCTION, Orchestrator, OrchestratorDeps, QUALIFY_FUNCTION};
use lead_assist::retrieval::{Embedder, InMemoryIndex, RetrievalConfig, RetrievalEngine};
use lead_assist::store::LeadStore;

/// One scripted model response.
pub enum Step {
    Text(String),
    Call(String, serde_json::Value),
    Fail,
}

pub fn route_qualify() -> Step {
    Step::Call(QUALIFY_FUNCTION.into(), serde_json::json!({"query": "lead"}))
}

pub fn route_answer(query: &str) -> Step {
    Step::Call(ANSWER_FUNCTION.into(), serde_json::json!({"query": query}))
}

pub fn dialogue(reply: &str, status: &str) -> Step {
    Step::Call(
        lead_assist::lead::prompts::DIALOGUE_FUNCTION.into(),
        serde_json::json!({"reply": reply, "status": status}),
    )
}

pub fn extraction(arguments: serde_json::Value) -> Step {
    Step::Call(lead_assist::lead::prompts::EXTRACTION_FUNCTION.into(), arguments)
}

/// Pops one step per request; an exhausted script fails every call.
#[derive(Default)]
pub struct ScriptedLlm {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<usize>,
}

impl ScriptedLlm {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(0),
        })
    }

    pub fn push(&self, step: Step) {
        self.steps.lock().unwrap().push_back(step);
    }

    pub fn remaining(&self) -> usize {
        self.steps.lock().unwrap().len()
    }

    pub fn requests(&self) -> usize {
        *self.requests.lock().unwrap()
    }

    fn next(&self) -> Step {
        *self.requests.lock().unwrap() += 1;
        self.steps.lock().unwrap().pop_front().unwrap_or(Step::Fail)
    }
}

fn scripted_failure() -> LlmError {
    LlmError::AuthFailed {
        provider: "scripted".into(),
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn model_name(&self) -> &str {
        "scripted"
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        (Decimal::ZERO, Decimal::ZERO)
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        match self.next() {
            Step::Text(content) => Ok(CompletionResponse {
                content,
                input_tokens: 10,
                output_tokens: 10,
                finish_reason: FinishReason::Stop,
                response_id: None,
            }),
            _ => Err(scripted_failure()),
        }
    }

    async fn complete_with_tools(
        &self,
        _request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        match self.next() {
            Step::Call(name, arguments) => Ok(ToolCompletionResponse {
                content: None,
                tool_calls: vec![ToolCall {
                    id: "call_1".into(),
                    name,
                    arguments,
                }],
                input_tokens: 10,
                output_tokens: 10,
                finish_reason: FinishReason::ToolUse,
            }),
            Step::Text(content) => Ok(ToolCompletionResponse {
                content: Some(content),
                tool_calls: vec![],
                input_tokens: 10,
                output_tokens: 10,
                finish_reason: FinishReason::Stop,
            }),
            Step::Fail => Err(scripted_failure()),
        }
    }
}

/// Maps every text to the same unit vector.
pub struct UnitEmbedder;

#[async_trait]
impl Embedder for UnitEmbedder {
    fn dimensions(&self) -> usize {
        2
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, RetrievalError> {
        Ok(vec![1.0, 0.0])
    }
}

pub fn retrieval_engine(llm: Arc<ScriptedLlm>, index: Arc<InMemoryIndex>) -> RetrievalEngine {
    RetrievalEngine::new(
        llm,
        Arc::new(UnitEmbedder),
        index,
        RetrievalConfig::from_assistant(&AssistantConfig::default()),
        RetryConfig::none(),
    )
}

pub fn orchestrator(
    llm: Arc<ScriptedLlm>,
    index: Arc<InMemoryIndex>,
    store: Option<Arc<dyn LeadStore>>,
) -> Orchestrator {
    let config = AssistantConfig::default();
    let retry = RetryConfig::none();
    let deps = OrchestratorDeps {
        llm: llm.clone(),
        retrieval: Arc::new(retrieval_engine(llm.clone(), index)),
        dialogue: Arc::new(LeadDialogue::new(
            llm.clone(),
            DialogueConfig::from_assistant(&config),
            retry.clone(),
        )),
        extractor: Arc::new(LeadExtractor::new(
            llm,
            config.lead_schema.clone(),
            retry.clone(),
        )),
        store,
    };
    Orchestrator::new(config, deps, retry, None)
}

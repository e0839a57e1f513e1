//! Dialogue orchestrator — owns conversation history and the lead
//! qualification state machine.
//!
//! Per turn: route, dispatch to retrieval or the lead dialogue, commit the
//! exchange, and start lead extraction when qualification succeeds.
//!
//! - `routing`: the two-action function menu and its parser
//! - `session`: per-conversation state and the registry serializing it

pub mod routing;
pub mod session;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::AssistantConfig;
use crate::conversation::{ConversationHistory, ConversationTurn, LeadQualificationState, Transition};
use crate::error::TurnError;
use crate::lead::{LeadDialogue, LeadExtractor, LeadRecord};
use crate::llm::{LlmProvider, RetryConfig};
use crate::retrieval::RetrievalEngine;
use crate::store::{ConversationTurnRecord, LeadStore};

pub use routing::{ANSWER_FUNCTION, QUALIFY_FUNCTION, Router, RoutingDecision, routing_tools};
pub use session::{ConversationRegistry, Session, SharedLead, spawn_pruning_task};

/// Shared components the orchestrator delegates to.
pub struct OrchestratorDeps {
    /// Model used for the routing decision.
    pub llm: Arc<dyn LlmProvider>,
    pub retrieval: Arc<RetrievalEngine>,
    pub dialogue: Arc<LeadDialogue>,
    pub extractor: Arc<LeadExtractor>,
    pub store: Option<Arc<dyn LeadStore>>,
}

/// Which component produced a turn's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnAction {
    Retrieve,
    Qualify,
    /// A component failed; the canned reply was sent and nothing committed.
    Degraded,
}

/// Result of one handled turn.
#[derive(Debug)]
pub struct TurnOutcome {
    pub reply: String,
    pub action: TurnAction,
    pub lead_state: LeadQualificationState,
    /// Lead extraction started by this turn, if qualification just succeeded.
    pub lead_task: Option<JoinHandle<Option<LeadRecord>>>,
}

pub struct Orchestrator {
    config: AssistantConfig,
    deps: OrchestratorDeps,
    router: Router,
    sessions: Arc<ConversationRegistry>,
}

impl Orchestrator {
    pub fn new(
        config: AssistantConfig,
        deps: OrchestratorDeps,
        retry: RetryConfig,
        sessions: Option<Arc<ConversationRegistry>>,
    ) -> Self {
        let router = Router::new(Arc::clone(&deps.llm), retry);
        Self {
            config,
            deps,
            router,
            sessions: sessions.unwrap_or_else(ConversationRegistry::new),
        }
    }

    pub fn config(&self) -> &AssistantConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<ConversationRegistry> {
        &self.sessions
    }

    /// Fresh history: system instruction, then the greeting.
    pub fn start_conversation(&self, conversation_id: &str) -> ConversationHistory {
        let mut history = ConversationHistory::new(conversation_id);
        history.push(ConversationTurn::system(&self.config.system_prompt));
        history.push(ConversationTurn::assistant(&self.config.greeting));
        history
    }

    /// Fresh session around [`start_conversation`](Self::start_conversation).
    pub fn new_session(&self, conversation_id: &str, user_id: Option<&str>) -> Session {
        let history = self.start_conversation(conversation_id);
        let history = match user_id {
            Some(user_id) => history.with_user_id(user_id),
            None => history,
        };
        Session::new(history)
    }

    /// Handle a message for a registered conversation, creating the session
    /// on first contact. Turns of one conversation are serialized.
    pub async fn handle_message(
        &self,
        conversation_id: &str,
        user_id: Option<&str>,
        user_message: &str,
    ) -> TurnOutcome {
        let session = self
            .sessions
            .get_or_insert_with(conversation_id, || self.new_session(conversation_id, user_id))
            .await;
        let mut session = session.lock().await;
        self.handle_turn_detailed(&mut session, user_message).await
    }

    /// Handle one user message and return the reply.
    pub async fn handle_turn(&self, session: &mut Session, user_message: &str) -> String {
        self.handle_turn_detailed(session, user_message).await.reply
    }

    /// Handle one user message.
    ///
    /// The exchange is built on a copy of the history and swapped in only once
    /// the reply exists, so dropping this future leaves the session untouched.
    pub async fn handle_turn_detailed(&self, session: &mut Session, user_message: &str) -> TurnOutcome {
        let conversation_id = session.conversation_id().to_string();
        let mut staged = session.history.clone();
        staged.push(ConversationTurn::user(user_message));

        let decision = self.route(&conversation_id, session.lead_state, &staged).await;
        info!(conversation_id = %conversation_id, action = decision.action(), "Routed turn");

        let result = match decision {
            RoutingDecision::Qualify(_) => self
                .deps
                .dialogue
                .advance(user_message, &staged)
                .await
                .map(|turn| (turn.reply, TurnAction::Qualify, Some(turn.status)))
                .map_err(|source| TurnError::UpstreamModel {
                    conversation_id: conversation_id.clone(),
                    source,
                }),
            RoutingDecision::Retrieve(_) | RoutingDecision::DirectAnswer(_) => {
                let lead = session.lead().await;
                self.deps
                    .retrieval
                    .chat(user_message, &staged, lead.as_ref())
                    .await
                    .map(|reply| (reply, TurnAction::Retrieve, None))
                    .map_err(|source| TurnError::Retrieval {
                        conversation_id: conversation_id.clone(),
                        source,
                    })
            }
        };

        let (reply, action, status) = match result {
            Ok(done) => done,
            Err(e) => {
                error!(conversation_id = %conversation_id, error = %e, "Turn failed, sending degraded reply");
                return TurnOutcome {
                    reply: self.degraded_reply(),
                    action: TurnAction::Degraded,
                    lead_state: session.lead_state,
                    lead_task: None,
                };
            }
        };

        staged.push(ConversationTurn::assistant(&reply));
        session.history = staged;
        session.touch();
        self.persist_turn(&session.history, user_message, &reply);

        let mut lead_task = None;
        if let Some(status) = status {
            match session.lead_state.apply(status) {
                Transition::Completed => {
                    info!(conversation_id = %conversation_id, "Lead qualification succeeded");
                    lead_task = Some(self.spawn_extraction(session));
                }
                Transition::Aborted => {
                    info!(conversation_id = %conversation_id, "Lead qualification aborted by visitor");
                }
                Transition::Unchanged => {}
            }
        }

        TurnOutcome {
            reply,
            action,
            lead_state: session.lead_state,
            lead_task,
        }
    }

    /// Pick the action for a staged turn. Never fails: ambiguity or upstream
    /// errors fall back to retrieval, and a closed lead flow is never
    /// re-entered.
    async fn route(
        &self,
        conversation_id: &str,
        lead_state: LeadQualificationState,
        staged: &ConversationHistory,
    ) -> RoutingDecision {
        let raw = || {
            staged
                .last()
                .map(|t| t.content.clone())
                .unwrap_or_default()
        };
        match self.router.decide(staged.to_messages()).await {
            Ok(RoutingDecision::Qualify(query)) if !lead_state.accepts_qualification() => {
                debug!(conversation_id, state = %lead_state, "Lead flow closed, answering instead");
                RoutingDecision::Retrieve(query)
            }
            Ok(RoutingDecision::DirectAnswer(text)) => {
                warn!(
                    conversation_id,
                    chars = text.chars().count(),
                    "Router answered without choosing an action, using retrieval"
                );
                RoutingDecision::DirectAnswer(text)
            }
            Ok(decision) => decision,
            Err(e) => {
                warn!(conversation_id, error = %e, "Routing failed, using retrieval");
                RoutingDecision::Retrieve(raw())
            }
        }
    }

    fn degraded_reply(&self) -> String {
        format!(
            "Entschuldigung, da ist gerade etwas schiefgelaufen. Bitte versuchen Sie es später erneut oder schreiben Sie uns: [{}]({})",
            self.config.contact_label, self.config.contact_url
        )
    }

    /// Write the exchange in the background. Failures are only logged.
    fn persist_turn(&self, history: &ConversationHistory, user_msg: &str, bot_msg: &str) {
        let Some(store) = self.deps.store.clone() else {
            return;
        };
        let record = ConversationTurnRecord::new(
            history.conversation_id(),
            history.user_id().map(str::to_string),
            user_msg,
            bot_msg,
        );
        tokio::spawn(async move {
            if let Err(e) = store.write_conversation_turn(&record).await {
                warn!(conversation_id = %record.conversation_id, error = %e, "Failed to persist turn");
            }
        });
    }

    /// Extract the lead from the committed history, publish it to the session
    /// and hand it to the store.
    fn spawn_extraction(&self, session: &Session) -> JoinHandle<Option<LeadRecord>> {
        let extractor = Arc::clone(&self.deps.extractor);
        let store = self.deps.store.clone();
        let slot = Arc::clone(&session.lead);
        let conversation_id = session.conversation_id().to_string();
        let user_id = session.history.user_id().map(str::to_string);
        let transcript = session.history.transcript();

        tokio::spawn(async move {
            let record = match extractor
                .extract(&conversation_id, user_id.as_deref(), &transcript)
                .await
            {
                Ok(record) => record,
                Err(e) => {
                    warn!(conversation_id = %conversation_id, error = %e, "Lead extraction failed, skipping persistence");
                    return None;
                }
            };
            *slot.write().await = Some(record.clone());
            if let Some(store) = store {
                if let Err(e) = store.write_lead_record(&record).await {
                    warn!(conversation_id = %conversation_id, error = %e, "Failed to persist lead");
                }
            }
            Some(record)
        })
    }
}

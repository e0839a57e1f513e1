//! Per-conversation sessions and the registry that serializes them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::conversation::{ConversationHistory, LeadQualificationState};
use crate::lead::LeadRecord;

/// Lead slot shared between a session and its extraction task.
pub type SharedLead = Arc<RwLock<Option<LeadRecord>>>;

/// Everything the orchestrator keeps for one conversation.
#[derive(Debug)]
pub struct Session {
    pub history: ConversationHistory,
    pub lead_state: LeadQualificationState,
    /// Filled once the lead has been extracted.
    pub lead: SharedLead,
    last_active: Instant,
}

impl Session {
    pub fn new(history: ConversationHistory) -> Self {
        Self {
            history,
            lead_state: LeadQualificationState::default(),
            lead: Arc::new(RwLock::new(None)),
            last_active: Instant::now(),
        }
    }

    pub fn conversation_id(&self) -> &str {
        self.history.conversation_id()
    }

    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_active.elapsed()
    }

    /// The extracted lead, if extraction has finished.
    pub async fn lead(&self) -> Option<LeadRecord> {
        self.lead.read().await.clone()
    }
}

/// What survives pruning of a conversation whose lead flow has closed.
#[derive(Debug, Clone)]
struct ClosedLead {
    state: LeadQualificationState,
    lead: SharedLead,
}

/// Live conversations keyed by conversation id.
///
/// Each session sits behind its own mutex, so turns of one conversation run
/// one at a time while different conversations proceed in parallel. The map
/// lock is held only to look a session up.
///
/// Pruning drops history but not a terminal lead state: a conversation that
/// returns after its session was pruned resumes as Success or Aborted.
#[derive(Default)]
pub struct ConversationRegistry {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    closed: RwLock<HashMap<String, ClosedLead>>,
}

impl ConversationRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn get(&self, conversation_id: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.read().await.get(conversation_id).cloned()
    }

    /// Existing session for `conversation_id`, or a new one from `create`.
    /// A lead state closed before the session was pruned is restored.
    pub async fn get_or_insert_with(
        &self,
        conversation_id: &str,
        create: impl FnOnce() -> Session,
    ) -> Arc<Mutex<Session>> {
        if let Some(session) = self.get(conversation_id).await {
            return session;
        }
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get(conversation_id) {
            return Arc::clone(session);
        }

        let mut session = create();
        if let Some(closed) = self.closed.write().await.remove(conversation_id) {
            debug!(conversation_id, state = %closed.state, "Restoring closed lead flow");
            session.lead_state = closed.state;
            session.lead = closed.lead;
        } else {
            debug!(conversation_id, "New conversation session");
        }
        let session = Arc::new(Mutex::new(session));
        sessions.insert(conversation_id.to_string(), Arc::clone(&session));
        session
    }

    pub async fn remove(&self, conversation_id: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.write().await.remove(conversation_id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Drop sessions idle for at least `idle_timeout`. Sessions with a turn
    /// in flight are kept. Returns the number removed.
    pub async fn prune_stale(&self, idle_timeout: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let mut closed = self.closed.write().await;
        let before = sessions.len();
        sessions.retain(|conversation_id, session| match session.try_lock() {
            Ok(s) if s.idle_for() >= idle_timeout => {
                if s.lead_state.is_terminal() {
                    closed.insert(
                        conversation_id.clone(),
                        ClosedLead {
                            state: s.lead_state,
                            lead: Arc::clone(&s.lead),
                        },
                    );
                }
                false
            }
            _ => true,
        });
        let pruned = before - sessions.len();
        if pruned > 0 {
            info!(pruned, remaining = sessions.len(), "Pruned idle conversations");
        }
        pruned
    }
}

/// Prune idle sessions every `every`.
pub fn spawn_pruning_task(
    registry: Arc<ConversationRegistry>,
    every: Duration,
    idle_timeout: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await; // first tick fires immediately
        loop {
            interval.tick().await;
            registry.prune_stale(idle_timeout).await;
        }
    })
}

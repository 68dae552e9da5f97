//! In-process session state.
//!
//! The session map is guarded by a short-held `RwLock` used only to look up
//! or insert an entry. Everything else lives behind per-session locks, so
//! turns on different sessions never contend with each other.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, warn};

use hirewire_core::domain::session::Message;
use hirewire_core::domain::usage::TokenUsage;
use hirewire_db::repositories::{AppliedJobRepository, ConversationRepository};

use crate::evaluator::{Evaluator, EvaluatorSettings};
use crate::llm::LlmClient;
use crate::tools::job_search::{JobSearchSession, JobSearchSettings, SearchProvider};

#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub history_limit: u32,
    pub context_budget_bytes: usize,
    pub evaluator: EvaluatorSettings,
    pub search: JobSearchSettings,
}

/// Collaborators every new session is wired to.
#[derive(Clone)]
pub struct SessionResources {
    pub conversations: Arc<dyn ConversationRepository>,
    pub applied_jobs: Arc<dyn AppliedJobRepository>,
    pub search_provider: Arc<dyn SearchProvider>,
    pub judge: Arc<dyn LlmClient>,
}

pub struct SessionState {
    session_id: String,
    history: Mutex<Vec<Message>>,
    seeded: OnceCell<()>,
    usage: Mutex<TokenUsage>,
    evaluator: Evaluator,
    search: Arc<JobSearchSession>,
}

impl SessionState {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn history(&self) -> Vec<Message> {
        self.history.lock().await.clone()
    }

    pub async fn append(&self, messages: impl IntoIterator<Item = Message>) {
        self.history.lock().await.extend(messages);
    }

    /// Adds one turn's usage and returns the new cumulative total.
    pub async fn add_usage(&self, usage: TokenUsage) -> TokenUsage {
        let mut total = self.usage.lock().await;
        *total += usage;
        *total
    }

    pub async fn cumulative_usage(&self) -> TokenUsage {
        *self.usage.lock().await
    }

    pub async fn context_window(&self, budget_bytes: usize) -> Vec<Message> {
        let history = self.history.lock().await;
        context_window(&history, budget_bytes)
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    pub fn search(&self) -> Arc<JobSearchSession> {
        Arc::clone(&self.search)
    }
}

pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<SessionState>>>,
    resources: SessionResources,
    settings: SessionSettings,
}

impl SessionStore {
    pub fn new(resources: SessionResources, settings: SessionSettings) -> Self {
        Self { sessions: RwLock::new(HashMap::new()), resources, settings }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<SessionState>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn get_or_create(&self, session_id: &str) -> Arc<SessionState> {
        if let Some(state) = self.get(session_id).await {
            return state;
        }

        let mut sessions = self.sessions.write().await;
        let state = sessions.entry(session_id.to_string()).or_insert_with(|| {
            debug!(event_name = "session.created", session_id, "created session state");
            Arc::new(self.new_state(session_id))
        });
        Arc::clone(state)
    }

    /// Loads prior history from storage the first time a session is touched
    /// in this process. A failed load leaves the session empty.
    pub async fn ensure_seeded(&self, state: &SessionState) {
        state
            .seeded
            .get_or_init(|| async {
                match self
                    .resources
                    .conversations
                    .load_recent_messages(&state.session_id, self.settings.history_limit)
                    .await
                {
                    Ok(messages) => {
                        debug!(
                            event_name = "session.seeded",
                            session_id = %state.session_id,
                            messages = messages.len(),
                            "seeded history from storage"
                        );
                        let mut history = state.history.lock().await;
                        history.splice(0..0, messages);
                    }
                    Err(error) => warn!(
                        event_name = "session.seed_failed",
                        session_id = %state.session_id,
                        error = %error,
                        "history seeding failed; continuing with an empty history"
                    ),
                }
            })
            .await;
    }

    fn new_state(&self, session_id: &str) -> SessionState {
        SessionState {
            session_id: session_id.to_string(),
            history: Mutex::new(Vec::new()),
            seeded: OnceCell::new(),
            usage: Mutex::new(TokenUsage::default()),
            evaluator: Evaluator::new(
                Arc::clone(&self.resources.judge),
                self.settings.evaluator.clone(),
            ),
            search: Arc::new(JobSearchSession::new(
                Arc::clone(&self.resources.search_provider),
                Arc::clone(&self.resources.applied_jobs),
                self.settings.search.clone(),
            )),
        }
    }
}

/// Newest messages whose combined content fits in `budget_bytes`, oldest
/// first. Stops at the first message that would overflow the budget.
pub fn context_window(history: &[Message], budget_bytes: usize) -> Vec<Message> {
    let mut used = 0usize;
    let mut kept = Vec::new();
    for message in history.iter().rev() {
        let size = message.content.len();
        if used + size > budget_bytes {
            break;
        }
        used += size;
        kept.push(message.clone());
    }
    kept.reverse();
    kept
}

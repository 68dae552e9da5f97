//! Turn coordination: session bookkeeping, routing, tier promotion, quality
//! review and best-effort persistence.
//!
//! [`Orchestrator::run`] and [`Orchestrator::run_streamed`] share
//! `drive_turn`; the blocking variant simply drives it with a detached frame
//! sink.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use hirewire_core::config::AppConfig;
use hirewire_core::domain::evaluation::EvaluatorKind;
use hirewire_core::domain::model::{ModelNode, ModelSelection};
use hirewire_core::domain::session::{Message, Role, TurnScope};
use hirewire_core::domain::tier::ModelTier;
use hirewire_core::domain::usage::TokenUsage;
use hirewire_core::errors::{ApplicationError, DomainError};
use hirewire_db::repositories::{
    AppliedJobRepository, ConversationRepository, CrmRepository, ModelSettingsRepository,
    SaveOutcome,
};

use crate::evaluator::EvaluatorSettings;
use crate::llm::LlmClient;
use crate::pipeline::{PipelineState, PipelineSummary};
use crate::promoter::{forward, PromotionError, TierPromoter};
use crate::runner::{AgentRunner, AgentSpec, InputMessage, RunError, RunEvent, RunResult};
use crate::session::{SessionResources, SessionSettings, SessionStore};
use crate::stream::{FrameEvent, FrameSink, StreamFrame};
use crate::tools::job_search::{JobSearchSettings, SearchProvider};
use crate::tools::{CrmLookupTool, JobSearchTool};
use crate::workers::{build_router, TurnTools, ROUTER};

const EVENT_BUFFER: usize = 64;
const FRAME_BUFFER: usize = 64;
const DEFAULT_TENANT: &str = "default";
const MAX_TITLE_CHARS: usize = 80;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub user_id: String,
    #[serde(default)]
    pub tenant_id: String,
    pub message: String,
    #[serde(default)]
    pub use_evaluator: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub session_id: String,
    pub turn_tokens: TokenUsage,
    pub cumulative_tokens: TokenUsage,
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("model run on `{model}` failed: {source}")]
    Run {
        model: String,
        #[source]
        source: RunError,
    },
    #[error("all model tiers exhausted: {}", tiers.join(", "))]
    TiersExhausted { tiers: Vec<String> },
    #[error("turn cancelled")]
    Cancelled,
}

impl From<PromotionError<RunError>> for TurnError {
    fn from(error: PromotionError<RunError>) -> Self {
        match error {
            PromotionError::Exhausted { tiers } => Self::TiersExhausted { tiers },
            PromotionError::Cancelled
            | PromotionError::Attempt { source: RunError::Cancelled, .. } => Self::Cancelled,
            PromotionError::Attempt { model, source } => Self::Run { model, source },
            PromotionError::Aborted { model, reason } => {
                Self::Run { model, source: RunError::Aborted(reason) }
            }
        }
    }
}

impl From<TurnError> for ApplicationError {
    fn from(error: TurnError) -> Self {
        match error {
            TurnError::InvalidInput(message) => DomainError::InvalidInput(message).into(),
            TurnError::Run { .. } => Self::Integration(error.to_string()),
            TurnError::TiersExhausted { .. } => Self::Timeout(error.to_string()),
            TurnError::Cancelled => Self::Cancelled,
        }
    }
}

/// Everything the orchestrator talks to.
#[derive(Clone)]
pub struct OrchestratorDeps {
    pub runner: Arc<dyn AgentRunner>,
    pub judge: Arc<dyn LlmClient>,
    pub search_provider: Arc<dyn SearchProvider>,
    pub conversations: Arc<dyn ConversationRepository>,
    pub applied_jobs: Arc<dyn AppliedJobRepository>,
    pub model_settings: Arc<dyn ModelSettingsRepository>,
    pub crm: Arc<dyn CrmRepository>,
}

#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
    pub models: ModelSelection,
    pub tiers: Vec<ModelTier>,
    pub evaluator_enabled_by_default: bool,
    pub session: SessionSettings,
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            models: config.models.selection(),
            tiers: config.tier_chain(),
            evaluator_enabled_by_default: config.evaluator.enabled_by_default,
            session: SessionSettings {
                history_limit: config.session.history_limit,
                context_budget_bytes: config.session.context_budget_bytes,
                evaluator: EvaluatorSettings::from_config(&config.evaluator),
                search: JobSearchSettings::from_config(&config.search),
            },
        }
    }
}

struct Attempt {
    text: String,
    usage: TokenUsage,
    last_agent: String,
    model: String,
}

pub struct Orchestrator {
    runner: Arc<dyn AgentRunner>,
    judge: Arc<dyn LlmClient>,
    conversations: Arc<dyn ConversationRepository>,
    model_settings: Arc<dyn ModelSettingsRepository>,
    crm: Arc<dyn CrmRepository>,
    sessions: SessionStore,
    promoter: Option<TierPromoter>,
    models: ModelSelection,
    evaluator_enabled_by_default: bool,
    background: TaskTracker,
}

impl Orchestrator {
    pub fn new(deps: OrchestratorDeps, settings: OrchestratorSettings) -> Self {
        let sessions = SessionStore::new(
            SessionResources {
                conversations: Arc::clone(&deps.conversations),
                applied_jobs: deps.applied_jobs,
                search_provider: deps.search_provider,
                judge: Arc::clone(&deps.judge),
            },
            settings.session,
        );
        let promoter = TierPromoter::new(settings.tiers).ok();

        Self {
            runner: deps.runner,
            judge: deps.judge,
            conversations: deps.conversations,
            model_settings: deps.model_settings,
            crm: deps.crm,
            sessions,
            promoter,
            models: settings.models,
            evaluator_enabled_by_default: settings.evaluator_enabled_by_default,
            background: TaskTracker::new(),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub async fn run(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChatResponse, TurnError> {
        self.drive_turn(request, &FrameSink::detached(), cancel).await
    }

    /// Runs the turn on its own task. The receiver yields frames in order and
    /// closes after a `done` or `error` frame.
    pub fn run_streamed(
        self: &Arc<Self>,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<StreamFrame> {
        let (frames, receiver) = mpsc::channel(FRAME_BUFFER);
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let sink = FrameSink::new(frames);
            if let Err(error) = orchestrator.drive_turn(request, &sink, cancel).await {
                sink.emit(FrameEvent::Error { error: error.to_string() }).await;
            }
        });
        receiver
    }

    /// Waits for queued persistence and title generation to finish.
    pub async fn wait_for_background(&self) {
        self.background.close();
        self.background.wait().await;
        self.background.reopen();
    }

    async fn drive_turn(
        &self,
        request: ChatRequest,
        sink: &FrameSink,
        cancel: CancellationToken,
    ) -> Result<ChatResponse, TurnError> {
        let (scope, message, use_evaluator) = self.validate(request)?;
        let correlation_id = Uuid::new_v4().to_string();
        info!(
            event_name = "turn.start",
            correlation_id = %correlation_id,
            session_id = %scope.session_id,
            user_id = %scope.user_id,
            use_evaluator,
            "turn started"
        );
        sink.emit(FrameEvent::Start).await;

        let state = self.sessions.get_or_create(&scope.session_id).await;
        self.sessions.ensure_seeded(&state).await;
        let models = self.resolve_models(&scope.user_id, &correlation_id).await;

        let budget = self.sessions.settings().context_budget_bytes;
        let mut input: Vec<InputMessage> = state
            .context_window(budget)
            .await
            .into_iter()
            .map(|message| InputMessage { role: message.role, content: message.content })
            .collect();
        input.push(InputMessage::user(message.clone()));

        let router = build_router(
            &models,
            TurnTools {
                job_search: Arc::new(JobSearchTool::new(state.search(), scope.clone())),
                crm_lookup: Arc::new(CrmLookupTool::new(Arc::clone(&self.crm), &scope.tenant_id)),
            },
        );

        let first = self
            .attempt(&router, input.clone(), use_evaluator, TokenUsage::default(), sink, &cancel)
            .await?;
        let mut turn_usage = first.usage;
        let mut final_text = first.text;
        let mut answered_by = first.model;

        if use_evaluator {
            let kind = EvaluatorKind::for_worker(&first.last_agent);
            let evaluator_model = models.model_for(ModelNode::Evaluator);
            sink.emit(FrameEvent::EvalStart).await;
            let verdict =
                state.evaluator().evaluate(evaluator_model, &message, &final_text, kind).await;
            sink.emit(FrameEvent::Eval { eval_result: verdict.clone() }).await;

            if state.evaluator().should_retry(&verdict) {
                let retries = state.evaluator().record_retry();
                info!(
                    event_name = "turn.retry",
                    correlation_id = %correlation_id,
                    score = verdict.score,
                    retries,
                    "evaluator rejected the answer; regenerating once"
                );
                let mut retry_input = input;
                if let Some(last) = retry_input.last_mut() {
                    *last = InputMessage::user(retry_prompt(&message, &verdict.feedback));
                }

                match self.attempt(&router, retry_input, true, turn_usage, sink, &cancel).await {
                    Ok(retry) => {
                        turn_usage += retry.usage;
                        final_text = retry.text;
                        answered_by = retry.model;
                        let kind = EvaluatorKind::for_worker(&retry.last_agent);
                        let second = state
                            .evaluator()
                            .evaluate(evaluator_model, &message, &final_text, kind)
                            .await;
                        sink.emit(FrameEvent::Eval { eval_result: second }).await;
                    }
                    Err(TurnError::Cancelled) => return Err(TurnError::Cancelled),
                    Err(error) => warn!(
                        event_name = "turn.retry_failed",
                        correlation_id = %correlation_id,
                        error = %error,
                        "retry failed; keeping the first answer"
                    ),
                }
            }

            sink.emit(FrameEvent::Text { text: final_text.clone() }).await;
        }

        let cumulative = state.add_usage(turn_usage).await;
        state.append([Message::user(message.clone()), Message::assistant(final_text.clone())]).await;
        self.persist_in_background(
            scope.clone(),
            message,
            final_text.clone(),
            turn_usage,
            models.model_for(ModelNode::Title).to_string(),
            correlation_id.clone(),
        );

        sink.emit(FrameEvent::Done {
            response: final_text.clone(),
            turn_tokens: turn_usage,
            cumulative_tokens: cumulative,
        })
        .await;
        info!(
            event_name = "turn.done",
            correlation_id = %correlation_id,
            session_id = %scope.session_id,
            model = %answered_by,
            turn_total_tokens = turn_usage.total,
            cumulative_total_tokens = cumulative.total,
            "turn finished"
        );

        Ok(ChatResponse {
            response: final_text,
            session_id: scope.session_id,
            turn_tokens: turn_usage,
            cumulative_tokens: cumulative,
        })
    }

    fn validate(&self, request: ChatRequest) -> Result<(TurnScope, String, bool), TurnError> {
        let session_id = request.session_id.trim();
        let user_id = request.user_id.trim();
        let message = request.message.trim();
        if session_id.is_empty() {
            return Err(TurnError::InvalidInput("session_id must not be empty".to_string()));
        }
        if user_id.is_empty() {
            return Err(TurnError::InvalidInput("user_id must not be empty".to_string()));
        }
        if message.is_empty() {
            return Err(TurnError::InvalidInput("message must not be empty".to_string()));
        }
        let tenant_id = match request.tenant_id.trim() {
            "" => DEFAULT_TENANT,
            tenant => tenant,
        };

        Ok((
            TurnScope::new(session_id, user_id, tenant_id),
            message.to_string(),
            request.use_evaluator.unwrap_or(self.evaluator_enabled_by_default),
        ))
    }

    async fn resolve_models(&self, user_id: &str, correlation_id: &str) -> ModelSelection {
        match self.model_settings.list_for_user(user_id).await {
            Ok(rows) => {
                self.models.overlay(rows.iter().map(|(node, model)| (*node, model.as_str())))
            }
            Err(error) => {
                warn!(
                    event_name = "turn.model_settings_failed",
                    correlation_id,
                    error = %error,
                    "per-user model lookup failed; using defaults"
                );
                self.models.clone()
            }
        }
    }

    /// One routed generation, promoted across tiers when configured, with its
    /// events normalized and forwarded to `sink` as they arrive.
    async fn attempt(
        &self,
        router: &AgentSpec,
        input: Vec<InputMessage>,
        buffer_text: bool,
        prior_usage: TokenUsage,
        sink: &FrameSink,
        cancel: &CancellationToken,
    ) -> Result<Attempt, TurnError> {
        let (events, mut received) = mpsc::channel::<RunEvent>(EVENT_BUFFER);

        let run = async {
            let outcome = match &self.promoter {
                Some(promoter) => promoter
                    .drive(
                        |tier, attempt_cancel| {
                            self.runner.run_streamed(
                                router.with_model_everywhere(&tier.model),
                                input.clone(),
                                attempt_cancel,
                            )
                        },
                        &events,
                        cancel,
                    )
                    .await
                    .map(|promoted| (promoted.model, promoted.result)),
                None => {
                    let attempt_cancel = cancel.child_token();
                    let stream = self.runner.run_streamed(
                        router.clone(),
                        input.clone(),
                        attempt_cancel.clone(),
                    );
                    forward(stream, &router.model, &events, cancel, &attempt_cancel)
                        .await
                        .map(|result| (router.model.clone(), result))
                }
            };
            drop(events);
            outcome
        };

        let pipeline = async {
            let mut state = PipelineState::new(buffer_text).with_prior_usage(prior_usage);
            while let Some(event) = received.recv().await {
                let (next, outputs) = state.step(&event);
                state = next;
                for output in outputs {
                    sink.emit(FrameEvent::from(output)).await;
                }
            }
            state.finish()
        };

        let (outcome, summary) = tokio::join!(run, pipeline);
        let (model, result) = outcome.map_err(TurnError::from)?;
        Ok(settle(model, result, summary))
    }

    fn persist_in_background(
        &self,
        scope: TurnScope,
        message: String,
        reply: String,
        usage: TokenUsage,
        title_model: String,
        correlation_id: String,
    ) {
        let conversations = Arc::clone(&self.conversations);
        let judge = Arc::clone(&self.judge);

        self.background.spawn(async move {
            let saved = conversations.save_message(&scope, Role::User, &message, None).await;
            if let Err(error) = &saved {
                warn!(
                    event_name = "turn.persist_failed",
                    correlation_id = %correlation_id,
                    role = "user",
                    error = %error,
                    "could not persist message"
                );
            }
            if let Err(error) =
                conversations.save_message(&scope, Role::Assistant, &reply, Some(usage)).await
            {
                warn!(
                    event_name = "turn.persist_failed",
                    correlation_id = %correlation_id,
                    role = "assistant",
                    error = %error,
                    "could not persist message"
                );
            }

            if !matches!(saved, Ok(SaveOutcome { is_new_conversation: true })) {
                return;
            }
            let title = match judge.complete(&title_model, &title_prompt(&message)).await {
                Ok(raw) => clean_title(&raw),
                Err(error) => {
                    warn!(
                        event_name = "turn.title_failed",
                        correlation_id = %correlation_id,
                        error = %error,
                        "title generation failed"
                    );
                    return;
                }
            };
            let Some(title) = title else {
                return;
            };
            match conversations.set_conversation_title(&scope.session_id, &title).await {
                Ok(()) => debug!(
                    event_name = "turn.title_set",
                    correlation_id = %correlation_id,
                    title = %title,
                    "conversation titled"
                ),
                Err(error) => warn!(
                    event_name = "turn.title_failed",
                    correlation_id = %correlation_id,
                    error = %error,
                    "could not store conversation title"
                ),
            }
        });
    }
}

fn settle(model: String, result: RunResult, summary: PipelineSummary) -> Attempt {
    for (agent, usage) in &summary.per_agent {
        debug!(
            event_name = "turn.agent_usage",
            agent = %agent,
            total_tokens = usage.total,
            "token attribution"
        );
    }

    let text = match result.final_text() {
        text if !text.trim().is_empty() => text,
        _ => summary.final_text,
    };
    let usage = if result.usage.is_empty() { summary.turn_usage } else { result.usage };
    let last_agent = if result.last_agent.is_empty() {
        summary.last_agent.unwrap_or_else(|| ROUTER.to_string())
    } else {
        result.last_agent
    };

    Attempt { text, usage, last_agent, model }
}

fn retry_prompt(message: &str, feedback: &str) -> String {
    let feedback = if feedback.trim().is_empty() {
        "The previous answer did not meet the quality bar."
    } else {
        feedback.trim()
    };
    format!(
        "{message}\n\nA reviewer found problems with the previous answer:\n{feedback}\n\n\
         Write an improved answer that addresses this feedback."
    )
}

fn title_prompt(message: &str) -> String {
    format!(
        "Write a short title (at most six words) for a conversation that starts with the \
         message below. Reply with the title only.\n\n{message}"
    )
}

fn clean_title(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|line| !line.is_empty())?;
    let line = line.trim_matches(|c: char| c == '"' || c == '\'' || c == '*' || c == '#').trim();
    let line = line.strip_prefix("Title:").map(str::trim).unwrap_or(line);
    if line.is_empty() {
        return None;
    }
    Some(line.chars().take(MAX_TITLE_CHARS).collect())
}

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use hirewire_agent::evaluator::EvaluatorSettings;
use hirewire_agent::runner::{RawEvent, RunItem, RunStream, Streamed};
use hirewire_agent::session::SessionSettings;
use hirewire_agent::tools::job_search::{
    JobSearchSettings, OrganicResult, SearchError, SearchProvider,
};
use hirewire_agent::{
    AgentRunner, AgentSpec, ChatRequest, FrameEvent, InputMessage, LlmClient, Orchestrator,
    OrchestratorDeps, OrchestratorSettings, RunError, RunEvent, RunResult, StreamFrame, TurnError,
};
use hirewire_core::domain::model::{ModelNode, ModelSelection};
use hirewire_core::domain::tier::ModelTier;
use hirewire_core::domain::usage::TokenUsage;
use hirewire_core::errors::ApplicationError;
use hirewire_core::domain::session::{Conversation, Message, Role, TurnScope};
use hirewire_db::repositories::{
    ConversationRepository, InMemoryAppliedJobRepository, InMemoryConversationRepository,
    InMemoryCrmRepository, InMemoryModelSettingsRepository, ModelSettingsRepository,
    RepositoryError, SaveOutcome,
};

const DEFAULT_ANSWER: &str = "Here are three Rust roles.";

fn run_usage() -> TokenUsage {
    TokenUsage::with_total(10, 5, 15)
}

#[derive(Clone, Debug)]
struct Call {
    router_model: String,
    job_search_model: String,
    input_len: usize,
    last_input: String,
}

#[derive(Default)]
struct ScriptedRunner {
    answers: Mutex<VecDeque<&'static str>>,
    silent_models: Vec<&'static str>,
    failing: bool,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedRunner {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("calls lock").clone()
    }
}

async fn play(
    answer: String,
    silent: bool,
    failing: bool,
    events: &tokio::sync::mpsc::Sender<RunEvent>,
    cancel: &CancellationToken,
) -> Result<RunResult, RunError> {
    let send = |event: RunEvent| async move {
        events.send(event).await.map_err(|_| RunError::Cancelled)
    };

    send(RunEvent::AgentUpdated { name: "router".to_string() }).await?;
    if silent {
        cancel.cancelled().await;
        return Err(RunError::Cancelled);
    }
    if failing {
        return Err(RunError::Provider { status: 500, message: "overloaded".to_string() });
    }

    send(RunEvent::AgentUpdated { name: "general".to_string() }).await?;
    send(RunEvent::Raw(RawEvent::TextDelta { delta: answer.clone() })).await?;
    send(RunEvent::Item(RunItem::MessageOutput { text: answer.clone() })).await?;
    send(RunEvent::Raw(RawEvent::Completed { usage: run_usage() })).await?;

    Ok(RunResult {
        final_output: Some(serde_json::Value::String(answer.clone())),
        items: vec![RunItem::MessageOutput { text: answer }],
        usage: run_usage(),
        last_agent: "general".to_string(),
    })
}

#[async_trait]
impl AgentRunner for ScriptedRunner {
    fn run_streamed(
        &self,
        agent: AgentSpec,
        input: Vec<InputMessage>,
        cancel: CancellationToken,
    ) -> RunStream {
        self.calls.lock().expect("calls lock").push(Call {
            router_model: agent.model.clone(),
            job_search_model: agent
                .handoff("job_search")
                .map(|worker| worker.model.clone())
                .unwrap_or_default(),
            input_len: input.len(),
            last_input: input.last().map(|message| message.content.clone()).unwrap_or_default(),
        });

        let silent = self.silent_models.contains(&agent.model.as_str());
        let answer = self
            .answers
            .lock()
            .expect("answers lock")
            .pop_front()
            .unwrap_or(DEFAULT_ANSWER)
            .to_string();
        let failing = self.failing;

        let (events, done, stream) = Streamed::channel(16);
        tokio::spawn(async move {
            let result = play(answer, silent, failing, &events, &cancel).await;
            drop(events);
            let _ = done.send(result);
        });
        stream
    }
}

#[derive(Default)]
struct ScriptedJudge {
    verdicts: Mutex<VecDeque<&'static str>>,
    titles: AtomicUsize,
}

#[async_trait]
impl LlmClient for ScriptedJudge {
    async fn complete(&self, _model: &str, prompt: &str) -> Result<String> {
        if prompt.contains("grading") {
            let verdict =
                self.verdicts.lock().expect("verdicts lock").pop_front().unwrap_or("{\"score\": 95}");
            return Ok(verdict.to_string());
        }
        self.titles.fetch_add(1, Ordering::SeqCst);
        Ok("\"Rust roles in Berlin\"".to_string())
    }
}

struct NoSearch;

#[async_trait]
impl SearchProvider for NoSearch {
    async fn search(&self, _query: &str) -> Result<Vec<OrganicResult>, SearchError> {
        Ok(Vec::new())
    }
}

/// Storage that is down. With `accept_saves` set, messages are stored but
/// titles still fail.
#[derive(Default)]
struct BrokenConversations {
    accept_saves: bool,
    saves: AtomicUsize,
    title_attempts: AtomicUsize,
}

fn storage_down() -> RepositoryError {
    RepositoryError::Decode("storage unavailable".to_string())
}

#[async_trait]
impl ConversationRepository for BrokenConversations {
    async fn load_recent_messages(
        &self,
        _session_id: &str,
        _limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        Err(storage_down())
    }

    async fn save_message(
        &self,
        _scope: &TurnScope,
        _role: Role,
        _content: &str,
        _usage: Option<TokenUsage>,
    ) -> Result<SaveOutcome, RepositoryError> {
        if !self.accept_saves {
            return Err(storage_down());
        }
        let previous = self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(SaveOutcome { is_new_conversation: previous == 0 })
    }

    async fn set_conversation_title(
        &self,
        _session_id: &str,
        _title: &str,
    ) -> Result<(), RepositoryError> {
        self.title_attempts.fetch_add(1, Ordering::SeqCst);
        Err(storage_down())
    }

    async fn find_conversation(
        &self,
        _session_id: &str,
    ) -> Result<Option<Conversation>, RepositoryError> {
        Err(storage_down())
    }
}

fn orchestrator_over(
    conversations: Arc<BrokenConversations>,
    judge: Arc<ScriptedJudge>,
) -> Arc<Orchestrator> {
    let deps = OrchestratorDeps {
        runner: Arc::new(ScriptedRunner::default()),
        judge,
        search_provider: Arc::new(NoSearch),
        conversations,
        applied_jobs: Arc::new(InMemoryAppliedJobRepository::default()),
        model_settings: Arc::new(InMemoryModelSettingsRepository::default()),
        crm: Arc::new(InMemoryCrmRepository::default()),
    };
    Arc::new(Orchestrator::new(deps, settings(Vec::new())))
}

struct Harness {
    orchestrator: Arc<Orchestrator>,
    runner: Arc<ScriptedRunner>,
    judge: Arc<ScriptedJudge>,
    conversations: Arc<InMemoryConversationRepository>,
}

fn settings(tiers: Vec<ModelTier>) -> OrchestratorSettings {
    let mut models = ModelSelection::default();
    for node in ModelNode::ALL {
        models.set(node, format!("base-{node}"));
    }

    OrchestratorSettings {
        models,
        tiers,
        evaluator_enabled_by_default: false,
        session: SessionSettings {
            history_limit: 20,
            context_budget_bytes: 12_000,
            evaluator: EvaluatorSettings {
                pass_threshold: 60,
                max_retries: 2,
                timeout: Duration::from_secs(20),
            },
            search: JobSearchSettings {
                max_calls_per_turn: 3,
                max_concurrent: 3,
                max_results: 10,
                timeout: Duration::from_secs(15),
                cache_ttl: Duration::from_secs(900),
                applied_ttl: Duration::from_secs(60),
                job_boards: vec!["linkedin.com".to_string()],
                max_query_exclusions: 5,
            },
        },
    }
}

fn harness_with(
    runner: ScriptedRunner,
    judge: ScriptedJudge,
    tiers: Vec<ModelTier>,
    model_settings: Arc<InMemoryModelSettingsRepository>,
) -> Harness {
    let runner = Arc::new(runner);
    let judge = Arc::new(judge);
    let conversations = Arc::new(InMemoryConversationRepository::default());
    let deps = OrchestratorDeps {
        runner: runner.clone(),
        judge: judge.clone(),
        search_provider: Arc::new(NoSearch),
        conversations: conversations.clone(),
        applied_jobs: Arc::new(InMemoryAppliedJobRepository::default()),
        model_settings,
        crm: Arc::new(InMemoryCrmRepository::default()),
    };

    Harness {
        orchestrator: Arc::new(Orchestrator::new(deps, settings(tiers))),
        runner,
        judge,
        conversations,
    }
}

fn harness(runner: ScriptedRunner, judge: ScriptedJudge, tiers: Vec<ModelTier>) -> Harness {
    harness_with(runner, judge, tiers, Arc::new(InMemoryModelSettingsRepository::default()))
}

fn request(message: &str) -> ChatRequest {
    ChatRequest {
        session_id: "s-1".to_string(),
        user_id: "u-1".to_string(),
        tenant_id: "t-1".to_string(),
        message: message.to_string(),
        use_evaluator: None,
    }
}

async fn collect(mut frames: tokio::sync::mpsc::Receiver<StreamFrame>) -> Vec<StreamFrame> {
    let mut seen = Vec::new();
    while let Some(frame) = frames.recv().await {
        seen.push(frame);
    }
    seen
}

#[tokio::test]
async fn turns_accumulate_usage_and_persist_history() {
    let harness = harness(ScriptedRunner::default(), ScriptedJudge::default(), Vec::new());

    let first = harness
        .orchestrator
        .run(request("find rust jobs in berlin"), CancellationToken::new())
        .await
        .expect("first turn");
    let second = harness
        .orchestrator
        .run(request("only remote ones"), CancellationToken::new())
        .await
        .expect("second turn");
    harness.orchestrator.wait_for_background().await;

    assert_eq!(first.response, DEFAULT_ANSWER);
    assert_eq!(first.session_id, "s-1");
    assert_eq!(first.turn_tokens, run_usage());
    assert_eq!(first.cumulative_tokens.total, 15);
    assert_eq!(second.cumulative_tokens.total, 30);

    let calls = harness.runner.calls();
    assert_eq!(calls[0].input_len, 1);
    assert_eq!(calls[1].input_len, 3);

    assert_eq!(harness.conversations.message_count("s-1").await, 4);
    let conversation =
        harness.conversations.find_conversation("s-1").await.expect("lookup").expect("stored");
    assert_eq!(conversation.title.as_deref(), Some("Rust roles in Berlin"));
    assert_eq!(harness.judge.titles.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn streamed_turn_emits_frames_in_order() {
    let harness = harness(ScriptedRunner::default(), ScriptedJudge::default(), Vec::new());

    let frames = collect(
        harness.orchestrator.run_streamed(request("find rust jobs"), CancellationToken::new()),
    )
    .await;
    let events: Vec<&FrameEvent> = frames.iter().map(|frame| &frame.event).collect();

    assert_eq!(events.first(), Some(&&FrameEvent::Start));
    assert!(events.contains(&&FrameEvent::AgentStart { agent_name: "router".to_string() }));
    assert!(events.contains(&&FrameEvent::AgentStart { agent_name: "general".to_string() }));
    assert!(events.contains(&&FrameEvent::Text { text: DEFAULT_ANSWER.to_string() }));
    assert!(events.contains(&&FrameEvent::Tokens { tokens: run_usage() }));
    match events.last() {
        Some(FrameEvent::Done { response, turn_tokens, cumulative_tokens }) => {
            assert_eq!(response, DEFAULT_ANSWER);
            assert_eq!(*turn_tokens, run_usage());
            assert_eq!(*cumulative_tokens, run_usage());
        }
        other => panic!("expected a done frame last, got {other:?}"),
    }
    assert!(frames.windows(2).all(|pair| pair[0].elapsed_ms <= pair[1].elapsed_ms));
}

#[tokio::test]
async fn evaluator_rejection_regenerates_once_and_sums_usage() {
    let runner = ScriptedRunner {
        answers: Mutex::new(vec!["first draft", "better answer"].into()),
        ..ScriptedRunner::default()
    };
    let judge = ScriptedJudge {
        verdicts: Mutex::new(
            vec![
                "{\"score\": 40, \"feedback\": \"add links\", \"meets_criteria\": false, \
                 \"needs_user_input\": false}",
                "{\"score\": 90}",
            ]
            .into(),
        ),
        ..ScriptedJudge::default()
    };
    let harness = harness(runner, judge, Vec::new());
    let mut turn = request("find rust jobs");
    turn.use_evaluator = Some(true);

    let frames = collect(harness.orchestrator.run_streamed(turn, CancellationToken::new())).await;
    let events: Vec<&FrameEvent> = frames.iter().map(|frame| &frame.event).collect();

    let texts: Vec<&FrameEvent> =
        events.iter().copied().filter(|event| matches!(event, FrameEvent::Text { .. })).collect();
    assert_eq!(texts, vec![&FrameEvent::Text { text: "better answer".to_string() }]);

    let evals: Vec<u8> = events
        .iter()
        .filter_map(|event| match event {
            FrameEvent::Eval { eval_result } => Some(eval_result.score),
            _ => None,
        })
        .collect();
    assert_eq!(evals, vec![40, 90]);

    let running_totals: Vec<u64> = events
        .iter()
        .filter_map(|event| match event {
            FrameEvent::Tokens { tokens } => Some(tokens.total),
            _ => None,
        })
        .collect();
    assert_eq!(running_totals, vec![15, 30]);

    match events.last() {
        Some(FrameEvent::Done { response, turn_tokens, .. }) => {
            assert_eq!(response, "better answer");
            assert_eq!(turn_tokens.total, 30);
            assert_eq!(running_totals.last().copied(), Some(turn_tokens.total));
        }
        other => panic!("expected a done frame last, got {other:?}"),
    }

    let calls = harness.runner.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].last_input.starts_with("find rust jobs"));
    assert!(calls[1].last_input.contains("add links"));
}

#[tokio::test(start_paused = true)]
async fn slow_tier_is_promoted_to_the_next_model() {
    let runner = ScriptedRunner { silent_models: vec!["slow"], ..ScriptedRunner::default() };
    let tiers = vec![
        ModelTier::new("slow", Duration::from_secs(1)),
        ModelTier::new("fast", Duration::from_secs(1)),
    ];
    let harness = harness(runner, ScriptedJudge::default(), tiers);

    let response = harness
        .orchestrator
        .run(request("find rust jobs"), CancellationToken::new())
        .await
        .expect("promoted turn");

    assert_eq!(response.response, DEFAULT_ANSWER);
    assert_eq!(response.turn_tokens, run_usage());
    let calls = harness.runner.calls();
    let models: Vec<&str> = calls.iter().map(|call| call.router_model.as_str()).collect();
    assert_eq!(models, vec!["slow", "fast"]);
    assert_eq!(calls[1].job_search_model, "fast");
}

#[tokio::test(start_paused = true)]
async fn exhausted_tiers_surface_as_a_timeout() {
    let runner =
        ScriptedRunner { silent_models: vec!["slow", "slower"], ..ScriptedRunner::default() };
    let tiers = vec![
        ModelTier::new("slow", Duration::from_secs(1)),
        ModelTier::new("slower", Duration::from_secs(2)),
    ];
    let harness = harness(runner, ScriptedJudge::default(), tiers);

    let error = harness
        .orchestrator
        .run(request("find rust jobs"), CancellationToken::new())
        .await
        .expect_err("tiers exhausted");

    match &error {
        TurnError::TiersExhausted { tiers } => assert_eq!(tiers, &["slow", "slower"]),
        other => panic!("expected exhausted tiers, got {other:?}"),
    }
    assert!(matches!(ApplicationError::from(error), ApplicationError::Timeout(_)));
    let state = harness.orchestrator.sessions().get("s-1").await.expect("session");
    assert_eq!(state.cumulative_usage().await, TokenUsage::default());
}

#[tokio::test]
async fn runner_failure_is_fatal_and_streams_an_error_frame() {
    let harness = harness(
        ScriptedRunner { failing: true, ..ScriptedRunner::default() },
        ScriptedJudge::default(),
        Vec::new(),
    );

    let error = harness
        .orchestrator
        .run(request("find rust jobs"), CancellationToken::new())
        .await
        .expect_err("runner failure");
    assert!(matches!(error, TurnError::Run { source: RunError::Provider { status: 500, .. }, .. }));
    assert!(matches!(ApplicationError::from(error), ApplicationError::Integration(_)));

    let frames = collect(
        harness.orchestrator.run_streamed(request("find rust jobs"), CancellationToken::new()),
    )
    .await;
    assert!(matches!(frames.last().map(|frame| &frame.event), Some(FrameEvent::Error { .. })));
    assert!(!frames.iter().any(|frame| matches!(frame.event, FrameEvent::Done { .. })));

    harness.orchestrator.wait_for_background().await;
    assert_eq!(harness.conversations.message_count("s-1").await, 0);
}

#[tokio::test]
async fn invalid_input_is_rejected_before_running() {
    let harness = harness(ScriptedRunner::default(), ScriptedJudge::default(), Vec::new());

    let error = harness
        .orchestrator
        .run(request("   "), CancellationToken::new())
        .await
        .expect_err("empty message");

    assert!(matches!(error, TurnError::InvalidInput(_)));
    assert!(matches!(ApplicationError::from(error), ApplicationError::Domain(_)));
    assert!(harness.runner.calls().is_empty());
}

#[tokio::test]
async fn per_user_models_override_defaults() {
    let model_settings = Arc::new(InMemoryModelSettingsRepository::default());
    model_settings.save("u-1", ModelNode::Router, "user-router").await.expect("save setting");
    let harness = harness_with(
        ScriptedRunner::default(),
        ScriptedJudge::default(),
        Vec::new(),
        model_settings,
    );

    harness
        .orchestrator
        .run(request("find rust jobs"), CancellationToken::new())
        .await
        .expect("turn");

    let calls = harness.runner.calls();
    assert_eq!(calls[0].router_model, "user-router");
    assert_eq!(calls[0].job_search_model, "base-job_search");
}

#[tokio::test]
async fn caller_cancellation_ends_the_turn() {
    let runner = ScriptedRunner { silent_models: vec!["base-router"], ..ScriptedRunner::default() };
    let harness = harness(runner, ScriptedJudge::default(), Vec::new());
    let cancel = CancellationToken::new();

    let orchestrator = Arc::clone(&harness.orchestrator);
    let turn_cancel = cancel.clone();
    let turn =
        tokio::spawn(async move { orchestrator.run(request("find rust jobs"), turn_cancel).await });
    tokio::task::yield_now().await;
    cancel.cancel();

    let outcome = turn.await.expect("turn task");
    assert!(matches!(outcome, Err(TurnError::Cancelled)));
}

#[tokio::test]
async fn storage_outage_does_not_fail_turns() {
    let conversations = Arc::new(BrokenConversations::default());
    let judge = Arc::new(ScriptedJudge::default());
    let orchestrator = orchestrator_over(conversations, judge.clone());

    let first = orchestrator
        .run(request("find rust jobs"), CancellationToken::new())
        .await
        .expect("first turn survives failed seeding and saves");
    let second = orchestrator
        .run(request("only remote ones"), CancellationToken::new())
        .await
        .expect("second turn survives failed saves");
    orchestrator.wait_for_background().await;

    assert_eq!(first.response, DEFAULT_ANSWER);
    assert_eq!(first.cumulative_tokens.total, 15);
    assert_eq!(second.cumulative_tokens.total, 30);
    assert_eq!(judge.titles.load(Ordering::SeqCst), 0);

    let state = orchestrator.sessions().get("s-1").await.expect("session");
    assert_eq!(state.history().await.len(), 4);
}

#[tokio::test]
async fn failed_title_write_is_not_fatal() {
    let conversations =
        Arc::new(BrokenConversations { accept_saves: true, ..BrokenConversations::default() });
    let judge = Arc::new(ScriptedJudge::default());
    let orchestrator = orchestrator_over(conversations.clone(), judge.clone());

    let response = orchestrator
        .run(request("find rust jobs"), CancellationToken::new())
        .await
        .expect("turn survives a failed title write");
    orchestrator.wait_for_background().await;

    assert_eq!(response.cumulative_tokens.total, 15);
    assert_eq!(conversations.saves.load(Ordering::SeqCst), 2);
    assert_eq!(judge.titles.load(Ordering::SeqCst), 1);
    assert_eq!(conversations.title_attempts.load(Ordering::SeqCst), 1);
}

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use hirewire_agent::{ChatRequest, ChatResponse, Orchestrator, StreamFrame, TurnError};
use hirewire_core::errors::{ApplicationError, InterfaceError};
use serde::Serialize;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

const NDJSON: &str = "application/x-ndjson";

#[derive(Clone)]
pub struct ChatState {
    orchestrator: Arc<Orchestrator>,
}

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/api/v1/chat", post(chat))
        .route("/api/v1/chat/stream", post(chat_stream))
        .with_state(ChatState { orchestrator })
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    detail: String,
    correlation_id: String,
}

pub struct ApiError(InterfaceError);

impl From<TurnError> for ApiError {
    fn from(error: TurnError) -> Self {
        let correlation_id = Uuid::new_v4().to_string();
        warn!(
            event_name = "http.chat.failed",
            correlation_id = %correlation_id,
            error = %error,
            "chat turn failed"
        );
        Self(ApplicationError::from(error).into_interface(correlation_id))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::BadGateway { .. } => StatusCode::BAD_GATEWAY,
            InterfaceError::GatewayTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.0.user_message(),
            detail: self.0.to_string(),
            correlation_id: self.0.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Dropping the handler future (client went away) cancels the turn.
pub async fn chat(
    State(state): State<ChatState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let response = state.orchestrator.run(request, cancel).await?;
    Ok(Json(response))
}

/// Streams one JSON frame per line. The body owns a drop guard, so closing
/// the connection cancels the turn.
pub async fn chat_stream(
    State(state): State<ChatState>,
    Json(request): Json<ChatRequest>,
) -> Response {
    let cancel = CancellationToken::new();
    let cancel_on_drop = cancel.clone().drop_guard();
    let frames = state.orchestrator.run_streamed(request, cancel);

    let body = ReceiverStream::new(frames).map(move |frame| {
        let _ = &cancel_on_drop;
        Ok::<_, Infallible>(encode_frame(&frame))
    });

    ([(header::CONTENT_TYPE, NDJSON)], Body::from_stream(body)).into_response()
}

fn encode_frame(frame: &StreamFrame) -> String {
    let mut line = serde_json::to_string(frame).unwrap_or_else(|error| {
        json!({
            "type": "error",
            "error": format!("could not encode frame: {error}"),
            "elapsed_ms": frame.elapsed_ms,
        })
        .to_string()
    });
    line.push('\n');
    line
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use axum::Router;
    use serde_json::{json, Value};
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use hirewire_agent::evaluator::EvaluatorSettings;
    use hirewire_agent::runner::{RawEvent, RunItem, RunStream, Streamed};
    use hirewire_agent::session::SessionSettings;
    use hirewire_agent::tools::job_search::{
        JobSearchSettings, OrganicResult, SearchError, SearchProvider,
    };
    use hirewire_agent::{
        AgentRunner, AgentSpec, InputMessage, LlmClient, Orchestrator, OrchestratorDeps,
        OrchestratorSettings, RunError, RunEvent, RunResult,
    };
    use hirewire_core::domain::model::{ModelNode, ModelSelection};
    use hirewire_core::domain::tier::ModelTier;
    use hirewire_core::domain::usage::TokenUsage;
    use hirewire_db::repositories::{
        InMemoryAppliedJobRepository, InMemoryConversationRepository, InMemoryCrmRepository,
        InMemoryModelSettingsRepository,
    };

    #[derive(Clone, Copy)]
    enum Behavior {
        Answer,
        Fail,
        Silent,
    }

    struct FixedRunner(Behavior);

    async fn play(
        behavior: Behavior,
        events: &tokio::sync::mpsc::Sender<RunEvent>,
        cancel: &CancellationToken,
    ) -> Result<RunResult, RunError> {
        let closed = |_| RunError::Cancelled;
        events.send(RunEvent::AgentUpdated { name: "router".to_string() }).await.map_err(closed)?;
        match behavior {
            Behavior::Answer => {
                let usage = TokenUsage::with_total(8, 4, 12);
                events
                    .send(RunEvent::Raw(RawEvent::TextDelta { delta: "Two roles".to_string() }))
                    .await
                    .map_err(closed)?;
                events.send(RunEvent::Raw(RawEvent::Completed { usage })).await.map_err(closed)?;
                Ok(RunResult {
                    final_output: Some(Value::String("Two roles found.".to_string())),
                    items: vec![RunItem::MessageOutput { text: "Two roles found.".to_string() }],
                    usage,
                    last_agent: "job_search".to_string(),
                })
            }
            Behavior::Fail => {
                Err(RunError::Provider { status: 503, message: "unavailable".to_string() })
            }
            Behavior::Silent => {
                cancel.cancelled().await;
                Err(RunError::Cancelled)
            }
        }
    }

    #[async_trait]
    impl AgentRunner for FixedRunner {
        fn run_streamed(
            &self,
            _agent: AgentSpec,
            _input: Vec<InputMessage>,
            cancel: CancellationToken,
        ) -> RunStream {
            let behavior = self.0;
            let (events, done, stream) = Streamed::channel(8);
            tokio::spawn(async move {
                let result = play(behavior, &events, &cancel).await;
                drop(events);
                let _ = done.send(result);
            });
            stream
        }
    }

    struct Judge;

    #[async_trait]
    impl LlmClient for Judge {
        async fn complete(&self, _model: &str, _prompt: &str) -> anyhow::Result<String> {
            Ok("{\"score\": 100}".to_string())
        }
    }

    struct NoSearch;

    #[async_trait]
    impl SearchProvider for NoSearch {
        async fn search(&self, _query: &str) -> Result<Vec<OrganicResult>, SearchError> {
            Ok(Vec::new())
        }
    }

    fn app(behavior: Behavior, tiers: Vec<ModelTier>) -> Router {
        let mut models = ModelSelection::default();
        for node in ModelNode::ALL {
            models.set(node, "local-model");
        }
        let settings = OrchestratorSettings {
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
                    job_boards: Vec::new(),
                    max_query_exclusions: 5,
                },
            },
        };
        let deps = OrchestratorDeps {
            runner: Arc::new(FixedRunner(behavior)),
            judge: Arc::new(Judge),
            search_provider: Arc::new(NoSearch),
            conversations: Arc::new(InMemoryConversationRepository::default()),
            applied_jobs: Arc::new(InMemoryAppliedJobRepository::default()),
            model_settings: Arc::new(InMemoryModelSettingsRepository::default()),
            crm: Arc::new(InMemoryCrmRepository::default()),
        };

        super::router(Arc::new(Orchestrator::new(deps, settings)))
    }

    fn post(path: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    fn turn(message: &str) -> Value {
        json!({"session_id": "s-1", "user_id": "u-1", "tenant_id": "t-1", "message": message})
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn chat_returns_the_turn_result() {
        let response = app(Behavior::Answer, Vec::new())
            .oneshot(post("/api/v1/chat", turn("rust jobs?")))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["response"], "Two roles found.");
        assert_eq!(body["session_id"], "s-1");
        assert_eq!(body["turn_tokens"]["total"], 12);
        assert_eq!(body["cumulative_tokens"]["total"], 12);
    }

    #[tokio::test]
    async fn chat_maps_turn_errors_to_status_codes() {
        let invalid = app(Behavior::Answer, Vec::new())
            .oneshot(post("/api/v1/chat", turn("  ")))
            .await
            .expect("response");
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
        let body = json_body(invalid).await;
        assert!(body["correlation_id"].as_str().is_some_and(|id| !id.is_empty()));

        let failed = app(Behavior::Fail, Vec::new())
            .oneshot(post("/api/v1/chat", turn("rust jobs?")))
            .await
            .expect("response");
        assert_eq!(failed.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test(start_paused = true)]
    async fn chat_reports_exhausted_tiers_as_gateway_timeout() {
        let tiers = vec![ModelTier::new("only", Duration::from_millis(500))];

        let response = app(Behavior::Silent, tiers)
            .oneshot(post("/api/v1/chat", turn("rust jobs?")))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn chat_stream_writes_ndjson_frames() {
        let response = app(Behavior::Answer, Vec::new())
            .oneshot(post("/api/v1/chat/stream", turn("rust jobs?")))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).and_then(|value| value.to_str().ok()),
            Some("application/x-ndjson")
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let text = String::from_utf8(bytes.to_vec()).expect("utf8");
        let frames: Vec<Value> =
            text.lines().map(|line| serde_json::from_str(line).expect("frame json")).collect();

        assert_eq!(frames.first().map(|frame| frame["type"].clone()), Some(json!("start")));
        assert!(frames.iter().any(|frame| frame["type"] == "text" && frame["text"] == "Two roles"));
        let done = frames.last().expect("done frame");
        assert_eq!(done["type"], "done");
        assert_eq!(done["response"], "Two roles found.");
        assert!(frames.iter().all(|frame| frame["elapsed_ms"].is_u64()));
    }

    #[tokio::test]
    async fn chat_stream_ends_with_an_error_frame_on_failure() {
        let response = app(Behavior::Fail, Vec::new())
            .oneshot(post("/api/v1/chat/stream", turn("rust jobs?")))
            .await
            .expect("response");

        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let text = String::from_utf8(bytes.to_vec()).expect("utf8");
        let last: Value =
            serde_json::from_str(text.lines().last().expect("frames")).expect("frame json");

        assert_eq!(last["type"], "error");
        assert!(last["error"].as_str().is_some_and(|error| error.contains("503")));
    }
}

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use hirewire_core::domain::session::Role;
use hirewire_core::domain::usage::TokenUsage;

use crate::tools::{Tool, ToolRegistry};

/// Everything a generation run reports while it is in flight.
#[derive(Clone, Debug, PartialEq)]
pub enum RunEvent {
    AgentUpdated { name: String },
    Item(RunItem),
    Raw(RawEvent),
}

#[derive(Clone, Debug, PartialEq)]
pub enum RunItem {
    ToolCalled { name: String },
    ToolOutput { name: String, output: String },
    MessageOutput { text: String },
}

#[derive(Clone, Debug, PartialEq)]
pub enum RawEvent {
    TextDelta { delta: String },
    Completed { usage: TokenUsage },
}

/// Marks events that prove a model is actually producing output.
pub trait ContentSignal {
    fn is_content(&self) -> bool;
}

impl ContentSignal for RunEvent {
    fn is_content(&self) -> bool {
        matches!(self, Self::Item(_) | Self::Raw(RawEvent::TextDelta { .. }))
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunResult {
    pub final_output: Option<Value>,
    pub items: Vec<RunItem>,
    pub usage: TokenUsage,
    pub last_agent: String,
}

impl RunResult {
    /// Prefers a textual final output and falls back to every message item
    /// joined in order.
    pub fn final_text(&self) -> String {
        match &self.final_output {
            Some(Value::String(text)) if !text.trim().is_empty() => return text.clone(),
            Some(Value::Null) | None => {}
            Some(Value::String(_)) => {}
            Some(other) => return other.to_string(),
        }

        self.items
            .iter()
            .filter_map(|item| match item {
                RunItem::MessageOutput { text } if !text.trim().is_empty() => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputMessage {
    pub role: Role,
    pub content: String,
}

impl InputMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// An agent definition handed to a runner. Handoffs are exposed to the model
/// as `transfer_to_<name>` functions.
#[derive(Clone)]
pub struct AgentSpec {
    pub name: String,
    pub instructions: String,
    pub model: String,
    pub tools: ToolRegistry,
    pub handoffs: Vec<AgentSpec>,
}

impl AgentSpec {
    pub fn new(
        name: impl Into<String>,
        instructions: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            model: model.into(),
            tools: ToolRegistry::default(),
            handoffs: Vec::new(),
        }
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.register(tool);
        self
    }

    pub fn with_handoff(mut self, agent: AgentSpec) -> Self {
        self.handoffs.push(agent);
        self
    }

    /// Copy of this agent tree where every agent runs on `model`.
    pub fn with_model_everywhere(&self, model: &str) -> Self {
        let mut agent = self.clone();
        agent.model = model.to_string();
        agent.handoffs =
            self.handoffs.iter().map(|handoff| handoff.with_model_everywhere(model)).collect();
        agent
    }

    pub fn handoff(&self, name: &str) -> Option<&AgentSpec> {
        self.handoffs.iter().find(|handoff| handoff.name == name)
    }

    pub fn tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name)
    }
}

impl fmt::Debug for AgentSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentSpec")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("tools", &self.tools.iter().map(|tool| tool.name()).collect::<Vec<_>>())
            .field("handoffs", &self.handoffs.iter().map(|h| h.name.as_str()).collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("provider returned status {status}: {message}")]
    Provider { status: u16, message: String },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("could not decode provider payload: {0}")]
    Decode(String),
    #[error("run exceeded {0} model rounds")]
    MaxRounds(u32),
    #[error("run aborted: {0}")]
    Aborted(String),
    #[error("run cancelled")]
    Cancelled,
}

/// A live stream of events plus the terminal result, delivered once the
/// event channel has closed.
pub struct Streamed<T, R, E> {
    pub events: mpsc::Receiver<T>,
    pub completion: oneshot::Receiver<Result<R, E>>,
}

pub type RunStream = Streamed<RunEvent, RunResult, RunError>;

impl<T, R, E> Streamed<T, R, E> {
    pub fn channel(capacity: usize) -> (mpsc::Sender<T>, oneshot::Sender<Result<R, E>>, Self) {
        let (event_tx, events) = mpsc::channel(capacity);
        let (done_tx, completion) = oneshot::channel();
        (event_tx, done_tx, Self { events, completion })
    }
}

#[async_trait]
pub trait AgentRunner: Send + Sync {
    fn run_streamed(
        &self,
        agent: AgentSpec,
        input: Vec<InputMessage>,
        cancel: CancellationToken,
    ) -> RunStream;

    async fn run(
        &self,
        agent: AgentSpec,
        input: Vec<InputMessage>,
        cancel: CancellationToken,
    ) -> Result<RunResult, RunError> {
        let RunStream { mut events, completion } = self.run_streamed(agent, input, cancel);
        while events.recv().await.is_some() {}
        completion.await.unwrap_or_else(|_| {
            Err(RunError::Aborted("run ended without reporting a result".to_string()))
        })
    }
}

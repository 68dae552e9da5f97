//! Agent runtime for the hirewire assistant.
//!
//! A turn flows through these pieces:
//! 1. **Session** (`session`) - in-process history, usage counters, and the
//!    per-session evaluator and search caches
//! 2. **Routing** (`workers`) - a router agent that hands off to a job
//!    search, CRM or general worker
//! 3. **Execution** (`runner`, `provider`) - streaming model runs with tool
//!    calls and handoffs
//! 4. **Promotion** (`promoter`) - escalation to the next model tier when
//!    the first token is late
//! 5. **Normalization** (`pipeline`, `stream`) - raw run events turned into
//!    client frames
//! 6. **Review** (`evaluator`) - an optional judge pass with one bounded retry
//!
//! `Orchestrator` ties them together.

pub mod evaluator;
pub mod llm;
pub mod orchestrator;
pub mod pipeline;
pub mod promoter;
pub mod provider;
pub mod runner;
pub mod session;
pub mod stream;
pub mod tools;
pub mod workers;

pub use evaluator::{Evaluator, EvaluatorSettings};
pub use llm::LlmClient;
pub use orchestrator::{
    ChatRequest, ChatResponse, Orchestrator, OrchestratorDeps, OrchestratorSettings, TurnError,
};
pub use provider::OpenAiRunner;
pub use runner::{AgentRunner, AgentSpec, InputMessage, RunError, RunEvent, RunResult};
pub use stream::{FrameEvent, StreamFrame};

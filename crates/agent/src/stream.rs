//! Wire frames emitted by a streaming turn, one JSON object per line.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;

use hirewire_core::domain::evaluation::EvaluatorResult;
use hirewire_core::domain::usage::TokenUsage;

use crate::pipeline::PipelineEvent;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamFrame {
    pub elapsed_ms: u64,
    #[serde(flatten)]
    pub event: FrameEvent,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FrameEvent {
    Start,
    AgentStart { agent_name: String },
    ToolStart { tool_name: String },
    ToolEnd { tool_name: String },
    Text { text: String },
    Tokens { tokens: TokenUsage },
    EvalStart,
    Eval { eval_result: EvaluatorResult },
    Done { response: String, turn_tokens: TokenUsage, cumulative_tokens: TokenUsage },
    Error { error: String },
}

impl FrameEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

impl From<PipelineEvent> for FrameEvent {
    fn from(event: PipelineEvent) -> Self {
        match event {
            PipelineEvent::AgentStart { name } => Self::AgentStart { agent_name: name },
            PipelineEvent::ToolStart { name } => Self::ToolStart { tool_name: name },
            PipelineEvent::ToolEnd { name } => Self::ToolEnd { tool_name: name },
            PipelineEvent::Text { delta } => Self::Text { text: delta },
            PipelineEvent::Tokens { usage } => Self::Tokens { tokens: usage },
        }
    }
}

/// Stamps frames with the time since the turn started. A detached sink or a
/// dropped receiver swallows frames so the turn can still finish.
#[derive(Clone, Debug)]
pub struct FrameSink {
    started: Instant,
    sender: Option<mpsc::Sender<StreamFrame>>,
}

impl FrameSink {
    pub fn new(sender: mpsc::Sender<StreamFrame>) -> Self {
        Self { started: Instant::now(), sender: Some(sender) }
    }

    pub fn detached() -> Self {
        Self { started: Instant::now(), sender: None }
    }

    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    pub async fn emit(&self, event: impl Into<FrameEvent>) {
        let Some(sender) = &self.sender else {
            return;
        };
        let frame = StreamFrame { elapsed_ms: self.elapsed_ms(), event: event.into() };
        let _ = sender.send(frame).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::mpsc;

    use hirewire_core::domain::usage::TokenUsage;

    use super::{FrameEvent, FrameSink, StreamFrame};
    use crate::pipeline::PipelineEvent;

    #[test]
    fn frames_serialize_to_the_wire_vocabulary() {
        let frame = StreamFrame {
            elapsed_ms: 12,
            event: FrameEvent::AgentStart { agent_name: "job_search".to_string() },
        };
        assert_eq!(
            serde_json::to_value(&frame).expect("serialize"),
            json!({"type": "agent_start", "agent_name": "job_search", "elapsed_ms": 12})
        );

        let done = StreamFrame {
            elapsed_ms: 40,
            event: FrameEvent::Done {
                response: "hi".to_string(),
                turn_tokens: TokenUsage::with_total(1, 2, 3),
                cumulative_tokens: TokenUsage::with_total(4, 5, 9),
            },
        };
        assert_eq!(
            serde_json::to_value(&done).expect("serialize"),
            json!({
                "type": "done",
                "response": "hi",
                "turn_tokens": {"input": 1, "output": 2, "total": 3},
                "cumulative_tokens": {"input": 4, "output": 5, "total": 9},
                "elapsed_ms": 40
            })
        );

        let start = StreamFrame { elapsed_ms: 0, event: FrameEvent::Start };
        assert_eq!(
            serde_json::to_value(&start).expect("serialize"),
            json!({"type": "start", "elapsed_ms": 0})
        );
    }

    #[test]
    fn pipeline_events_map_onto_frames() {
        let frame: FrameEvent = PipelineEvent::Text { delta: "abc".to_string() }.into();
        assert_eq!(frame, FrameEvent::Text { text: "abc".to_string() });
        assert!(!frame.is_terminal());
        assert!(FrameEvent::Error { error: "boom".to_string() }.is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn sink_stamps_elapsed_time_and_tolerates_closed_receivers() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = FrameSink::new(tx);

        tokio::time::advance(Duration::from_millis(250)).await;
        sink.emit(FrameEvent::Start).await;
        let frame = rx.recv().await.expect("frame delivered");
        assert_eq!(frame.elapsed_ms, 250);

        drop(rx);
        sink.emit(FrameEvent::EvalStart).await;
        FrameSink::detached().emit(FrameEvent::EvalStart).await;
    }
}

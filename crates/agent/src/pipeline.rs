//! Normalizes raw run events into the client-facing vocabulary.
//!
//! [`PipelineState::step`] is a pure transition: it consumes the current
//! state and one [`RunEvent`] and returns the next state plus the events to
//! forward. Usage is tracked per turn and per active agent; the per-agent
//! accumulator resets on every handoff and is folded into a map for
//! attribution when the run ends.

use std::collections::BTreeMap;

use tracing::debug;

use hirewire_core::domain::usage::TokenUsage;

use crate::runner::{RawEvent, RunEvent, RunItem};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineEvent {
    AgentStart { name: String },
    ToolStart { name: String },
    ToolEnd { name: String },
    Text { delta: String },
    Tokens { usage: TokenUsage },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineState {
    buffer_text: bool,
    current_agent: Option<String>,
    prior_usage: TokenUsage,
    turn_usage: TokenUsage,
    agent_usage: TokenUsage,
    per_agent: BTreeMap<String, TokenUsage>,
    last_message_text: Option<String>,
    streamed_text: String,
}

/// What is left once the event stream has ended.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    pub last_agent: Option<String>,
    pub turn_usage: TokenUsage,
    pub per_agent: BTreeMap<String, TokenUsage>,
    pub final_text: String,
}

impl PipelineState {
    /// With `buffer_text` set, text deltas are held back instead of
    /// forwarded; the caller releases the approved text later.
    pub fn new(buffer_text: bool) -> Self {
        Self { buffer_text, ..Self::default() }
    }

    /// Usage already spent earlier in the turn. It is folded into the running
    /// totals of `Tokens` events but not into this attempt's summary.
    pub fn with_prior_usage(mut self, usage: TokenUsage) -> Self {
        self.prior_usage = usage;
        self
    }

    pub fn turn_usage(&self) -> TokenUsage {
        self.turn_usage
    }

    pub fn current_agent(&self) -> Option<&str> {
        self.current_agent.as_deref()
    }

    pub fn step(mut self, event: &RunEvent) -> (Self, Vec<PipelineEvent>) {
        let mut outputs = Vec::new();

        match event {
            RunEvent::AgentUpdated { name } => {
                if self.current_agent.as_deref() != Some(name.as_str()) {
                    if let Some(previous) = self.current_agent.take() {
                        debug!(
                            event_name = "pipeline.handoff",
                            from = %previous,
                            to = %name,
                            agent_total_tokens = self.agent_usage.total,
                            "agent handoff"
                        );
                        self.fold_agent_usage(previous);
                    }
                    self.current_agent = Some(name.clone());
                    outputs.push(PipelineEvent::AgentStart { name: name.clone() });
                }
            }
            RunEvent::Item(RunItem::ToolCalled { name }) => {
                outputs.push(PipelineEvent::ToolStart { name: name.clone() });
            }
            RunEvent::Item(RunItem::ToolOutput { name, .. }) => {
                outputs.push(PipelineEvent::ToolEnd { name: name.clone() });
            }
            RunEvent::Item(RunItem::MessageOutput { text }) => {
                if !text.trim().is_empty() {
                    self.last_message_text = Some(text.clone());
                }
            }
            RunEvent::Raw(RawEvent::TextDelta { delta }) => {
                self.streamed_text.push_str(delta);
                if !self.buffer_text && !delta.is_empty() {
                    outputs.push(PipelineEvent::Text { delta: delta.clone() });
                }
            }
            RunEvent::Raw(RawEvent::Completed { usage }) => {
                if usage.total > 0 {
                    self.turn_usage += *usage;
                    self.agent_usage += *usage;
                    let running = self.prior_usage + self.turn_usage;
                    outputs.push(PipelineEvent::Tokens { usage: running });
                }
            }
        }

        (self, outputs)
    }

    pub fn finish(mut self) -> PipelineSummary {
        let last_agent = self.current_agent.clone();
        if let Some(agent) = self.current_agent.take() {
            self.fold_agent_usage(agent);
        }

        let final_text = match self.last_message_text {
            Some(text) => text,
            None => self.streamed_text.trim().to_string(),
        };

        PipelineSummary {
            last_agent,
            turn_usage: self.turn_usage,
            per_agent: self.per_agent,
            final_text,
        }
    }

    fn fold_agent_usage(&mut self, agent: String) {
        let usage = std::mem::take(&mut self.agent_usage);
        *self.per_agent.entry(agent).or_default() += usage;
    }
}

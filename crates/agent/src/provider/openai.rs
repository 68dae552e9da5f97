//! Agent runner for OpenAI-compatible `/chat/completions` endpoints
//! (OpenAI itself, Ollama's `/v1` surface, and similar gateways).

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use futures::future::join_all;
use futures::StreamExt;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use hirewire_core::config::LlmConfig;
use hirewire_core::domain::usage::TokenUsage;

use super::sse::SseDecoder;
use crate::llm::LlmClient;
use crate::runner::{
    AgentRunner, AgentSpec, InputMessage, RawEvent, RunError, RunEvent, RunItem, RunResult,
    RunStream, Streamed,
};
use crate::tools::{function_definition, output_text};

const HANDOFF_PREFIX: &str = "transfer_to_";
const EVENT_BUFFER: usize = 64;

#[derive(Clone)]
pub struct OpenAiRunner {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
    timeout: Duration,
    max_rounds: u32,
}

impl OpenAiRunner {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
        timeout: Duration,
        max_rounds: u32,
    ) -> Result<Self, RunError> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|error| RunError::Transport(error.to_string()))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url, api_key, timeout, max_rounds: max_rounds.max(1) })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, RunError> {
        Self::new(
            config.base_url.clone(),
            config.api_key.clone(),
            Duration::from_secs(config.timeout_secs),
            config.max_rounds,
        )
    }

    fn request(&self, body: &Value) -> reqwest::RequestBuilder {
        let request = self.client.post(format!("{}/chat/completions", self.base_url)).json(body);
        match &self.api_key {
            Some(key) if !key.expose_secret().trim().is_empty() => {
                request.bearer_auth(key.expose_secret().trim())
            }
            _ => request,
        }
    }

    async fn drive(
        &self,
        root: AgentSpec,
        input: Vec<InputMessage>,
        events: &mpsc::Sender<RunEvent>,
    ) -> Result<RunResult, RunError> {
        let mut agent = root;
        let mut messages = Vec::with_capacity(input.len() + 1);
        messages.push(system_message(&agent));
        messages.extend(input.iter().map(|message| {
            json!({"role": message.role.as_str(), "content": message.content})
        }));

        let mut result = RunResult { last_agent: agent.name.clone(), ..RunResult::default() };
        emit(events, RunEvent::AgentUpdated { name: agent.name.clone() }).await?;

        for round in 1..=self.max_rounds {
            let reply = self.stream_round(&agent, &messages, events).await?;
            result.usage += reply.usage;
            emit(events, RunEvent::Raw(RawEvent::Completed { usage: reply.usage })).await?;
            debug!(
                event_name = "runner.round_complete",
                agent = %agent.name,
                round,
                tool_calls = reply.tool_calls.len(),
                total_tokens = reply.usage.total,
                "model round complete"
            );

            if reply.tool_calls.is_empty() {
                if !reply.text.trim().is_empty() {
                    let item = RunItem::MessageOutput { text: reply.text.clone() };
                    emit(events, RunEvent::Item(item.clone())).await?;
                    result.items.push(item);
                    result.final_output = Some(Value::String(reply.text));
                }
                result.last_agent = agent.name;
                return Ok(result);
            }

            messages.push(json!({
                "role": "assistant",
                "content": (!reply.text.is_empty()).then(|| reply.text.clone()),
                "tool_calls": reply.tool_calls.iter().map(PendingCall::to_wire).collect::<Vec<_>>(),
            }));

            // Handoffs resolve inline; every other call in the round runs concurrently.
            let mut next_agent = None;
            let mut outputs: Vec<Option<String>> = vec![None; reply.tool_calls.len()];
            let mut pending = Vec::new();
            for (index, call) in reply.tool_calls.iter().enumerate() {
                if let Some(target) = call.name.strip_prefix(HANDOFF_PREFIX) {
                    let output = match agent.handoff(target) {
                        Some(handoff) if next_agent.is_none() => {
                            next_agent = Some(handoff.clone());
                            format!("Transferred to {target}.")
                        }
                        Some(_) => "Only one transfer per round is allowed.".to_string(),
                        None => format!("No agent named `{target}` is available."),
                    };
                    outputs[index] = Some(output);
                    continue;
                }

                let called = RunItem::ToolCalled { name: call.name.clone() };
                emit(events, RunEvent::Item(called.clone())).await?;
                result.items.push(called);
                pending.push(index);
            }

            let executed = join_all(
                pending.iter().map(|&index| self.execute_tool(&agent, &reply.tool_calls[index])),
            )
            .await;
            for (&index, output) in pending.iter().zip(executed) {
                let name = reply.tool_calls[index].name.clone();
                let produced = RunItem::ToolOutput { name, output: output.clone() };
                emit(events, RunEvent::Item(produced.clone())).await?;
                result.items.push(produced);
                outputs[index] = Some(output);
            }

            for (call, output) in reply.tool_calls.iter().zip(outputs) {
                messages.push(tool_message(&call.id, output.as_deref().unwrap_or_default()));
            }

            if let Some(handoff) = next_agent {
                info!(
                    event_name = "runner.handoff",
                    from = %agent.name,
                    to = %handoff.name,
                    "agent handoff"
                );
                agent = handoff;
                messages[0] = system_message(&agent);
                result.last_agent = agent.name.clone();
                emit(events, RunEvent::AgentUpdated { name: agent.name.clone() }).await?;
            }
        }

        Err(RunError::MaxRounds(self.max_rounds))
    }

    async fn execute_tool(&self, agent: &AgentSpec, call: &PendingCall) -> String {
        let Some(tool) = agent.tool(&call.name) else {
            return format!("Unknown tool `{}`.", call.name);
        };
        let arguments = if call.arguments.trim().is_empty() {
            json!({})
        } else {
            match serde_json::from_str::<Value>(&call.arguments) {
                Ok(arguments) => arguments,
                Err(error) => return format!("Tool arguments were not valid JSON: {error}"),
            }
        };

        match tool.execute(arguments).await {
            Ok(value) => output_text(&value),
            Err(error) => {
                warn!(
                    event_name = "runner.tool_failed",
                    tool = %call.name,
                    error = %error,
                    "tool execution failed"
                );
                format!("Tool `{}` failed: {error}", call.name)
            }
        }
    }

    #[instrument(skip_all, fields(agent = %agent.name, model = %agent.model))]
    async fn stream_round(
        &self,
        agent: &AgentSpec,
        messages: &[Value],
        events: &mpsc::Sender<RunEvent>,
    ) -> Result<RoundReply, RunError> {
        let mut tools: Vec<Value> =
            agent.tools.iter().map(|tool| function_definition(tool.as_ref())).collect();
        tools.extend(agent.handoffs.iter().map(handoff_definition));

        let mut body = json!({
            "model": agent.model,
            "messages": messages,
            "stream": true,
            "stream_options": {"include_usage": true},
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools);
        }

        let response = self
            .request(&body)
            .send()
            .await
            .map_err(|error| RunError::Transport(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RunError::Provider { status: status.as_u16(), message });
        }

        let mut reply = RoundReply::default();
        let mut calls: BTreeMap<usize, PendingCall> = BTreeMap::new();
        let mut decoder = SseDecoder::default();
        let mut body = response.bytes_stream();

        'stream: while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|error| RunError::Transport(error.to_string()))?;
            for payload in decoder.push(&chunk) {
                if payload.trim() == "[DONE]" {
                    break 'stream;
                }
                self.apply_chunk(&payload, &mut reply, &mut calls, events).await?;
            }
        }
        if let Some(payload) = decoder.finish() {
            if payload.trim() != "[DONE]" {
                self.apply_chunk(&payload, &mut reply, &mut calls, events).await?;
            }
        }

        reply.tool_calls = calls
            .into_values()
            .filter(|call| !call.name.is_empty())
            .enumerate()
            .map(|(index, mut call)| {
                if call.id.is_empty() {
                    call.id = format!("call_{index}");
                }
                call
            })
            .collect();
        Ok(reply)
    }

    async fn apply_chunk(
        &self,
        payload: &str,
        reply: &mut RoundReply,
        calls: &mut BTreeMap<usize, PendingCall>,
        events: &mpsc::Sender<RunEvent>,
    ) -> Result<(), RunError> {
        let chunk: ChatChunk =
            serde_json::from_str(payload).map_err(|error| RunError::Decode(error.to_string()))?;

        if let Some(usage) = chunk.usage {
            reply.usage =
                TokenUsage::with_total(usage.prompt_tokens, usage.completion_tokens, usage.total_tokens);
        }

        for choice in chunk.choices {
            let Some(delta) = choice.delta else {
                continue;
            };
            if let Some(text) = delta.content.filter(|text| !text.is_empty()) {
                reply.text.push_str(&text);
                emit(events, RunEvent::Raw(RawEvent::TextDelta { delta: text })).await?;
            }
            for fragment in delta.tool_calls.unwrap_or_default() {
                let pending = calls.entry(fragment.index).or_default();
                if let Some(id) = fragment.id {
                    pending.id = id;
                }
                if let Some(function) = fragment.function {
                    if let Some(name) = function.name {
                        pending.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        pending.arguments.push_str(&arguments);
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AgentRunner for OpenAiRunner {
    fn run_streamed(
        &self,
        agent: AgentSpec,
        input: Vec<InputMessage>,
        cancel: CancellationToken,
    ) -> RunStream {
        let (events, done, stream) = Streamed::channel(EVENT_BUFFER);
        let runner = self.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(RunError::Cancelled),
                result = runner.drive(agent, input, &events) => result,
            };
            drop(events);
            let _ = done.send(result);
        });
        stream
    }
}

#[async_trait]
impl LlmClient for OpenAiRunner {
    async fn complete(&self, model: &str, prompt: &str) -> anyhow::Result<String> {
        let body = json!({
            "model": model,
            "messages": [{"role": "user", "content": prompt}],
            "stream": false,
        });
        let response = self
            .request(&body)
            .timeout(self.timeout)
            .send()
            .await
            .context("completion request failed")?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(anyhow!("provider returned status {status}: {message}"));
        }

        let completion: ChatCompletion =
            response.json().await.context("could not decode completion response")?;
        completion
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("completion response had no message content"))
    }
}

async fn emit(events: &mpsc::Sender<RunEvent>, event: RunEvent) -> Result<(), RunError> {
    events.send(event).await.map_err(|_| RunError::Cancelled)
}

fn system_message(agent: &AgentSpec) -> Value {
    json!({"role": "system", "content": agent.instructions})
}

fn tool_message(call_id: &str, output: &str) -> Value {
    json!({"role": "tool", "tool_call_id": call_id, "content": output})
}

fn handoff_definition(agent: &AgentSpec) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": format!("{HANDOFF_PREFIX}{}", agent.name),
            "description": format!("Hand the conversation to the `{}` agent.", agent.name),
            "parameters": {"type": "object", "properties": {}},
        }
    })
}

#[derive(Debug, Default)]
struct RoundReply {
    text: String,
    tool_calls: Vec<PendingCall>,
    usage: TokenUsage,
}

#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

impl PendingCall {
    fn to_wire(&self) -> Value {
        json!({
            "id": self.id,
            "type": "function",
            "function": {"name": self.name, "arguments": self.arguments},
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallFragment>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallFragment {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionFragment>,
}

#[derive(Debug, Deserialize)]
struct FunctionFragment {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

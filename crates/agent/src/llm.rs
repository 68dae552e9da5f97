use anyhow::Result;
use async_trait::async_trait;

/// Single-shot completion used for judging and titling, where streaming
/// adds nothing.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, model: &str, prompt: &str) -> Result<String>;
}

pub mod classifier;
pub mod gemini;
pub mod ollama;
pub mod prompts;

use async_trait::async_trait;

/// Single-prompt text completion. Callers in the reply path go through
/// [`classifier`], which turns every provider error into `None`.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String>;
}

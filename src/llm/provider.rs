use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::{ChatMessage, SamplingParams};

/// Receiving half of a streamed completion. Dropping it stops the producer.
pub type TokenReceiver = mpsc::Receiver<anyhow::Result<String>>;

/// An external text generation service.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Service name for logs and status output.
    fn name(&self) -> &str;

    /// Largest prompt the service accepts, in estimated tokens.
    fn max_input_tokens(&self) -> usize;

    /// Chat completion (non-streaming).
    async fn complete(
        &self,
        messages: &[ChatMessage],
        sampling: &SamplingParams,
    ) -> anyhow::Result<String>;

    /// Chat completion (streaming).
    async fn stream(
        &self,
        messages: &[ChatMessage],
        sampling: &SamplingParams,
    ) -> anyhow::Result<TokenReceiver>;
}

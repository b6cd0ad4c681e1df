//! Generation gateway: the single exit point from the pipeline to the
//! generation service.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;

use super::provider::{GenerationService, TokenReceiver};
use super::types::SamplingParams;
use crate::context::assembler::Prompt;
use crate::context::window::estimate_tokens;
use crate::core::errors::RagError;

pub struct GenerationGateway {
    service: Arc<dyn GenerationService>,
}

impl GenerationGateway {
    pub fn new(service: Arc<dyn GenerationService>) -> Self {
        Self { service }
    }

    pub fn service_name(&self) -> &str {
        self.service.name()
    }

    pub fn max_input_tokens(&self) -> usize {
        self.service.max_input_tokens()
    }

    /// Generate a complete answer. Not retried on failure.
    pub async fn generate(&self, prompt: &Prompt, sampling: &SamplingParams) -> Result<String, RagError> {
        self.check_size(prompt)?;
        let messages = prompt.to_messages();
        self.service
            .complete(&messages, sampling)
            .await
            .map_err(RagError::Generation)
    }

    /// Start a streamed answer. Dropping the returned stream cancels generation.
    pub async fn stream(&self, prompt: &Prompt, sampling: &SamplingParams) -> Result<TokenStream, RagError> {
        self.check_size(prompt)?;
        let messages = prompt.to_messages();
        let receiver = self
            .service
            .stream(&messages, sampling)
            .await
            .map_err(RagError::Generation)?;
        Ok(TokenStream::new(receiver))
    }

    fn check_size(&self, prompt: &Prompt) -> Result<(), RagError> {
        let estimated_tokens = estimate_tokens(&prompt.render());
        let limit = self.service.max_input_tokens();
        if estimated_tokens > limit {
            return Err(RagError::PromptTooLarge {
                estimated_tokens,
                limit,
            });
        }
        Ok(())
    }
}

/// Finite, non-restartable sequence of generated text fragments.
pub struct TokenStream {
    receiver: TokenReceiver,
}

impl TokenStream {
    pub fn new(receiver: TokenReceiver) -> Self {
        Self { receiver }
    }

    /// Next fragment, or `None` once generation has finished.
    pub async fn next_token(&mut self) -> Option<Result<String, RagError>> {
        self.receiver
            .recv()
            .await
            .map(|item| item.map_err(RagError::Generation))
    }

    /// Drain the stream into one string.
    pub async fn collect_text(mut self) -> Result<String, RagError> {
        let mut text = String::new();
        while let Some(token) = self.next_token().await {
            text.push_str(&token?);
        }
        Ok(text)
    }
}

impl Stream for TokenStream {
    type Item = Result<String, RagError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver
            .poll_recv(cx)
            .map(|item| item.map(|result| result.map_err(RagError::Generation)))
    }
}

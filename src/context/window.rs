//! Context window budget.
//!
//! Token counts are estimated, not tokenized: ~4 characters per token.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ContextWindowConfig {
    /// Total tokens the model accepts (prompt + output).
    pub context_window_tokens: usize,
    /// Tokens kept free for the generated answer.
    pub reserved_output_tokens: usize,
}

impl Default for ContextWindowConfig {
    fn default() -> Self {
        Self {
            context_window_tokens: 4096,
            reserved_output_tokens: 512,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ContextWindow {
    config: ContextWindowConfig,
}

impl ContextWindow {
    pub fn new(config: ContextWindowConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ContextWindowConfig {
        &self.config
    }

    /// Tokens available to the prompt.
    pub fn available_tokens(&self) -> usize {
        self.config
            .context_window_tokens
            .saturating_sub(self.config.reserved_output_tokens)
    }
}

/// Estimate the token count of `text`.
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() + 3) / 4
}

/// Longest prefix of `text` whose estimate stays within `max_tokens`.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> &str {
    let max_chars = max_tokens.saturating_mul(4);
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

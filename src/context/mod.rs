//! Prompt assembly within the model's context window.

pub mod assembler;
pub mod prompt;
pub mod window;

pub use assembler::{Citation, ContextAssembler, Prompt};
pub use window::{ContextWindow, ContextWindowConfig};

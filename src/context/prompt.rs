use crate::history::Turn;
use crate::rag::types::RetrievalResult;

/// Body of the user message sent to the generation service.
pub fn render_user_message(context_block: &str, history: &str, question: &str) -> String {
    format!(
        "CONTEXT:\n{}\n\nCHAT HISTORY:\n{}\n\nQUESTION:\n{}\n\nANSWER:",
        context_block, history, question
    )
}

/// Oldest turn first, one `User:`/`Assistant:` pair per turn.
pub fn render_history(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|turn| format!("User: {}\nAssistant: {}", turn.question, turn.answer))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Numbered source blocks, in the order given.
pub fn render_context_block(results: &[RetrievalResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, result)| format!("[{}] Source: {}\n{}", i + 1, result.source_uri, result.chunk.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

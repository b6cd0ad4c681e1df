//! Context assembler: turns retrieval results into a bounded prompt.

use serde::{Deserialize, Serialize};

use super::prompt::{render_context_block, render_history, render_user_message};
use super::window::{estimate_tokens, ContextWindow};
use crate::core::errors::RagError;
use crate::history::Turn;
use crate::llm::types::ChatMessage;
use crate::rag::types::RetrievalResult;

/// Provenance of one numbered context block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// The `[n]` marker used in the context block.
    pub marker: usize,
    pub source_uri: String,
    pub chunk_id: String,
    pub sequence_index: usize,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct Prompt {
    pub instructions: String,
    pub context_block: String,
    pub query_text: String,
    pub history: String,
    pub citations: Vec<Citation>,
}

impl Prompt {
    pub fn user_message(&self) -> String {
        render_user_message(&self.context_block, &self.history, &self.query_text)
    }

    /// The full prompt text as seen by the model.
    pub fn render(&self) -> String {
        format!("{}\n\n{}", self.instructions, self.user_message())
    }

    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.render())
    }

    pub fn to_messages(&self) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(self.instructions.clone()),
            ChatMessage::user(self.user_message()),
        ]
    }
}

pub struct ContextAssembler {
    window: ContextWindow,
    instructions: String,
}

impl ContextAssembler {
    pub fn new(window: ContextWindow, instructions: impl Into<String>) -> Self {
        Self {
            window,
            instructions: instructions.into(),
        }
    }

    pub fn assemble(&self, query_text: &str, results: &[RetrievalResult]) -> Result<Prompt, RagError> {
        self.assemble_with_history(query_text, results, &[])
    }

    /// Build the prompt within the window. Conversation turns are dropped
    /// oldest first, then the lowest-ranked results. The top-ranked result
    /// is never dropped: when it cannot fit, the prompt is too large.
    pub fn assemble_with_history(
        &self,
        query_text: &str,
        results: &[RetrievalResult],
        history: &[Turn],
    ) -> Result<Prompt, RagError> {
        let mut ranked = results.to_vec();
        ranked.sort_by_key(|r| r.rank);

        let limit = self.window.available_tokens();
        let mut first_turn = 0;
        let mut keep = ranked.len();
        loop {
            let prompt = self.build(query_text, &ranked[..keep], &history[first_turn..]);
            let estimated_tokens = prompt.estimated_tokens();
            if estimated_tokens <= limit {
                if first_turn > 0 || keep < ranked.len() {
                    tracing::debug!(
                        dropped_turns = first_turn,
                        dropped_results = ranked.len() - keep,
                        "Trimmed prompt to fit the window"
                    );
                }
                return Ok(prompt);
            }
            if first_turn < history.len() {
                first_turn += 1;
            } else if keep > 1 {
                keep -= 1;
            } else {
                return Err(RagError::PromptTooLarge {
                    estimated_tokens,
                    limit,
                });
            }
        }
    }

    fn build(&self, query_text: &str, results: &[RetrievalResult], history: &[Turn]) -> Prompt {
        let citations = results
            .iter()
            .enumerate()
            .map(|(i, result)| Citation {
                marker: i + 1,
                source_uri: result.source_uri.clone(),
                chunk_id: result.chunk.id.clone(),
                sequence_index: result.chunk.sequence_index,
                score: result.similarity_score,
            })
            .collect();

        Prompt {
            instructions: self.instructions.clone(),
            context_block: render_context_block(results),
            query_text: query_text.to_string(),
            history: render_history(history),
            citations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::window::ContextWindowConfig;
    use crate::rag::types::Chunk;

    fn result(uri: &str, text: &str, rank: usize, score: f32) -> RetrievalResult {
        RetrievalResult {
            chunk: Chunk {
                id: format!("{}:{}", uri, rank),
                document_id: uri.to_string(),
                text: text.to_string(),
                start_offset: 0,
                end_offset: text.len(),
                sequence_index: rank,
                overlap_len: 0,
            },
            source_uri: uri.to_string(),
            similarity_score: score,
            rank,
        }
    }

    fn assembler(window_tokens: usize, reserved: usize) -> ContextAssembler {
        ContextAssembler::new(
            ContextWindow::new(ContextWindowConfig {
                context_window_tokens: window_tokens,
                reserved_output_tokens: reserved,
            }),
            "Use the context.",
        )
    }

    #[test]
    fn blocks_follow_rank_order_with_citations() {
        let results = vec![
            result("b.md", "Second text.", 2, 0.7),
            result("a.md", "First text.", 1, 0.9),
        ];

        let prompt = assembler(4096, 512).assemble("question?", &results).unwrap();

        assert_eq!(
            prompt.context_block,
            "[1] Source: a.md\nFirst text.\n\n[2] Source: b.md\nSecond text."
        );
        assert_eq!(prompt.citations.len(), 2);
        assert_eq!(prompt.citations[0].marker, 1);
        assert_eq!(prompt.citations[0].source_uri, "a.md");
        assert_eq!(prompt.citations[1].chunk_id, "b.md:2");
        assert!(prompt.render().contains("QUESTION:\nquestion?"));
    }

    #[test]
    fn lowest_ranked_results_are_dropped_to_fit() {
        let results = vec![
            result("a.md", &"alpha ".repeat(40), 1, 0.9),
            result("b.md", &"beta ".repeat(40), 2, 0.8),
            result("c.md", &"gamma ".repeat(40), 3, 0.7),
        ];
        let full = assembler(100_000, 0).assemble("q", &results).unwrap();
        let two = assembler(100_000, 0).assemble("q", &results[..2]).unwrap();
        let limit = two.estimated_tokens();
        assert!(full.estimated_tokens() > limit);

        let prompt = assembler(limit + 10, 10).assemble("q", &results).unwrap();

        assert_eq!(prompt.citations.len(), 2);
        assert_eq!(prompt.citations[1].source_uri, "b.md");
        assert!(prompt.estimated_tokens() <= limit);
    }

    #[test]
    fn oversized_query_is_rejected() {
        let err = assembler(64, 32)
            .assemble(&"very long question ".repeat(50), &[])
            .unwrap_err();

        assert!(matches!(err, RagError::PromptTooLarge { limit: 32, .. }));
    }

    fn turn(question: &str, answer: &str) -> Turn {
        Turn {
            question: question.to_string(),
            answer: answer.to_string(),
        }
    }

    #[test]
    fn history_is_rendered_into_the_user_message() {
        let results = vec![result("a.md", "Some context.", 1, 0.9)];
        let prompt = assembler(4096, 512)
            .assemble_with_history("and then?", &results, &[turn("first", "reply")])
            .unwrap();

        let messages = prompt.to_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "Use the context.");
        assert!(messages[1]
            .content
            .contains("CHAT HISTORY:\nUser: first\nAssistant: reply"));
        assert_eq!(prompt.citations.len(), 1);
    }

    #[test]
    fn history_is_trimmed_before_any_result() {
        let results = vec![result("a.md", "The answer lives here.", 1, 0.9)];
        let long_turn = turn("earlier question", &"long answer ".repeat(70));
        let without_history = assembler(100_000, 0).assemble("q", &results).unwrap();
        let limit = without_history.estimated_tokens();

        let prompt = assembler(limit, 0)
            .assemble_with_history("q", &results, &[long_turn])
            .unwrap();

        assert_eq!(prompt.citations.len(), 1);
        assert!(prompt.context_block.contains("The answer lives here."));
        assert!(prompt.history.is_empty());
    }

    #[test]
    fn oldest_turns_are_dropped_first() {
        let results = vec![result("a.md", "Context.", 1, 0.9)];
        let turns = vec![turn("old", &"x".repeat(200)), turn("new", "short")];
        let newest_only = assembler(100_000, 0)
            .assemble_with_history("q", &results, &turns[1..])
            .unwrap();
        let limit = newest_only.estimated_tokens();

        let prompt = assembler(limit, 0)
            .assemble_with_history("q", &results, &turns)
            .unwrap();

        assert_eq!(prompt.history, "User: new\nAssistant: short");
        assert_eq!(prompt.citations.len(), 1);
    }

    #[test]
    fn top_result_is_never_dropped() {
        let results = vec![result("a.md", &"context ".repeat(100), 1, 0.9)];
        let bare = assembler(100_000, 0).assemble("q", &[]).unwrap();

        let err = assembler(bare.estimated_tokens() + 5, 0)
            .assemble_with_history("q", &results, &[turn("q0", "a0")])
            .unwrap_err();

        assert!(matches!(err, RagError::PromptTooLarge { .. }));
    }
}

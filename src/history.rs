//! Conversation memory: the last few question/answer turns, replayed into
//! the prompt so follow-up questions keep their context.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub question: String,
    pub answer: String,
}

pub struct ConversationMemory {
    max_turns: usize,
    turns: Mutex<VecDeque<Turn>>,
}

impl ConversationMemory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            max_turns,
            turns: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self, question: impl Into<String>, answer: impl Into<String>) {
        if self.max_turns == 0 {
            return;
        }
        let mut turns = self.lock();
        while turns.len() >= self.max_turns {
            turns.pop_front();
        }
        turns.push_back(Turn {
            question: question.into(),
            answer: answer.into(),
        });
    }

    pub fn turns(&self) -> Vec<Turn> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Turn>> {
        self.turns.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

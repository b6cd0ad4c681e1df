//! Near-duplicate detection for retrieval candidates.
//!
//! Texts are compared by the Sørensen–Dice coefficient over the character
//! trigrams of their normalized form.

use std::collections::HashSet;

/// Lowercase, map non-alphanumerics to spaces and collapse whitespace.
pub fn normalize_text(text: &str) -> String {
    let mapped: String = text
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn trigrams(normalized: &str) -> HashSet<String> {
    let chars: Vec<char> = normalized.chars().collect();
    if chars.len() < 3 {
        return std::iter::once(normalized.to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    chars.windows(3).map(|w| w.iter().collect()).collect()
}

pub fn dice_coefficient(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let shared = a.intersection(b).count();
    (2 * shared) as f32 / (a.len() + b.len()) as f32
}

/// Similarity of two raw texts in [0, 1].
pub fn text_similarity(a: &str, b: &str) -> f32 {
    dice_coefficient(&trigrams(&normalize_text(a)), &trigrams(&normalize_text(b)))
}

/// Remembers kept texts and flags later ones that nearly repeat them.
pub struct NearDuplicateFilter {
    threshold: f32,
    kept: Vec<HashSet<String>>,
}

impl NearDuplicateFilter {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            kept: Vec::new(),
        }
    }

    /// Returns `true` and remembers `text` when it is not a near duplicate
    /// of anything kept so far.
    pub fn admit(&mut self, text: &str) -> bool {
        let grams = trigrams(&normalize_text(text));
        if self
            .kept
            .iter()
            .any(|kept| dice_coefficient(kept, &grams) > self.threshold)
        {
            return false;
        }
        self.kept.push(grams);
        true
    }
}

//! Retriever: embeds a query and selects a ranked, deduplicated and
//! size-bounded set of chunks.

use std::sync::Arc;

use super::dedup::NearDuplicateFilter;
use super::embedder::Embedder;
use super::store::{IndexFilter, ScoredEntry, VectorIndex};
use super::types::RetrievalResult;
use crate::core::errors::RagError;

#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    pub over_fetch_factor: usize,
    pub dedup_threshold: f32,
    pub min_score: Option<f32>,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            over_fetch_factor: 3,
            dedup_threshold: 0.9,
            min_score: None,
        }
    }
}

pub struct Retriever {
    embedder: Arc<Embedder>,
    index: Arc<dyn VectorIndex>,
    config: RetrieverConfig,
}

impl Retriever {
    pub fn new(embedder: Arc<Embedder>, index: Arc<dyn VectorIndex>, config: RetrieverConfig) -> Self {
        Self {
            embedder,
            index,
            config,
        }
    }

    pub async fn retrieve(
        &self,
        query_text: &str,
        k: usize,
        budget_chars: usize,
    ) -> Result<Vec<RetrievalResult>, RagError> {
        self.retrieve_filtered(query_text, k, budget_chars, None).await
    }

    pub async fn retrieve_filtered(
        &self,
        query_text: &str,
        k: usize,
        budget_chars: usize,
        filter: Option<&IndexFilter>,
    ) -> Result<Vec<RetrievalResult>, RagError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed_query(query_text).await?;
        let fetch = k.saturating_mul(self.config.over_fetch_factor.max(1));
        let candidates = self.index.query(&query_vector, fetch, filter).await?;
        let fetched = candidates.len();

        let results = select_results(candidates, k, budget_chars, &self.config);
        tracing::debug!(
            fetched,
            accepted = results.len(),
            k,
            budget_chars,
            "Retrieval finished"
        );
        Ok(results)
    }
}

/// Apply score floor, near-duplicate removal and the character budget to
/// candidates ordered best first.
pub fn select_results(
    candidates: Vec<ScoredEntry>,
    k: usize,
    budget_chars: usize,
    config: &RetrieverConfig,
) -> Vec<RetrievalResult> {
    let mut duplicates = NearDuplicateFilter::new(config.dedup_threshold);
    let mut remaining = budget_chars;
    let mut results = Vec::new();

    for candidate in candidates {
        if results.len() == k {
            break;
        }
        if config.min_score.is_some_and(|min| candidate.score < min) {
            continue;
        }
        if !duplicates.admit(&candidate.entry.chunk.text) {
            continue;
        }
        let len = candidate.entry.chunk.char_len();
        if len > remaining {
            continue;
        }
        remaining -= len;
        results.push(RetrievalResult {
            chunk: candidate.entry.chunk,
            source_uri: candidate.entry.source_uri,
            similarity_score: candidate.score,
            rank: results.len() + 1,
        });
    }
    results
}

//! Embedder: batches texts through a pluggable embedding backend.
//!
//! Vectors are cached by text digest, so the same text always maps to the
//! same vector for the lifetime of the embedder regardless of how inputs
//! were batched.

use std::collections::{HashMap, VecDeque};
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::types::{Chunk, EmbeddingVector};
use crate::context::window::{estimate_tokens, truncate_to_tokens};
use crate::core::errors::EmbeddingError;
use crate::vector_math;

/// A named embedding model with a declared output dimension.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    fn model_id(&self) -> &str;

    fn dimension(&self) -> usize;

    /// Longest accepted input, in (estimated) tokens.
    fn max_input_tokens(&self) -> usize;

    /// Embed one batch; must return one vector per input, in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// What ingestion does with a chunk longer than the backend's token limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OversizePolicy {
    /// Embed the longest prefix that fits; the stored text stays complete.
    Truncate,
    /// Leave the chunk out of the index.
    Skip,
}

#[derive(Debug, Clone)]
pub struct EmbedderConfig {
    pub batch_size: usize,
    /// Store unit-length vectors.
    pub normalize: bool,
    pub requests_per_second: Option<u32>,
    pub cache_capacity: usize,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            normalize: true,
            requests_per_second: None,
            cache_capacity: 50_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChunkEmbeddingFailure {
    pub chunk_id: String,
    pub error: EmbeddingError,
}

#[derive(Debug, Default)]
pub struct ChunkEmbeddings {
    pub vectors: Vec<EmbeddingVector>,
    pub failures: Vec<ChunkEmbeddingFailure>,
}

type CacheKey = [u8; 32];

#[derive(Default)]
struct EmbeddingCache {
    vectors: HashMap<CacheKey, Vec<f32>>,
    order: VecDeque<CacheKey>,
}

impl EmbeddingCache {
    fn get(&self, key: &CacheKey) -> Option<Vec<f32>> {
        self.vectors.get(key).cloned()
    }

    fn insert(&mut self, key: CacheKey, vector: Vec<f32>, capacity: usize) {
        if capacity == 0 || self.vectors.contains_key(&key) {
            return;
        }
        while self.order.len() >= capacity {
            match self.order.pop_front() {
                Some(evicted) => {
                    self.vectors.remove(&evicted);
                }
                None => break,
            }
        }
        self.order.push_back(key);
        self.vectors.insert(key, vector);
    }
}

pub struct Embedder {
    backend: Arc<dyn EmbeddingBackend>,
    config: EmbedderConfig,
    limiter: Option<DefaultDirectRateLimiter>,
    cache: Mutex<EmbeddingCache>,
}

impl Embedder {
    pub fn new(backend: Arc<dyn EmbeddingBackend>, config: EmbedderConfig) -> Self {
        let limiter = config
            .requests_per_second
            .and_then(NonZeroU32::new)
            .map(|rps| RateLimiter::direct(Quota::per_second(rps)));
        Self {
            backend,
            config,
            limiter,
            cache: Mutex::new(EmbeddingCache::default()),
        }
    }

    pub fn model_id(&self) -> &str {
        self.backend.model_id()
    }

    pub fn dimension(&self) -> usize {
        self.backend.dimension()
    }

    pub fn max_input_tokens(&self) -> usize {
        self.backend.max_input_tokens()
    }

    /// Embed every text, failing on the first text that cannot be embedded.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.embed_each(texts).await.into_iter().collect()
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors.pop().ok_or(EmbeddingError::CountMismatch {
            expected: 1,
            got: 0,
        })
    }

    /// Embed every text independently: a failing text does not fail its neighbours.
    pub async fn embed_each(&self, texts: &[String]) -> Vec<Result<Vec<f32>, EmbeddingError>> {
        let limit = self.max_input_tokens();
        let mut results: Vec<Option<Result<Vec<f32>, EmbeddingError>>> = vec![None; texts.len()];
        let mut pending: Vec<(CacheKey, Vec<usize>)> = Vec::new();
        let mut pending_slots: HashMap<CacheKey, usize> = HashMap::new();

        {
            let cache = self.lock_cache();
            for (index, text) in texts.iter().enumerate() {
                let tokens = estimate_tokens(text);
                if tokens > limit {
                    results[index] = Some(Err(EmbeddingError::TooLong {
                        index,
                        tokens,
                        limit,
                    }));
                    continue;
                }
                let key = cache_key(text);
                if let Some(vector) = cache.get(&key) {
                    results[index] = Some(Ok(vector));
                    continue;
                }
                match pending_slots.get(&key) {
                    Some(&slot) => pending[slot].1.push(index),
                    None => {
                        pending_slots.insert(key, pending.len());
                        pending.push((key, vec![index]));
                    }
                }
            }
        }

        let batch_size = self.config.batch_size.max(1);
        for batch in pending.chunks(batch_size) {
            let inputs: Vec<String> = batch
                .iter()
                .map(|(_, indices)| texts[indices[0]].clone())
                .collect();
            let outcome = self.embed_uncached(&inputs).await;

            match outcome {
                Ok(vectors) => {
                    let mut cache = self.lock_cache();
                    for ((key, indices), vector) in batch.iter().zip(vectors) {
                        let result = self.finish_vector(vector);
                        if let Ok(vector) = &result {
                            cache.insert(*key, vector.clone(), self.config.cache_capacity);
                        }
                        for &index in indices {
                            results[index] = Some(result.clone());
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(batch_len = inputs.len(), "Embedding batch failed: {}", err);
                    for (_, indices) in batch {
                        for &index in indices {
                            results[index] = Some(Err(err.clone()));
                        }
                    }
                }
            }
        }

        results
            .into_iter()
            .map(|result| result.unwrap_or(Err(EmbeddingError::Backend("no result produced".to_string()))))
            .collect()
    }

    /// Embed chunk texts, applying `oversize` to chunks over the token limit.
    pub async fn embed_chunks(&self, chunks: &[Chunk], oversize: OversizePolicy) -> ChunkEmbeddings {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let mut results = self.embed_each(&texts).await;

        if oversize == OversizePolicy::Truncate {
            let limit = self.max_input_tokens();
            let retry: Vec<usize> = results
                .iter()
                .enumerate()
                .filter(|(_, r)| matches!(r, Err(EmbeddingError::TooLong { .. })))
                .map(|(i, _)| i)
                .collect();
            if !retry.is_empty() {
                let truncated: Vec<String> = retry
                    .iter()
                    .map(|&i| truncate_to_tokens(&texts[i], limit).to_string())
                    .collect();
                let retried = self.embed_each(&truncated).await;
                for (i, result) in retry.into_iter().zip(retried) {
                    results[i] = result;
                }
            }
        }

        let mut out = ChunkEmbeddings::default();
        for (chunk, result) in chunks.iter().zip(results) {
            match result {
                Ok(vector) => out.vectors.push(EmbeddingVector {
                    chunk_id: chunk.id.clone(),
                    vector,
                    model_id: self.model_id().to_string(),
                }),
                Err(error) => {
                    tracing::warn!(chunk_id = %chunk.id, "Chunk not embedded: {}", error);
                    out.failures.push(ChunkEmbeddingFailure {
                        chunk_id: chunk.id.clone(),
                        error,
                    });
                }
            }
        }
        out
    }

    async fn embed_uncached(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
        let vectors = self.backend.embed_batch(inputs).await?;
        if vectors.len() != inputs.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: inputs.len(),
                got: vectors.len(),
            });
        }
        Ok(vectors)
    }

    fn finish_vector(&self, vector: Vec<f32>) -> Result<Vec<f32>, EmbeddingError> {
        let expected = self.dimension();
        if vector.len() != expected {
            return Err(EmbeddingError::Dimension {
                expected,
                got: vector.len(),
            });
        }
        if self.config.normalize {
            Ok(vector_math::normalize(&vector))
        } else {
            Ok(vector)
        }
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, EmbeddingCache> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn cache_key(text: &str) -> CacheKey {
    Sha256::digest(text.as_bytes()).into()
}

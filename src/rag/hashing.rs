//! Local feature-hashing embedding backend.
//!
//! Words are hashed into signed buckets. No model download, fully
//! deterministic, suited to offline runs and tests; semantic quality is
//! limited to lexical overlap.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::embedder::EmbeddingBackend;
use crate::core::errors::EmbeddingError;

pub struct HashingEmbeddings {
    model_id: String,
    dimension: usize,
    max_input_tokens: usize,
}

impl HashingEmbeddings {
    pub fn new(dimension: usize, max_input_tokens: usize) -> Self {
        Self {
            model_id: format!("hashing-{}", dimension),
            dimension,
            max_input_tokens,
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        if self.dimension == 0 {
            return vector;
        }
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let digest = Sha256::digest(word.to_lowercase().as_bytes());
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&digest[..8]);
            let hash = u64::from_le_bytes(bytes);
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingBackend for HashingEmbeddings {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn max_input_tokens(&self) -> usize {
        self.max_input_tokens
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}

//! Documents, chunks and index entries shared by the ingestion and query paths.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Raw input handed over by a fetch/parse collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub source_uri: String,
    pub raw_text: String,
}

impl SourceDocument {
    pub fn new(source_uri: impl Into<String>, raw_text: impl Into<String>) -> Self {
        Self {
            source_uri: source_uri.into(),
            raw_text: raw_text.into(),
        }
    }
}

/// An ingested document. Re-ingesting the same `source_uri` yields the same id,
/// so the new version supersedes the old one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub source_uri: String,
    pub raw_text: String,
    pub fetched_at: DateTime<Utc>,
}

impl Document {
    pub fn new(source_uri: impl Into<String>, raw_text: impl Into<String>) -> Self {
        let source_uri = source_uri.into();
        Self {
            id: document_id_for(&source_uri),
            source_uri,
            raw_text: raw_text.into(),
            fetched_at: Utc::now(),
        }
    }
}

impl From<SourceDocument> for Document {
    fn from(source: SourceDocument) -> Self {
        Document::new(source.source_uri, source.raw_text)
    }
}

/// Stable document id: first 16 bytes of SHA-256 over the source uri.
pub fn document_id_for(source_uri: &str) -> String {
    let digest = Sha256::digest(source_uri.as_bytes());
    hex::encode(&digest[..16])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    /// Exactly `raw_text[start_offset..end_offset]`.
    pub text: String,
    /// Byte offset into the document text, overlap prefix included.
    pub start_offset: usize,
    pub end_offset: usize,
    pub sequence_index: usize,
    /// Byte length of the prefix repeated from the previous chunk.
    pub overlap_len: usize,
}

impl Chunk {
    pub fn chunk_id(document_id: &str, sequence_index: usize) -> String {
        format!("{}:{}", document_id, sequence_index)
    }

    /// The part of the text not shared with the previous chunk.
    pub fn fresh_text(&self) -> &str {
        &self.text[self.overlap_len..]
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingVector {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub model_id: String,
}

impl EmbeddingVector {
    pub fn dimension(&self) -> usize {
        self.vector.len()
    }

    pub fn l2_norm(&self) -> f32 {
        crate::vector_math::l2_norm(&self.vector)
    }

    pub fn normalized(&self) -> Self {
        Self {
            chunk_id: self.chunk_id.clone(),
            vector: crate::vector_math::normalize(&self.vector),
            model_id: self.model_id.clone(),
        }
    }
}

/// The persisted unit of the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub embedding: EmbeddingVector,
    pub source_uri: String,
}

impl IndexEntry {
    pub fn document_id(&self) -> &str {
        &self.chunk.document_id
    }

    pub fn sequence_index(&self) -> usize {
        self.chunk.sequence_index
    }
}

/// One accepted retrieval candidate. Produced per query, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub chunk: Chunk,
    pub source_uri: String,
    pub similarity_score: f32,
    /// 1-based.
    pub rank: usize,
}

//! VectorIndex trait: the persistence seam of the ingestion and query paths.
//!
//! Two backends implement it: `MemoryIndex` and `SqliteIndex`.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::types::IndexEntry;
use crate::core::errors::IndexError;
use crate::vector_math;

/// Restricts a query or count to a subset of the index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexFilter {
    pub source_uri: Option<String>,
    pub document_id: Option<String>,
}

impl IndexFilter {
    pub fn source(source_uri: impl Into<String>) -> Self {
        Self {
            source_uri: Some(source_uri.into()),
            document_id: None,
        }
    }

    pub fn matches(&self, entry: &IndexEntry) -> bool {
        self.source_uri
            .as_deref()
            .map_or(true, |uri| uri == entry.source_uri)
            && self
                .document_id
                .as_deref()
                .map_or(true, |id| id == entry.document_id())
    }
}

/// An index entry together with its similarity to the query vector.
#[derive(Debug, Clone)]
pub struct ScoredEntry {
    pub entry: IndexEntry,
    pub score: f32,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Embedding model the stored vectors were produced with.
    fn model_id(&self) -> &str;

    fn dimension(&self) -> usize;

    /// Insert entries. Entries are grouped per document and every group
    /// replaces all prior entries of its document atomically.
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<(), IndexError>;

    /// Remove every entry of a document. Returns the number removed.
    async fn delete(&self, document_id: &str) -> Result<usize, IndexError>;

    /// Up to `k` entries most similar to `vector`, best first.
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&IndexFilter>,
    ) -> Result<Vec<ScoredEntry>, IndexError>;

    async fn count(&self, filter: Option<&IndexFilter>) -> Result<usize, IndexError>;

    /// Release held resources. The index must not be used afterwards.
    async fn close(&self) {}
}

/// Check the per-entry invariants shared by all backends.
pub fn validate_entries(entries: &[IndexEntry], dimension: usize) -> Result<(), IndexError> {
    for entry in entries {
        if entry.embedding.chunk_id != entry.chunk.id {
            return Err(IndexError::DanglingVector {
                chunk_id: entry.chunk.id.clone(),
                vector_chunk_id: entry.embedding.chunk_id.clone(),
            });
        }
        if entry.embedding.dimension() != dimension {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                got: entry.embedding.dimension(),
            });
        }
    }
    Ok(())
}

/// Group entries by document, keeping first-seen document order and
/// sorting each group by sequence index.
pub fn group_by_document(entries: Vec<IndexEntry>) -> Vec<(String, Vec<IndexEntry>)> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: BTreeMap<String, Vec<IndexEntry>> = BTreeMap::new();
    for entry in entries {
        let document_id = entry.document_id().to_string();
        groups
            .entry(document_id.clone())
            .or_insert_with(|| {
                order.push(document_id);
                Vec::new()
            })
            .push(entry);
    }
    order
        .into_iter()
        .filter_map(|id| {
            groups.remove(&id).map(|mut group| {
                group.sort_by_key(|e| e.sequence_index());
                (id, group)
            })
        })
        .collect()
}

/// Score candidates against `vector` and keep the best `k`.
///
/// Ordering is by descending score, then lower sequence index, then chunk id.
pub fn rank_entries<'a, I>(vector: &[f32], k: usize, candidates: I) -> Vec<ScoredEntry>
where
    I: IntoIterator<Item = &'a IndexEntry>,
{
    if k == 0 {
        return Vec::new();
    }
    let mut scored: Vec<ScoredEntry> = candidates
        .into_iter()
        .map(|entry| ScoredEntry {
            score: vector_math::cosine_similarity(vector, &entry.embedding.vector),
            entry: entry.clone(),
        })
        .collect();
    scored.sort_by(compare_scored);
    scored.truncate(k);
    scored
}

pub fn compare_scored(a: &ScoredEntry, b: &ScoredEntry) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.entry.sequence_index().cmp(&b.entry.sequence_index()))
        .then_with(|| a.entry.chunk.id.cmp(&b.entry.chunk.id))
}

pub fn check_query_dimension(vector: &[f32], dimension: usize) -> Result<(), IndexError> {
    if vector.len() != dimension {
        return Err(IndexError::DimensionMismatch {
            expected: dimension,
            got: vector.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::rag::types::{Chunk, EmbeddingVector};

    pub(crate) fn entry(source_uri: &str, seq: usize, text: &str, vector: Vec<f32>) -> IndexEntry {
        let document_id = crate::rag::types::document_id_for(source_uri);
        let id = Chunk::chunk_id(&document_id, seq);
        IndexEntry {
            chunk: Chunk {
                id: id.clone(),
                document_id,
                text: text.to_string(),
                start_offset: seq * 100,
                end_offset: seq * 100 + text.len(),
                sequence_index: seq,
                overlap_len: 0,
            },
            embedding: EmbeddingVector {
                chunk_id: id,
                vector,
                model_id: "test-model".to_string(),
            },
            source_uri: source_uri.to_string(),
        }
    }

    #[test]
    fn ties_break_on_sequence_then_id() {
        let entries = vec![
            entry("b", 2, "x", vec![1.0, 0.0]),
            entry("a", 1, "x", vec![1.0, 0.0]),
            entry("c", 0, "x", vec![0.0, 1.0]),
            entry("d", 0, "x", vec![2.0, 0.0]),
        ];

        let ranked = rank_entries(&[1.0, 0.0], 10, &entries);
        let order: Vec<(String, usize)> = ranked
            .iter()
            .map(|s| (s.entry.source_uri.clone(), s.entry.sequence_index()))
            .collect();

        assert_eq!(
            order,
            vec![
                ("d".to_string(), 0),
                ("a".to_string(), 1),
                ("b".to_string(), 2),
                ("c".to_string(), 0)
            ]
        );
        assert!(ranked.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn validation_catches_dangling_vectors_and_bad_dimensions() {
        let mut dangling = entry("a", 0, "x", vec![1.0, 0.0]);
        dangling.embedding.chunk_id = "other:0".to_string();
        assert!(matches!(
            validate_entries(&[dangling], 2),
            Err(IndexError::DanglingVector { .. })
        ));

        let wrong = entry("a", 0, "x", vec![1.0, 0.0, 0.0]);
        assert_eq!(
            validate_entries(&[wrong], 2),
            Err(IndexError::DimensionMismatch { expected: 2, got: 3 })
        );
    }

    #[test]
    fn grouping_keeps_document_order() {
        let groups = group_by_document(vec![
            entry("b", 1, "x", vec![1.0]),
            entry("a", 0, "x", vec![1.0]),
            entry("b", 0, "x", vec![1.0]),
        ]);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].1[0].source_uri, "b");
        assert_eq!(groups[0].1[0].sequence_index(), 0);
        assert_eq!(groups[0].1[1].sequence_index(), 1);
        assert_eq!(groups[1].1[0].source_uri, "a");
    }

    #[test]
    fn filter_matches_source_and_document() {
        let e = entry("doc.md", 0, "x", vec![1.0]);
        assert!(IndexFilter::default().matches(&e));
        assert!(IndexFilter::source("doc.md").matches(&e));
        assert!(!IndexFilter::source("other.md").matches(&e));
        let by_id = IndexFilter {
            source_uri: None,
            document_id: Some("nope".to_string()),
        };
        assert!(!by_id.matches(&e));
    }
}

//! In-process vector index.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::store::{
    check_query_dimension, group_by_document, rank_entries, validate_entries, IndexFilter,
    ScoredEntry, VectorIndex,
};
use super::types::IndexEntry;
use crate::core::errors::IndexError;

/// Entries keyed by document id. Each document's entries are swapped in
/// under one write lock, so readers never observe a partial document.
pub struct MemoryIndex {
    model_id: String,
    dimension: usize,
    documents: RwLock<HashMap<String, Vec<IndexEntry>>>,
}

impl MemoryIndex {
    pub fn new(model_id: impl Into<String>, dimension: usize) -> Self {
        Self {
            model_id: model_id.into(),
            dimension,
            documents: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<(), IndexError> {
        validate_entries(&entries, self.dimension)?;
        let groups = group_by_document(entries);

        let mut documents = self.documents.write().await;
        for (document_id, group) in groups {
            documents.insert(document_id, group);
        }
        Ok(())
    }

    async fn delete(&self, document_id: &str) -> Result<usize, IndexError> {
        let mut documents = self.documents.write().await;
        Ok(documents.remove(document_id).map_or(0, |entries| entries.len()))
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&IndexFilter>,
    ) -> Result<Vec<ScoredEntry>, IndexError> {
        check_query_dimension(vector, self.dimension)?;

        let documents = self.documents.read().await;
        let candidates = documents
            .values()
            .flatten()
            .filter(|entry| filter.map_or(true, |f| f.matches(entry)));
        Ok(rank_entries(vector, k, candidates))
    }

    async fn count(&self, filter: Option<&IndexFilter>) -> Result<usize, IndexError> {
        let documents = self.documents.read().await;
        Ok(documents
            .values()
            .flatten()
            .filter(|entry| filter.map_or(true, |f| f.matches(entry)))
            .count())
    }
}

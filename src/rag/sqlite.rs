//! SQLite-backed vector index.
//!
//! Chunks and their vectors live in one table keyed by
//! `(source_uri, sequence_index)`; search is brute-force cosine similarity.

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use super::store::{
    check_query_dimension, group_by_document, rank_entries, validate_entries, IndexFilter,
    ScoredEntry, VectorIndex,
};
use super::types::{Chunk, EmbeddingVector, IndexEntry};
use crate::core::errors::IndexError;

pub struct SqliteIndex {
    pool: SqlitePool,
    model_id: String,
    dimension: usize,
}

impl SqliteIndex {
    /// Open (or create) the index at `db_path` for the given embedding model.
    ///
    /// Entries written by a different model or dimension are discarded.
    pub async fn open(
        db_path: impl AsRef<Path>,
        model_id: impl Into<String>,
        dimension: usize,
    ) -> Result<Self, IndexError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(IndexError::storage)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(IndexError::storage)?;

        let index = Self {
            pool,
            model_id: model_id.into(),
            dimension,
        };
        index.init_schema().await?;
        index.check_model().await?;
        Ok(index)
    }

    async fn init_schema(&self) -> Result<(), IndexError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS index_entries (
                source_uri TEXT NOT NULL,
                sequence_index INTEGER NOT NULL,
                document_id TEXT NOT NULL,
                chunk_id TEXT NOT NULL,
                content TEXT NOT NULL,
                start_offset INTEGER NOT NULL,
                end_offset INTEGER NOT NULL,
                overlap_len INTEGER NOT NULL DEFAULT 0,
                model_id TEXT NOT NULL,
                embedding BLOB NOT NULL,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
                PRIMARY KEY (source_uri, sequence_index)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(IndexError::storage)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_index_entries_document ON index_entries(document_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(IndexError::storage)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS index_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(IndexError::storage)?;

        Ok(())
    }

    async fn stored_meta(&self, key: &str) -> Result<Option<String>, IndexError> {
        sqlx::query_scalar("SELECT value FROM index_meta WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(IndexError::storage)
    }

    async fn check_model(&self) -> Result<(), IndexError> {
        let stored_model = self.stored_meta("embedding_model").await?;
        let stored_dimension = self.stored_meta("dimension").await?;
        let dimension = self.dimension.to_string();

        let unchanged = stored_model.as_deref() == Some(self.model_id.as_str())
            && stored_dimension.as_deref() == Some(dimension.as_str());
        if unchanged {
            return Ok(());
        }

        if let Some(previous) = &stored_model {
            tracing::warn!(
                previous = %previous,
                current = %self.model_id,
                "Embedding model changed, clearing vector index"
            );
        }
        self.reindex_with_model().await
    }

    /// Drop every entry and record the current model as the index owner.
    async fn reindex_with_model(&self) -> Result<(), IndexError> {
        let mut tx = self.pool.begin().await.map_err(IndexError::storage)?;

        sqlx::query("DELETE FROM index_entries")
            .execute(&mut *tx)
            .await
            .map_err(IndexError::storage)?;

        for (key, value) in [
            ("embedding_model", self.model_id.clone()),
            ("dimension", self.dimension.to_string()),
        ] {
            sqlx::query(
                "INSERT OR REPLACE INTO index_meta (key, value, updated_at)
                 VALUES (?1, ?2, STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))",
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await
            .map_err(IndexError::storage)?;
        }

        tx.commit().await.map_err(IndexError::storage)?;
        Ok(())
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(
        chunk_id: &str,
        bytes: &[u8],
        dimension: usize,
    ) -> Result<Vec<f32>, IndexError> {
        if bytes.len() != dimension * 4 {
            return Err(IndexError::Corrupt {
                chunk_id: chunk_id.to_string(),
                reason: format!(
                    "embedding blob has {} bytes, expected {}",
                    bytes.len(),
                    dimension * 4
                ),
            });
        }
        Ok(bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }

    fn row_to_entry(&self, row: &sqlx::sqlite::SqliteRow) -> Result<IndexEntry, IndexError> {
        let chunk_id: String = row.try_get("chunk_id").map_err(IndexError::storage)?;
        let blob: Vec<u8> = row.try_get("embedding").map_err(IndexError::storage)?;
        let vector = Self::deserialize_embedding(&chunk_id, &blob, self.dimension)?;

        let read_usize = |column: &str| -> Result<usize, IndexError> {
            let value: i64 = row.try_get(column).map_err(IndexError::storage)?;
            usize::try_from(value).map_err(|_| IndexError::Corrupt {
                chunk_id: chunk_id.clone(),
                reason: format!("negative {}", column),
            })
        };

        Ok(IndexEntry {
            chunk: Chunk {
                id: chunk_id.clone(),
                document_id: row.try_get("document_id").map_err(IndexError::storage)?,
                text: row.try_get("content").map_err(IndexError::storage)?,
                start_offset: read_usize("start_offset")?,
                end_offset: read_usize("end_offset")?,
                sequence_index: read_usize("sequence_index")?,
                overlap_len: read_usize("overlap_len")?,
            },
            embedding: EmbeddingVector {
                chunk_id: chunk_id.clone(),
                vector,
                model_id: row.try_get("model_id").map_err(IndexError::storage)?,
            },
            source_uri: row.try_get("source_uri").map_err(IndexError::storage)?,
        })
    }

    async fn fetch_entries(&self, filter: Option<&IndexFilter>) -> Result<Vec<IndexEntry>, IndexError> {
        let filter = filter.cloned().unwrap_or_default();
        let rows = sqlx::query(
            "SELECT source_uri, sequence_index, document_id, chunk_id, content,
                    start_offset, end_offset, overlap_len, model_id, embedding
             FROM index_entries
             WHERE (?1 IS NULL OR source_uri = ?1)
               AND (?2 IS NULL OR document_id = ?2)",
        )
        .bind(filter.source_uri)
        .bind(filter.document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(IndexError::storage)?;

        rows.iter().map(|row| self.row_to_entry(row)).collect()
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<(), IndexError> {
        if entries.is_empty() {
            return Ok(());
        }
        validate_entries(&entries, self.dimension)?;

        for (document_id, group) in group_by_document(entries) {
            let mut tx = self.pool.begin().await.map_err(IndexError::storage)?;

            sqlx::query("DELETE FROM index_entries WHERE document_id = ?1")
                .bind(&document_id)
                .execute(&mut *tx)
                .await
                .map_err(IndexError::storage)?;

            for entry in &group {
                let blob = Self::serialize_embedding(&entry.embedding.vector);
                sqlx::query(
                    "INSERT OR REPLACE INTO index_entries
                        (source_uri, sequence_index, document_id, chunk_id, content,
                         start_offset, end_offset, overlap_len, model_id, embedding)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                )
                .bind(&entry.source_uri)
                .bind(entry.chunk.sequence_index as i64)
                .bind(&entry.chunk.document_id)
                .bind(&entry.chunk.id)
                .bind(&entry.chunk.text)
                .bind(entry.chunk.start_offset as i64)
                .bind(entry.chunk.end_offset as i64)
                .bind(entry.chunk.overlap_len as i64)
                .bind(&entry.embedding.model_id)
                .bind(&blob)
                .execute(&mut *tx)
                .await
                .map_err(IndexError::storage)?;
            }

            tx.commit().await.map_err(IndexError::storage)?;
            tracing::debug!(document_id = %document_id, entries = group.len(), "Document indexed");
        }
        Ok(())
    }

    async fn delete(&self, document_id: &str) -> Result<usize, IndexError> {
        let result = sqlx::query("DELETE FROM index_entries WHERE document_id = ?1")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(IndexError::storage)?;

        Ok(result.rows_affected() as usize)
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&IndexFilter>,
    ) -> Result<Vec<ScoredEntry>, IndexError> {
        check_query_dimension(vector, self.dimension)?;
        let entries = self.fetch_entries(filter).await?;
        Ok(rank_entries(vector, k, &entries))
    }

    async fn count(&self, filter: Option<&IndexFilter>) -> Result<usize, IndexError> {
        let filter = filter.cloned().unwrap_or_default();
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM index_entries
             WHERE (?1 IS NULL OR source_uri = ?1)
               AND (?2 IS NULL OR document_id = ?2)",
        )
        .bind(filter.source_uri)
        .bind(filter.document_id)
        .fetch_one(&self.pool)
        .await
        .map_err(IndexError::storage)?;

        Ok(count as usize)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use super::*;
    use crate::rag::store::tests::entry;

    fn temp_db() -> PathBuf {
        std::env::temp_dir().join(format!("docsage-index-test-{}.db", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn upsert_and_query() {
        let index = SqliteIndex::open(temp_db(), "test-model", 3).await.unwrap();

        index
            .upsert(vec![
                entry("doc", 0, "Hello world", vec![1.0, 0.0, 0.0]),
                entry("doc", 1, "Other", vec![0.0, 1.0, 0.0]),
            ])
            .await
            .unwrap();
        assert_eq!(index.count(None).await.unwrap(), 2);

        let results = index.query(&[1.0, 0.0, 0.0], 10, None).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].entry.chunk.text, "Hello world");
        assert!(results[0].score > 0.99);
        assert_eq!(results[0].entry.chunk.id, results[0].entry.embedding.chunk_id);
    }

    #[tokio::test]
    async fn reingest_replaces_document_entries() {
        let index = SqliteIndex::open(temp_db(), "test-model", 2).await.unwrap();

        index
            .upsert(vec![
                entry("doc", 0, "a", vec![1.0, 0.0]),
                entry("doc", 1, "b", vec![1.0, 0.0]),
                entry("keep", 0, "c", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();
        index
            .upsert(vec![entry("doc", 0, "a2", vec![1.0, 0.0])])
            .await
            .unwrap();

        assert_eq!(index.count(None).await.unwrap(), 2);
        assert_eq!(
            index.count(Some(&IndexFilter::source("doc"))).await.unwrap(),
            1
        );
        let results = index
            .query(&[1.0, 0.0], 10, Some(&IndexFilter::source("doc")))
            .await
            .unwrap();
        assert_eq!(results[0].entry.chunk.text, "a2");
    }

    #[tokio::test]
    async fn entries_survive_reopen_with_same_model() {
        let path = temp_db();
        {
            let index = SqliteIndex::open(&path, "test-model", 2).await.unwrap();
            index
                .upsert(vec![entry("doc", 0, "persisted", vec![0.6, 0.8])])
                .await
                .unwrap();
            index.close().await;
        }

        let reopened = SqliteIndex::open(&path, "test-model", 2).await.unwrap();
        let results = reopened.query(&[0.6, 0.8], 1, None).await.unwrap();
        assert_eq!(results[0].entry.chunk.text, "persisted");
        assert_eq!(results[0].entry.embedding.vector, vec![0.6, 0.8]);
    }

    #[tokio::test]
    async fn model_change_clears_entries() {
        let path = temp_db();
        {
            let index = SqliteIndex::open(&path, "embed-v1", 2).await.unwrap();
            index
                .upsert(vec![entry("doc", 0, "old", vec![1.0, 0.0])])
                .await
                .unwrap();
            index.close().await;
        }

        let index = SqliteIndex::open(&path, "embed-v2", 2).await.unwrap();
        assert_eq!(index.count(None).await.unwrap(), 0);
        assert_eq!(
            index.stored_meta("embedding_model").await.unwrap().as_deref(),
            Some("embed-v2")
        );
    }

    #[tokio::test]
    async fn corrupt_blob_is_reported() {
        let index = SqliteIndex::open(temp_db(), "test-model", 2).await.unwrap();
        index
            .upsert(vec![entry("doc", 0, "x", vec![1.0, 0.0])])
            .await
            .unwrap();

        sqlx::query("UPDATE index_entries SET embedding = ?1")
            .bind(vec![0u8; 5])
            .execute(&index.pool)
            .await
            .unwrap();

        let err = index.query(&[1.0, 0.0], 1, None).await.unwrap_err();
        assert!(matches!(err, IndexError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn delete_document() {
        let index = SqliteIndex::open(temp_db(), "test-model", 2).await.unwrap();
        index
            .upsert(vec![
                entry("a", 0, "x", vec![1.0, 0.0]),
                entry("a", 1, "y", vec![1.0, 0.0]),
                entry("b", 0, "z", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let removed = index
            .delete(&crate::rag::types::document_id_for("a"))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(index.count(None).await.unwrap(), 1);
    }
}

//! ContextStore trait and its SQLite implementation.
//!
//! Chunks live in their own database (`rag.db`) with the embedding stored as a
//! little-endian f32 BLOB. Search is brute-force cosine similarity.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::{Row, SqlitePool};

use super::embedder::{cosine_similarity, Embedder};
use crate::core::errors::ApiError;
use crate::models::{FileType, SearchResult};

/// Metadata shared by every chunk of one document.
#[derive(Debug, Clone)]
pub struct ChunkMetadata {
    pub document_id: String,
    pub filename: String,
    pub file_type: FileType,
}

/// Durable chunk storage with similarity search.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Stores `chunks` under `metadata.document_id`, replacing any previous
    /// chunks for that document. Safe to retry. Returns the stored count.
    async fn upsert(&self, chunks: Vec<String>, metadata: ChunkMetadata) -> Result<usize, ApiError>;

    /// Up to `k` chunks ranked by descending similarity (higher = closer).
    async fn query(&self, text: &str, k: usize) -> Result<Vec<SearchResult>, ApiError>;

    /// Removes every chunk of a document. Returns the number removed.
    async fn delete(&self, document_id: &str) -> Result<usize, ApiError>;
}

pub struct SqliteContextStore {
    pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
}

impl SqliteContextStore {
    pub async fn new(pool: SqlitePool, embedder: Arc<dyn Embedder>) -> Result<Self, ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS rag_chunks (
                chunk_id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                source TEXT NOT NULL DEFAULT '',
                metadata TEXT NOT NULL DEFAULT '{}',
                embedding BLOB
            )",
        )
        .execute(&pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_rag_document ON rag_chunks(document_id)")
            .execute(&pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(Self { pool, embedder })
    }

    pub async fn count(&self, document_id: &str) -> Result<usize, ApiError> {
        let count: i64 = sqlx::query("SELECT COUNT(*) FROM rag_chunks WHERE document_id = ?1")
            .bind(document_id)
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::internal)?
            .get(0);
        Ok(count as usize)
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }
}

#[async_trait]
impl ContextStore for SqliteContextStore {
    async fn upsert(&self, chunks: Vec<String>, metadata: ChunkMetadata) -> Result<usize, ApiError> {
        let embeddings = self.embedder.embed(&chunks).await?;
        if embeddings.len() != chunks.len() {
            return Err(ApiError::external(format!(
                "Embedder returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            )));
        }

        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        for (index, (content, embedding)) in chunks.iter().zip(embeddings.iter()).enumerate() {
            let chunk_metadata = json!({
                "document_id": metadata.document_id,
                "filename": metadata.filename,
                "file_type": metadata.file_type.as_str(),
                "chunk_index": index,
            });

            sqlx::query(
                "INSERT OR REPLACE INTO rag_chunks (chunk_id, document_id, chunk_index, content, source, metadata, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .bind(format!("{}:{}", metadata.document_id, index))
            .bind(&metadata.document_id)
            .bind(index as i64)
            .bind(content)
            .bind(&metadata.filename)
            .bind(chunk_metadata.to_string())
            .bind(Self::serialize_embedding(embedding))
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
        }

        // A retry with fewer chunks must not leave stale tail rows behind.
        sqlx::query("DELETE FROM rag_chunks WHERE document_id = ?1 AND chunk_index >= ?2")
            .bind(&metadata.document_id)
            .bind(chunks.len() as i64)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;

        tx.commit().await.map_err(ApiError::internal)?;
        Ok(chunks.len())
    }

    async fn query(&self, text: &str, k: usize) -> Result<Vec<SearchResult>, ApiError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_embedding = self
            .embedder
            .embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();

        let rows = sqlx::query("SELECT content, source, metadata, embedding FROM rag_chunks")
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        let mut scored: Vec<SearchResult> = rows
            .iter()
            .filter_map(|row| {
                let embedding_bytes: Vec<u8> = row.try_get("embedding").ok()?;
                if embedding_bytes.is_empty() {
                    return None;
                }
                let stored = Self::deserialize_embedding(&embedding_bytes);
                let metadata: String = row.try_get("metadata").ok()?;

                Some(SearchResult {
                    content: row.try_get("content").ok()?,
                    source: row.try_get("source").ok()?,
                    score: cosine_similarity(&query_embedding, &stored),
                    metadata: serde_json::from_str::<Value>(&metadata).unwrap_or(Value::Null),
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);

        Ok(scored)
    }

    async fn delete(&self, document_id: &str) -> Result<usize, ApiError> {
        let result = sqlx::query("DELETE FROM rag_chunks WHERE document_id = ?1")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(result.rows_affected() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db;
    use crate::rag::HashingEmbedder;
    use tempfile::TempDir;

    async fn create_store() -> (TempDir, SqliteContextStore) {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::connect(&dir.path().join("rag.db"), 2).await.unwrap();
        let store = SqliteContextStore::new(pool, Arc::new(HashingEmbedder::new(256)))
            .await
            .unwrap();
        (dir, store)
    }

    fn meta(document_id: &str) -> ChunkMetadata {
        ChunkMetadata {
            document_id: document_id.to_string(),
            filename: format!("{}.txt", document_id),
            file_type: FileType::Txt,
        }
    }

    #[tokio::test]
    async fn query_ranks_by_descending_similarity() {
        let (_dir, store) = create_store().await;
        store
            .upsert(
                vec![
                    "Rust ownership and borrowing".to_string(),
                    "Paris is the capital of France".to_string(),
                    "Bread recipes with sourdough".to_string(),
                ],
                meta("doc1"),
            )
            .await
            .unwrap();

        let results = store.query("capital of France", 3).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].content, "Paris is the capital of France");
        assert!(results[0].score >= results[1].score);
        assert!(results[1].score >= results[2].score);
        assert_eq!(results[0].source, "doc1.txt");
        assert_eq!(results[0].metadata["document_id"], "doc1");
        assert_eq!(results[0].metadata["chunk_index"], 1);
        assert_eq!(results[0].metadata["file_type"], "txt");
    }

    #[tokio::test]
    async fn query_respects_k() {
        let (_dir, store) = create_store().await;
        let chunks: Vec<String> = (0..5).map(|i| format!("chunk number {}", i)).collect();
        store.upsert(chunks, meta("doc1")).await.unwrap();

        assert_eq!(store.query("chunk", 2).await.unwrap().len(), 2);
        assert!(store.query("chunk", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_drops_stale_chunks() {
        let (_dir, store) = create_store().await;
        let chunks: Vec<String> = (0..4).map(|i| format!("part {}", i)).collect();

        assert_eq!(store.upsert(chunks.clone(), meta("doc1")).await.unwrap(), 4);
        assert_eq!(store.upsert(chunks.clone(), meta("doc1")).await.unwrap(), 4);
        assert_eq!(store.count("doc1").await.unwrap(), 4);

        store
            .upsert(chunks[..2].to_vec(), meta("doc1"))
            .await
            .unwrap();
        assert_eq!(store.count("doc1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn delete_removes_only_that_document() {
        let (_dir, store) = create_store().await;
        store
            .upsert(vec!["alpha text".to_string()], meta("doc1"))
            .await
            .unwrap();
        store
            .upsert(vec!["beta text".to_string()], meta("doc2"))
            .await
            .unwrap();

        assert_eq!(store.delete("doc1").await.unwrap(), 1);

        let results = store.query("alpha text", 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].metadata["document_id"], "doc2");
    }
}

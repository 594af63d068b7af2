//! Chunk persistence
//!
//! [`PgChunkStore`] writes chunks with their pgvector embeddings inside one
//! transaction per document. [`ChunkStorageService`] validates batches and
//! records metrics on top of any [`ChunkStore`].

use async_trait::async_trait;
use coursemind_common::db::models::DocumentType;
use coursemind_common::db::{ChunkBatch, ChunkStore, DbPool};
use coursemind_common::errors::{AppError, Result};
use coursemind_common::metrics;
use pgvector::Vector;
use sqlx::{Postgres, Transaction};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// PostgreSQL implementation of [`ChunkStore`]
#[derive(Clone)]
pub struct PgChunkStore {
    db: DbPool,
}

impl PgChunkStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    async fn insert_in(
        tx: &mut Transaction<'_, Postgres>,
        document_id: Uuid,
        batch: &ChunkBatch,
    ) -> Result<usize> {
        for chunk in &batch.chunks {
            sqlx::query(
                "INSERT INTO document_chunks \
                 (id, document_id, chunk_index, content, embedding, embedding_model, \
                  embedding_version, token_count, char_count, metadata) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(Uuid::new_v4())
            .bind(document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .bind(Vector::from(chunk.embedding.clone()))
            .bind(&batch.embedding_model)
            .bind(batch.embedding_version)
            .bind(chunk.token_count)
            .bind(chunk.char_count)
            .bind(&chunk.metadata)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_insert_error(e, document_id, chunk.chunk_index))?;
        }

        Ok(batch.chunks.len())
    }

    async fn delete_in(tx: &mut Transaction<'_, Postgres>, document_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM document_chunks WHERE document_id = $1")
            .bind(document_id)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected())
    }
}

fn map_insert_error(e: sqlx::Error, document_id: Uuid, chunk_index: i32) -> AppError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return AppError::DuplicateChunk { document_id, chunk_index };
        }
        if db.is_foreign_key_violation() {
            return AppError::DocumentNotFound { id: document_id };
        }
    }
    e.into()
}

#[async_trait]
impl ChunkStore for PgChunkStore {
    async fn insert_chunks(&self, document_id: Uuid, batch: &ChunkBatch) -> Result<usize> {
        let mut tx = self.db.pg_write().begin().await?;
        let inserted = Self::insert_in(&mut tx, document_id, batch).await?;
        tx.commit().await?;
        Ok(inserted)
    }

    async fn replace_chunks(&self, document_id: Uuid, batch: &ChunkBatch) -> Result<u64> {
        let mut tx = self.db.pg_write().begin().await?;
        let removed = Self::delete_in(&mut tx, document_id).await?;
        Self::insert_in(&mut tx, document_id, batch).await?;
        tx.commit().await?;
        Ok(removed)
    }

    async fn delete_chunks(&self, document_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM document_chunks WHERE document_id = $1")
            .bind(document_id)
            .execute(self.db.pg_write())
            .await?;
        Ok(result.rows_affected())
    }

    async fn count_chunks(&self, document_id: Uuid) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM document_chunks WHERE document_id = $1")
            .bind(document_id)
            .fetch_one(self.db.pg_read())
            .await?;
        Ok(count as u64)
    }
}

/// Validated, instrumented access to per-document chunk sets
#[derive(Clone)]
pub struct ChunkStorageService {
    store: Arc<dyn ChunkStore>,
}

impl ChunkStorageService {
    pub fn new(store: Arc<dyn ChunkStore>) -> Self {
        Self { store }
    }

    /// Write every chunk of the batch or none of them
    #[instrument(skip(self, batch), fields(chunks = batch.chunks.len()))]
    pub async fn store_document_chunks(
        &self,
        document_id: Uuid,
        document_type: DocumentType,
        batch: &ChunkBatch,
    ) -> Result<usize> {
        validate_batch(batch)?;

        let stored = self.store.insert_chunks(document_id, batch).await?;
        metrics::record_chunks_stored(document_type.as_str(), stored);

        info!(%document_id, stored, model = %batch.embedding_model, "Chunks stored");
        Ok(stored)
    }

    /// Swap the document's chunk set for `batch` in one transaction.
    /// Returns the number of chunks replaced.
    #[instrument(skip(self, batch), fields(chunks = batch.chunks.len()))]
    pub async fn replace_document_chunks(
        &self,
        document_id: Uuid,
        document_type: DocumentType,
        batch: &ChunkBatch,
    ) -> Result<u64> {
        validate_batch(batch)?;

        let removed = self.store.replace_chunks(document_id, batch).await?;
        metrics::record_chunks_deleted(removed);
        metrics::record_chunks_stored(document_type.as_str(), batch.chunks.len());

        info!(
            %document_id,
            removed,
            stored = batch.chunks.len(),
            model = %batch.embedding_model,
            "Chunks replaced"
        );
        Ok(removed)
    }

    #[instrument(skip(self))]
    pub async fn delete_document_chunks(&self, document_id: Uuid) -> Result<u64> {
        let removed = self.store.delete_chunks(document_id).await?;
        metrics::record_chunks_deleted(removed);

        info!(%document_id, removed, "Chunks deleted");
        Ok(removed)
    }

    pub async fn get_document_chunk_count(&self, document_id: Uuid) -> Result<u64> {
        self.store.count_chunks(document_id).await
    }
}

/// Reject batches the database would refuse halfway through
fn validate_batch(batch: &ChunkBatch) -> Result<()> {
    if batch.embedding_model.trim().is_empty() {
        return Err(AppError::Validation {
            message: "embedding model must be named".to_string(),
            field: Some("embedding_model".to_string()),
        });
    }

    let mut seen = HashSet::with_capacity(batch.chunks.len());
    let mut dimension = None;

    for chunk in &batch.chunks {
        if chunk.chunk_index < 0 {
            return Err(AppError::Validation {
                message: format!("negative chunk index {}", chunk.chunk_index),
                field: Some("chunk_index".to_string()),
            });
        }
        if !seen.insert(chunk.chunk_index) {
            return Err(AppError::Validation {
                message: format!("chunk index {} appears twice", chunk.chunk_index),
                field: Some("chunk_index".to_string()),
            });
        }
        if chunk.embedding.is_empty() {
            return Err(AppError::Validation {
                message: format!("chunk {} has no embedding", chunk.chunk_index),
                field: Some("embedding".to_string()),
            });
        }

        let expected = *dimension.get_or_insert(chunk.embedding.len());
        if chunk.embedding.len() != expected {
            return Err(AppError::DimensionMismatch {
                expected,
                actual: chunk.embedding.len(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursemind_common::db::{DocumentStore, InMemoryStore, NewChunk, NewDocument};

    fn chunk(index: i32, embedding: Vec<f32>) -> NewChunk {
        NewChunk {
            chunk_index: index,
            content: format!("chunk {}", index),
            embedding,
            token_count: 2,
            char_count: 7,
            metadata: serde_json::json!({}),
        }
    }

    fn batch(chunks: Vec<NewChunk>) -> ChunkBatch {
        ChunkBatch { embedding_model: "mock".to_string(), embedding_version: 1, chunks }
    }

    async fn setup() -> (Arc<InMemoryStore>, ChunkStorageService, Uuid) {
        let store = Arc::new(InMemoryStore::new());
        let document = store
            .create_document(NewDocument {
                scope_id: Uuid::new_v4(),
                document_type: DocumentType::Video,
                title: "Lecture 1".to_string(),
            })
            .await
            .unwrap();
        let service = ChunkStorageService::new(store.clone());
        (store, service, document.id)
    }

    #[tokio::test]
    async fn test_store_delete_store_is_idempotent() {
        let (_, service, id) = setup().await;
        let chunks = batch(vec![chunk(0, vec![1.0, 0.0]), chunk(1, vec![0.0, 1.0])]);

        service.store_document_chunks(id, DocumentType::Video, &chunks).await.unwrap();
        let first = service.get_document_chunk_count(id).await.unwrap();

        assert_eq!(service.delete_document_chunks(id).await.unwrap(), 2);
        assert_eq!(service.get_document_chunk_count(id).await.unwrap(), 0);

        service.store_document_chunks(id, DocumentType::Video, &chunks).await.unwrap();
        assert_eq!(service.get_document_chunk_count(id).await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_second_store_without_delete_is_rejected_whole() {
        let (_, service, id) = setup().await;
        let chunks = batch(vec![chunk(0, vec![1.0]), chunk(1, vec![1.0])]);

        service.store_document_chunks(id, DocumentType::Video, &chunks).await.unwrap();
        assert!(service.store_document_chunks(id, DocumentType::Video, &chunks).await.is_err());
        assert_eq!(service.get_document_chunk_count(id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_replace_swaps_chunk_set() {
        let (_, service, id) = setup().await;
        service
            .store_document_chunks(id, DocumentType::Video, &batch(vec![chunk(0, vec![1.0]), chunk(1, vec![1.0])]))
            .await
            .unwrap();

        let replaced = service
            .replace_document_chunks(id, DocumentType::Video, &batch(vec![chunk(0, vec![0.5])]))
            .await
            .unwrap();
        assert_eq!(replaced, 2);
        assert_eq!(service.get_document_chunk_count(id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_deleting_document_cascades() {
        let (store, service, id) = setup().await;
        service
            .store_document_chunks(id, DocumentType::Video, &batch(vec![chunk(0, vec![1.0]), chunk(1, vec![1.0])]))
            .await
            .unwrap();

        assert!(store.delete_document(id).await.unwrap());
        assert_eq!(service.get_document_chunk_count(id).await.unwrap(), 0);
    }

    #[test]
    fn test_validation() {
        assert!(validate_batch(&batch(vec![chunk(0, vec![1.0]), chunk(1, vec![1.0])])).is_ok());

        let duplicate = batch(vec![chunk(0, vec![1.0]), chunk(0, vec![1.0])]);
        assert!(matches!(validate_batch(&duplicate), Err(AppError::Validation { .. })));

        let ragged = batch(vec![chunk(0, vec![1.0]), chunk(1, vec![1.0, 2.0])]);
        assert!(matches!(
            validate_batch(&ragged),
            Err(AppError::DimensionMismatch { expected: 1, actual: 2 })
        ));

        let blank = batch(vec![chunk(0, Vec::new())]);
        assert!(validate_batch(&blank).is_err());
    }
}

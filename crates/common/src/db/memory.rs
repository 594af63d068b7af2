//! In-memory implementation of the storage traits.
//!
//! Backed by a single `tokio::sync::RwLock`, so every trait method is atomic
//! with respect to the others. Used by tests and by local runs with the mock
//! embedding provider.

use crate::db::models::{Document, DocumentStatus, EmbeddingModelRecord};
use crate::db::store::{
    ChunkBatch, ChunkStore, DocumentStore, EmbeddingModelRegistry, NewChunk, NewDocument,
    ScoredChunk, SearchFilter, StatusUpdate, VectorStore,
};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StoredChunk {
    id: Uuid,
    embedding_model: String,
    chunk: NewChunk,
}

#[derive(Debug, Default)]
struct State {
    documents: HashMap<Uuid, Document>,
    chunks: HashMap<Uuid, Vec<StoredChunk>>,
    models: Vec<EmbeddingModelRecord>,
}

/// Storage held entirely in process memory
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Cosine similarity of two vectors; 0.0 when either has zero magnitude.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
    let norm_a: f64 = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn check_batch(document_id: Uuid, batch: &ChunkBatch) -> Result<()> {
    let mut seen = HashSet::with_capacity(batch.chunks.len());
    for chunk in &batch.chunks {
        if !seen.insert(chunk.chunk_index) {
            return Err(AppError::DuplicateChunk { document_id, chunk_index: chunk.chunk_index });
        }
    }
    Ok(())
}

fn to_stored(batch: &ChunkBatch) -> Vec<StoredChunk> {
    batch
        .chunks
        .iter()
        .map(|chunk| StoredChunk {
            id: Uuid::new_v4(),
            embedding_model: batch.embedding_model.clone(),
            chunk: chunk.clone(),
        })
        .collect()
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn create_document(&self, new: NewDocument) -> Result<Document> {
        let now = chrono::Utc::now();
        let document = Document {
            id: Uuid::new_v4(),
            scope_id: new.scope_id,
            document_type: new.document_type.as_str().to_string(),
            title: new.title,
            content_hash: None,
            status: DocumentStatus::Pending.into(),
            error_message: None,
            embedding_model: None,
            created_at: now.into(),
            updated_at: now.into(),
            parsed_at: None,
            embedded_at: None,
        };

        let mut state = self.state.write().await;
        state.documents.insert(document.id, document.clone());
        Ok(document)
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>> {
        Ok(self.state.read().await.documents.get(&id).cloned())
    }

    async fn list_documents(&self, scope_id: Uuid) -> Result<Vec<Document>> {
        let state = self.state.read().await;
        let mut documents: Vec<Document> = state
            .documents
            .values()
            .filter(|d| d.scope_id == scope_id)
            .cloned()
            .collect();
        documents.sort_by_key(|d| d.created_at);
        Ok(documents)
    }

    async fn delete_document(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        let removed = state.documents.remove(&id).is_some();
        state.chunks.remove(&id);
        Ok(removed)
    }

    async fn update_status(&self, id: Uuid, update: StatusUpdate) -> Result<Document> {
        let now = chrono::Utc::now();
        let mut state = self.state.write().await;
        let document = state
            .documents
            .get_mut(&id)
            .ok_or(AppError::DocumentNotFound { id })?;

        let current = document.document_status();
        match update {
            StatusUpdate::Processing => {
                current.ensure_transition(id, DocumentStatus::Processing)?;
                document.status = DocumentStatus::Processing.into();
                document.error_message = None;
                document.parsed_at = Some(now.into());
            }
            StatusUpdate::Completed { content_hash, embedding_model } => {
                current.ensure_transition(id, DocumentStatus::Completed)?;
                document.status = DocumentStatus::Completed.into();
                document.content_hash = Some(content_hash);
                document.embedding_model = Some(embedding_model);
                document.error_message = None;
                document.embedded_at = Some(now.into());
            }
            StatusUpdate::Failed { error } => {
                current.ensure_transition(id, DocumentStatus::Failed)?;
                document.status = DocumentStatus::Failed.into();
                document.error_message = Some(error);
            }
        }
        document.updated_at = now.into();

        Ok(document.clone())
    }
}

#[async_trait]
impl ChunkStore for InMemoryStore {
    async fn insert_chunks(&self, document_id: Uuid, batch: &ChunkBatch) -> Result<usize> {
        check_batch(document_id, batch)?;

        let mut state = self.state.write().await;
        if !state.documents.contains_key(&document_id) {
            return Err(AppError::DocumentNotFound { id: document_id });
        }

        let existing = state.chunks.entry(document_id).or_default();
        if let Some(clash) = batch
            .chunks
            .iter()
            .find(|new| existing.iter().any(|old| old.chunk.chunk_index == new.chunk_index))
        {
            return Err(AppError::DuplicateChunk { document_id, chunk_index: clash.chunk_index });
        }

        existing.extend(to_stored(batch));
        Ok(batch.chunks.len())
    }

    async fn replace_chunks(&self, document_id: Uuid, batch: &ChunkBatch) -> Result<u64> {
        check_batch(document_id, batch)?;

        let mut state = self.state.write().await;
        if !state.documents.contains_key(&document_id) {
            return Err(AppError::DocumentNotFound { id: document_id });
        }

        let previous = state.chunks.insert(document_id, to_stored(batch));
        Ok(previous.map_or(0, |chunks| chunks.len() as u64))
    }

    async fn delete_chunks(&self, document_id: Uuid) -> Result<u64> {
        let mut state = self.state.write().await;
        Ok(state.chunks.remove(&document_id).map_or(0, |chunks| chunks.len() as u64))
    }

    async fn count_chunks(&self, document_id: Uuid) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state.chunks.get(&document_id).map_or(0, |chunks| chunks.len() as u64))
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn similarity_search(
        &self,
        embedding: &[f32],
        scope_id: Uuid,
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredChunk>> {
        if top_k == 0 || embedding.is_empty() {
            return Ok(Vec::new());
        }

        let state = self.state.read().await;

        let mut scored: Vec<ScoredChunk> = state
            .documents
            .values()
            .filter(|document| document.scope_id == scope_id)
            .flat_map(|document| {
                state
                    .chunks
                    .get(&document.id)
                    .into_iter()
                    .flatten()
                    .map(move |stored| (document, stored))
            })
            .filter(|(_, stored)| {
                filter
                    .embedding_model
                    .as_deref()
                    .map_or(true, |model| stored.embedding_model == model)
            })
            // Vectors of another dimension belong to a different model version
            .filter(|(_, stored)| stored.chunk.embedding.len() == embedding.len())
            .map(|(document, stored)| ScoredChunk {
                chunk_id: stored.id,
                document_id: document.id,
                document_title: document.title.clone(),
                content: stored.chunk.content.clone(),
                chunk_index: stored.chunk.chunk_index,
                score: cosine_similarity(&stored.chunk.embedding, embedding),
                metadata: stored.chunk.metadata.clone(),
            })
            .filter(|candidate| filter.min_score.map_or(true, |min| candidate.score >= min))
            .collect();

        scored.sort_by(ScoredChunk::rank_order);
        scored.truncate(top_k);
        Ok(scored)
    }
}

#[async_trait]
impl EmbeddingModelRegistry for InMemoryStore {
    async fn register_model(&self, model_name: &str, dimensions: usize) -> Result<EmbeddingModelRecord> {
        let dims = i32::try_from(dimensions).map_err(|_| AppError::Validation {
            message: format!("dimension {} out of range", dimensions),
            field: Some("dimensions".to_string()),
        })?;

        let mut state = self.state.write().await;
        if let Some(existing) = state
            .models
            .iter()
            .find(|m| m.model_name == model_name && m.dimensions == dims)
        {
            return Ok(existing.clone());
        }

        let record = EmbeddingModelRecord {
            id: Uuid::new_v4(),
            model_name: model_name.to_string(),
            dimensions: dims,
            is_active: false,
            created_at: chrono::Utc::now().into(),
        };
        state.models.push(record.clone());
        Ok(record)
    }

    async fn activate_model(&self, model_name: &str, dimensions: usize) -> Result<EmbeddingModelRecord> {
        let record = self.register_model(model_name, dimensions).await?;

        let mut state = self.state.write().await;
        let mut activated = record;
        for model in state.models.iter_mut() {
            model.is_active = model.id == activated.id;
            if model.is_active {
                activated = model.clone();
            }
        }
        Ok(activated)
    }

    async fn active_model(&self) -> Result<Option<EmbeddingModelRecord>> {
        let state = self.state.read().await;
        Ok(state.models.iter().find(|m| m.is_active).cloned())
    }

    async fn list_models(&self) -> Result<Vec<EmbeddingModelRecord>> {
        Ok(self.state.read().await.models.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::DocumentType;

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

    fn batch(model: &str, chunks: Vec<NewChunk>) -> ChunkBatch {
        ChunkBatch {
            embedding_model: model.to_string(),
            embedding_version: 1,
            chunks,
        }
    }

    async fn document(store: &InMemoryStore, scope_id: Uuid, title: &str) -> Document {
        store
            .create_document(NewDocument {
                scope_id,
                document_type: DocumentType::Book,
                title: title.to_string(),
            })
            .await
            .unwrap()
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_search_unknown_scope_is_empty() {
        let store = InMemoryStore::new();
        let results = store
            .similarity_search(&[1.0, 0.0], Uuid::new_v4(), 5, &SearchFilter::default())
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_search_is_restricted_to_scope() {
        let store = InMemoryStore::new();
        let scope = Uuid::new_v4();
        let inside = document(&store, scope, "inside").await;
        let outside = document(&store, Uuid::new_v4(), "outside").await;

        store.insert_chunks(inside.id, &batch("m", vec![chunk(0, vec![1.0, 0.0])])).await.unwrap();
        store.insert_chunks(outside.id, &batch("m", vec![chunk(0, vec![1.0, 0.0])])).await.unwrap();

        let results = store
            .similarity_search(&[1.0, 0.0], scope, 10, &SearchFilter::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document_title, "inside");
    }

    #[tokio::test]
    async fn test_search_filters_by_model_and_dimension() {
        let store = InMemoryStore::new();
        let scope = Uuid::new_v4();
        let doc = document(&store, scope, "doc").await;
        let other = document(&store, scope, "other").await;

        store.insert_chunks(doc.id, &batch("old", vec![chunk(0, vec![1.0, 0.0, 0.0])])).await.unwrap();
        store.insert_chunks(other.id, &batch("new", vec![chunk(0, vec![1.0, 0.0])])).await.unwrap();

        let filter = SearchFilter { min_score: None, embedding_model: Some("new".to_string()) };
        let results = store.similarity_search(&[1.0, 0.0], scope, 10, &filter).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document_id, other.id);

        let unfiltered = store
            .similarity_search(&[1.0, 0.0], scope, 10, &SearchFilter::default())
            .await
            .unwrap();
        assert_eq!(unfiltered.len(), 1, "vectors of another dimension are skipped");
    }

    #[tokio::test]
    async fn test_insert_is_all_or_nothing() {
        let store = InMemoryStore::new();
        let doc = document(&store, Uuid::new_v4(), "doc").await;

        store.insert_chunks(doc.id, &batch("m", vec![chunk(1, vec![1.0])])).await.unwrap();

        let clashing = batch("m", vec![chunk(0, vec![1.0]), chunk(1, vec![1.0])]);
        let err = store.insert_chunks(doc.id, &clashing).await.unwrap_err();
        assert!(matches!(err, AppError::DuplicateChunk { chunk_index: 1, .. }));
        assert_eq!(store.count_chunks(doc.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_replace_returns_previous_count() {
        let store = InMemoryStore::new();
        let doc = document(&store, Uuid::new_v4(), "doc").await;

        store
            .insert_chunks(doc.id, &batch("m", vec![chunk(0, vec![1.0]), chunk(1, vec![1.0])]))
            .await
            .unwrap();

        let removed = store
            .replace_chunks(doc.id, &batch("m", vec![chunk(0, vec![0.5])]))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.count_chunks(doc.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_document_cascades() {
        let store = InMemoryStore::new();
        let doc = document(&store, Uuid::new_v4(), "doc").await;
        store
            .insert_chunks(doc.id, &batch("m", vec![chunk(0, vec![1.0]), chunk(1, vec![1.0])]))
            .await
            .unwrap();

        assert!(store.delete_document(doc.id).await.unwrap());
        assert_eq!(store.count_chunks(doc.id).await.unwrap(), 0);
        assert!(store.get_document(doc.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_status_updates_follow_state_machine() {
        let store = InMemoryStore::new();
        let doc = document(&store, Uuid::new_v4(), "doc").await;

        let err = store
            .update_status(doc.id, StatusUpdate::Completed {
                content_hash: "h".into(),
                embedding_model: "m".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidStatusTransition { .. }));

        store.update_status(doc.id, StatusUpdate::Processing).await.unwrap();
        let failed = store
            .update_status(doc.id, StatusUpdate::Failed { error: "boom".into() })
            .await
            .unwrap();
        assert_eq!(failed.document_status(), DocumentStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("boom"));

        let restarted = store.update_status(doc.id, StatusUpdate::Processing).await.unwrap();
        assert!(restarted.error_message.is_none());
    }

    #[tokio::test]
    async fn test_single_active_model() {
        let store = InMemoryStore::new();
        store.activate_model("small", 1536).await.unwrap();
        store.activate_model("large", 3072).await.unwrap();
        store.register_model("small", 1536).await.unwrap();

        let models = store.list_models().await.unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models.iter().filter(|m| m.is_active).count(), 1);

        let active = store.active_model().await.unwrap().unwrap();
        assert_eq!(active.model_name, "large");
        assert_eq!(active.dimensions, 3072);
    }
}

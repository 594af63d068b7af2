//! Storage abstractions shared by the retrieval and ingestion pipelines
//!
//! The PostgreSQL [`Repository`](super::Repository) and the
//! [`InMemoryStore`](super::InMemoryStore) both implement these traits, so
//! the pipelines receive their storage by injection.

use crate::db::models::{Document, DocumentType, EmbeddingModelRecord};
use crate::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

/// Fields needed to register a new document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDocument {
    pub scope_id: Uuid,
    pub document_type: DocumentType,
    pub title: String,
}

/// Status change requested for a document
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    /// Work started; clears any previous error
    Processing,
    /// Chunks for `content_hash` were stored with vectors from `embedding_model`
    Completed {
        content_hash: String,
        embedding_model: String,
    },
    /// Processing stopped; prior chunks stay as they were
    Failed { error: String },
}

/// A chunk ready to be written, embedding attached
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewChunk {
    pub chunk_index: i32,
    pub content: String,
    pub embedding: Vec<f32>,
    pub token_count: i32,
    pub char_count: i32,
    pub metadata: serde_json::Value,
}

/// All chunks of one document, produced by one embedding model version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkBatch {
    pub embedding_model: String,
    pub embedding_version: i32,
    pub chunks: Vec<NewChunk>,
}

/// Vector search candidate with its cosine similarity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub document_title: String,
    pub content: String,
    pub chunk_index: i32,
    /// 1 - cosine distance
    pub score: f64,
    pub metadata: serde_json::Value,
}

impl ScoredChunk {
    /// Descending score, ties broken by insertion order (document, then chunk index)
    pub fn rank_order(a: &ScoredChunk, b: &ScoredChunk) -> Ordering {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.document_id.cmp(&b.document_id))
            .then_with(|| a.chunk_index.cmp(&b.chunk_index))
    }
}

/// Optional restrictions applied inside the similarity search
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Drop candidates scoring below this similarity
    pub min_score: Option<f64>,
    /// Only consider vectors produced by this model
    pub embedding_model: Option<String>,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn create_document(&self, new: NewDocument) -> Result<Document>;

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>>;

    async fn list_documents(&self, scope_id: Uuid) -> Result<Vec<Document>>;

    /// Delete the document and, by cascade, all of its chunks
    async fn delete_document(&self, id: Uuid) -> Result<bool>;

    /// Apply a status change, enforcing the document state machine
    async fn update_status(&self, id: Uuid, update: StatusUpdate) -> Result<Document>;
}

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Insert every chunk of the batch or none of them
    async fn insert_chunks(&self, document_id: Uuid, batch: &ChunkBatch) -> Result<usize>;

    /// Delete existing chunks and insert the batch in one transaction.
    /// Returns the number of chunks removed.
    async fn replace_chunks(&self, document_id: Uuid, batch: &ChunkBatch) -> Result<u64>;

    async fn delete_chunks(&self, document_id: Uuid) -> Result<u64>;

    async fn count_chunks(&self, document_id: Uuid) -> Result<u64>;
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Top-`top_k` chunks of documents in `scope_id`, best first.
    ///
    /// A scope without chunks yields an empty list.
    async fn similarity_search(
        &self,
        embedding: &[f32],
        scope_id: Uuid,
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredChunk>>;
}

#[async_trait]
pub trait EmbeddingModelRegistry: Send + Sync {
    /// Register a (model, dimensions) pair; idempotent
    async fn register_model(&self, model_name: &str, dimensions: usize) -> Result<EmbeddingModelRecord>;

    /// Make the pair the only active one, registering it if needed
    async fn activate_model(&self, model_name: &str, dimensions: usize) -> Result<EmbeddingModelRecord>;

    async fn active_model(&self) -> Result<Option<EmbeddingModelRecord>>;

    async fn list_models(&self) -> Result<Vec<EmbeddingModelRecord>>;
}

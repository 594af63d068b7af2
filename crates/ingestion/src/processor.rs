//! Document processor
//!
//! Core ingestion flow: extract text, gate on the content hash, chunk, embed,
//! swap the stored chunk set, and record the outcome on the document.

use crate::chunker::{chunk_text, TextChunk};
use crate::errors::{IngestionError, Result};
use crate::source::TextSource;
use crate::storage::ChunkStorageService;
use coursemind_common::config::ChunkingConfig;
use coursemind_common::db::models::{Document, DocumentStatus, DocumentType};
use coursemind_common::db::{ChunkBatch, DocumentStore, NewChunk, StatusUpdate};
use coursemind_common::embeddings::Embedder;
use coursemind_common::errors::AppError;
use coursemind_common::hashing::content_hash;
use coursemind_common::metrics;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Why a document was left as it is
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// Same text, same embedding model, chunks present
    ContentUnchanged { content_hash: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ContentUnchanged { content_hash } => {
                write!(f, "content unchanged ({})", &content_hash[..content_hash.len().min(12)])
            }
        }
    }
}

/// Result of one `process_document` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessOutcome {
    Skipped(SkipReason),
    Reprocessed {
        content_hash: String,
        chunks_stored: usize,
        chunks_replaced: u64,
    },
}

/// Counts from a `reembed_stale` sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReembedReport {
    pub reprocessed: usize,
    pub failed: usize,
    pub up_to_date: usize,
}

/// Turns documents into stored, embedded chunks
pub struct DocumentProcessor {
    documents: Arc<dyn DocumentStore>,
    storage: ChunkStorageService,
    embedder: Arc<dyn Embedder>,
    source: Arc<dyn TextSource>,
    chunking: ChunkingConfig,
    embedding_version: i32,
}

impl DocumentProcessor {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        storage: ChunkStorageService,
        embedder: Arc<dyn Embedder>,
        source: Arc<dyn TextSource>,
        chunking: ChunkingConfig,
        embedding_version: i32,
    ) -> Self {
        Self {
            documents,
            storage,
            embedder,
            source,
            chunking,
            embedding_version,
        }
    }

    /// Parse, chunk, embed and store one document.
    ///
    /// Unless `force` is set, a document whose text hash, embedding model and
    /// stored chunks already match is skipped without calling the embedder.
    /// On failure the document is marked `failed` and its previous chunks
    /// are left in place.
    #[instrument(skip(self))]
    pub async fn process_document(&self, document_id: Uuid, force: bool) -> Result<ProcessOutcome> {
        let start = Instant::now();

        let document = self
            .documents
            .get_document(document_id)
            .await?
            .ok_or(AppError::DocumentNotFound { id: document_id })?;

        let text = match self.source.extract_text(&document).await {
            Ok(text) => text,
            Err(e) => return Err(self.fail(&document, e, start).await),
        };
        let hash = content_hash(&text);

        if !force {
            if let Some(reason) = self.skip_reason(&document, &hash).await? {
                info!(%document_id, %reason, "Skipping unchanged document");
                metrics::record_document_processed("skipped", start.elapsed().as_secs_f64());
                return Ok(ProcessOutcome::Skipped(reason));
            }
        }

        self.documents
            .update_status(document_id, StatusUpdate::Processing)
            .await?;

        match self.rebuild(&document, &text, &hash).await {
            Ok(outcome) => {
                metrics::record_document_processed("reprocessed", start.elapsed().as_secs_f64());
                Ok(outcome)
            }
            Err(e) => Err(self.fail(&document, e, start).await),
        }
    }

    /// The hash gate. `None` means the document needs processing.
    async fn skip_reason(&self, document: &Document, hash: &str) -> Result<Option<SkipReason>> {
        let unchanged = document.document_status() == DocumentStatus::Completed
            && document.content_hash.as_deref() == Some(hash)
            && document.embedding_model.as_deref() == Some(self.embedder.model_name());

        if !unchanged {
            return Ok(None);
        }

        // A completed document without chunks was interrupted mid-write
        if self.storage.get_document_chunk_count(document.id).await? == 0 {
            warn!(document_id = %document.id, "Completed document has no chunks, reprocessing");
            return Ok(None);
        }

        Ok(Some(SkipReason::ContentUnchanged {
            content_hash: hash.to_string(),
        }))
    }

    async fn rebuild(&self, document: &Document, text: &str, hash: &str) -> Result<ProcessOutcome> {
        let document_type = document.kind()?;

        let chunks = chunk_text(text, &self.chunking)?;
        if chunks.is_empty() {
            return Err(AppError::EmptyIngestion { document_id: document.id }.into());
        }

        let contents: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self.embedder.embed_batch(&contents).await?;
        if embeddings.len() != chunks.len() {
            return Err(IngestionError::EmbeddingMismatch {
                expected: chunks.len(),
                actual: embeddings.len(),
            });
        }

        let batch = ChunkBatch {
            embedding_model: self.embedder.model_name().to_string(),
            embedding_version: self.embedding_version,
            chunks: chunks
                .into_iter()
                .zip(embeddings)
                .map(|(chunk, embedding)| new_chunk(document, document_type, chunk, embedding))
                .collect(),
        };

        let chunks_replaced = self
            .storage
            .replace_document_chunks(document.id, document_type, &batch)
            .await?;

        let chunks_stored = self.storage.get_document_chunk_count(document.id).await?;
        if chunks_stored == 0 {
            return Err(AppError::EmptyIngestion { document_id: document.id }.into());
        }

        self.documents
            .update_status(
                document.id,
                StatusUpdate::Completed {
                    content_hash: hash.to_string(),
                    embedding_model: batch.embedding_model.clone(),
                },
            )
            .await?;

        info!(
            document_id = %document.id,
            chunks_stored,
            chunks_replaced,
            model = %batch.embedding_model,
            "Document processed"
        );

        Ok(ProcessOutcome::Reprocessed {
            content_hash: hash.to_string(),
            chunks_stored: chunks_stored as usize,
            chunks_replaced,
        })
    }

    /// Record the failure on the document and hand the error back
    async fn fail(&self, document: &Document, e: IngestionError, start: Instant) -> IngestionError {
        error!(document_id = %document.id, error = %e, "Document processing failed");
        metrics::record_document_processed("failed", start.elapsed().as_secs_f64());

        if let Err(status_err) = self.mark_failed(document.id, &e.to_string()).await {
            warn!(document_id = %document.id, error = %status_err, "Could not mark document failed");
        }
        e
    }

    async fn mark_failed(&self, document_id: Uuid, message: &str) -> Result<()> {
        let current = self
            .documents
            .get_document(document_id)
            .await?
            .ok_or(AppError::DocumentNotFound { id: document_id })?;

        // failed is only reachable from processing
        if current.document_status() != DocumentStatus::Processing {
            self.documents
                .update_status(document_id, StatusUpdate::Processing)
                .await?;
        }

        self.documents
            .update_status(
                document_id,
                StatusUpdate::Failed {
                    error: message.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    /// Re-embed completed documents in a scope whose chunks came from a
    /// different model than the current embedder.
    #[instrument(skip(self))]
    pub async fn reembed_stale(&self, scope_id: Uuid) -> Result<ReembedReport> {
        let model = self.embedder.model_name();
        let mut report = ReembedReport::default();

        for document in self.documents.list_documents(scope_id).await? {
            if document.document_status() != DocumentStatus::Completed {
                continue;
            }
            if document.embedding_model.as_deref() == Some(model) {
                report.up_to_date += 1;
                continue;
            }

            match self.process_document(document.id, true).await {
                Ok(_) => report.reprocessed += 1,
                Err(e) => {
                    warn!(document_id = %document.id, error = %e, "Re-embedding failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            %scope_id,
            model,
            reprocessed = report.reprocessed,
            failed = report.failed,
            up_to_date = report.up_to_date,
            "Stale embeddings swept"
        );
        Ok(report)
    }
}

fn new_chunk(document: &Document, document_type: DocumentType, chunk: TextChunk, embedding: Vec<f32>) -> NewChunk {
    NewChunk {
        chunk_index: chunk.index,
        token_count: chunk.token_count,
        char_count: chunk.char_count,
        metadata: serde_json::json!({
            "source": document.title,
            "document_type": document_type.as_str(),
            "section_heading": chunk.section_heading,
            "start_char": chunk.start_pos,
            "end_char": chunk.end_pos,
        }),
        content: chunk.content,
        embedding,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use coursemind_common::db::{ChunkStore, InMemoryStore, NewDocument};
    use coursemind_common::embeddings::MockEmbedder;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::RwLock;

    /// Text keyed by document id
    #[derive(Default)]
    struct MapSource {
        texts: RwLock<HashMap<Uuid, String>>,
    }

    impl MapSource {
        async fn set(&self, id: Uuid, text: &str) {
            self.texts.write().await.insert(id, text.to_string());
        }
    }

    #[async_trait]
    impl TextSource for MapSource {
        async fn extract_text(&self, document: &Document) -> Result<String> {
            self.texts
                .read()
                .await
                .get(&document.id)
                .cloned()
                .ok_or_else(|| IngestionError::Extraction {
                    document_id: document.id,
                    message: "missing".to_string(),
                })
        }
    }

    /// Mock embedder that can be switched to fail
    struct FlakyEmbedder {
        inner: MockEmbedder,
        failing: AtomicBool,
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        async fn embed(&self, text: &str) -> coursemind_common::Result<Vec<f32>> {
            self.inner.embed(text).await
        }

        async fn embed_batch(&self, texts: &[String]) -> coursemind_common::Result<Vec<Vec<f32>>> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(AppError::EmbeddingRateLimited { message: "quota".to_string() });
            }
            self.inner.embed_batch(texts).await
        }

        fn model_name(&self) -> &str {
            self.inner.model_name()
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }
    }

    const TEXT: &str = "# Traits\n\nTraits describe shared behaviour between types.\n\n\
                        ## Generics\n\nGenerics let one function work over many types.";

    struct Harness {
        store: Arc<InMemoryStore>,
        source: Arc<MapSource>,
        embedder: Arc<FlakyEmbedder>,
        processor: DocumentProcessor,
    }

    fn chunking() -> ChunkingConfig {
        ChunkingConfig { chunk_size: 60, chunk_overlap: 0, min_chunk_size: 5 }
    }

    fn harness_with(store: Arc<InMemoryStore>, source: Arc<MapSource>, model: &str) -> Harness {
        let embedder = Arc::new(FlakyEmbedder {
            inner: MockEmbedder::with_model(model, 8),
            failing: AtomicBool::new(false),
        });
        let processor = DocumentProcessor::new(
            store.clone(),
            ChunkStorageService::new(store.clone()),
            embedder.clone(),
            source.clone(),
            chunking(),
            1,
        );
        Harness { store, source, embedder, processor }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(InMemoryStore::new()), Arc::new(MapSource::default()), "mock-a")
    }

    async fn add_document(h: &Harness, scope_id: Uuid, text: &str) -> Uuid {
        let document = h
            .store
            .create_document(NewDocument {
                scope_id,
                document_type: DocumentType::Course,
                title: "Rust Course".to_string(),
            })
            .await
            .unwrap();
        h.source.set(document.id, text).await;
        document.id
    }

    async fn status(h: &Harness, id: Uuid) -> Document {
        h.store.get_document(id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_first_run_stores_chunks() {
        let h = harness();
        let id = add_document(&h, Uuid::new_v4(), TEXT).await;

        let outcome = h.processor.process_document(id, false).await.unwrap();
        let (chunks_stored, chunks_replaced, content_hash) = match outcome {
            ProcessOutcome::Reprocessed { chunks_stored, chunks_replaced, content_hash } => {
                (chunks_stored, chunks_replaced, content_hash)
            }
            other => panic!("expected reprocessing, got {:?}", other),
        };
        assert!(chunks_stored >= 2);
        assert_eq!(chunks_replaced, 0);

        let document = status(&h, id).await;
        assert_eq!(document.document_status(), DocumentStatus::Completed);
        assert_eq!(document.content_hash.as_deref(), Some(content_hash.as_str()));
        assert_eq!(document.embedding_model.as_deref(), Some("mock-a"));
        assert!(document.embedded_at.is_some());
        assert_eq!(h.store.count_chunks(id).await.unwrap(), chunks_stored as u64);
    }

    #[tokio::test]
    async fn test_unchanged_content_skips_embedding() {
        let h = harness();
        let id = add_document(&h, Uuid::new_v4(), TEXT).await;

        h.processor.process_document(id, false).await.unwrap();
        let calls = h.embedder.inner.calls();

        let outcome = h.processor.process_document(id, false).await.unwrap();
        assert!(matches!(outcome, ProcessOutcome::Skipped(SkipReason::ContentUnchanged { .. })));
        assert_eq!(h.embedder.inner.calls(), calls);
    }

    #[tokio::test]
    async fn test_force_and_changed_content_reprocess() {
        let h = harness();
        let id = add_document(&h, Uuid::new_v4(), TEXT).await;
        h.processor.process_document(id, false).await.unwrap();
        let before = h.store.count_chunks(id).await.unwrap();

        let forced = h.processor.process_document(id, true).await.unwrap();
        assert!(matches!(forced, ProcessOutcome::Reprocessed { chunks_replaced, .. } if chunks_replaced == before));

        h.source.set(id, "A single new paragraph about lifetimes.").await;
        let changed = h.processor.process_document(id, false).await.unwrap();
        assert!(matches!(changed, ProcessOutcome::Reprocessed { chunks_stored: 1, .. }));
        assert_eq!(h.store.count_chunks(id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_chunks() {
        let h = harness();
        let id = add_document(&h, Uuid::new_v4(), TEXT).await;
        h.processor.process_document(id, false).await.unwrap();
        let before = h.store.count_chunks(id).await.unwrap();

        h.source.set(id, "Completely different text that needs new vectors.").await;
        h.embedder.failing.store(true, Ordering::SeqCst);

        let err = h.processor.process_document(id, false).await.unwrap_err();
        assert!(err.is_transient());

        let document = status(&h, id).await;
        assert_eq!(document.document_status(), DocumentStatus::Failed);
        assert!(document.error_message.unwrap().contains("quota"));
        assert_eq!(h.store.count_chunks(id).await.unwrap(), before);

        h.embedder.failing.store(false, Ordering::SeqCst);
        let retried = h.processor.process_document(id, false).await.unwrap();
        assert!(matches!(retried, ProcessOutcome::Reprocessed { .. }));
        assert!(status(&h, id).await.error_message.is_none());
    }

    #[tokio::test]
    async fn test_empty_text_fails_document() {
        let h = harness();
        let id = add_document(&h, Uuid::new_v4(), "   ").await;

        let err = h.processor.process_document(id, false).await.unwrap_err();
        assert!(matches!(err, IngestionError::App(AppError::EmptyIngestion { .. })));
        assert_eq!(status(&h, id).await.document_status(), DocumentStatus::Failed);
        assert_eq!(h.embedder.inner.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_text_fails_pending_document() {
        let h = harness();
        let document = h
            .store
            .create_document(NewDocument {
                scope_id: Uuid::new_v4(),
                document_type: DocumentType::Book,
                title: "No text".to_string(),
            })
            .await
            .unwrap();

        let err = h.processor.process_document(document.id, false).await.unwrap_err();
        assert!(matches!(err, IngestionError::Extraction { .. }));
        assert_eq!(status(&h, document.id).await.document_status(), DocumentStatus::Failed);
    }

    #[tokio::test]
    async fn test_unknown_document() {
        let h = harness();
        let err = h.processor.process_document(Uuid::new_v4(), false).await.unwrap_err();
        assert!(matches!(err, IngestionError::App(AppError::DocumentNotFound { .. })));
    }

    #[tokio::test]
    async fn test_reembed_stale_switches_model() {
        let old = harness();
        let scope_id = Uuid::new_v4();
        let stale = add_document(&old, scope_id, TEXT).await;
        old.processor.process_document(stale, false).await.unwrap();

        let new = harness_with(old.store.clone(), old.source.clone(), "mock-b");
        let current = add_document(&new, scope_id, "Modules organise code into namespaces.").await;
        new.processor.process_document(current, false).await.unwrap();

        let report = new.processor.reembed_stale(scope_id).await.unwrap();
        assert_eq!(report, ReembedReport { reprocessed: 1, failed: 0, up_to_date: 1 });
        assert_eq!(status(&new, stale).await.embedding_model.as_deref(), Some("mock-b"));

        // unchanged text under a new model is not a skip
        let again = new.processor.reembed_stale(scope_id).await.unwrap();
        assert_eq!(again, ReembedReport { reprocessed: 0, failed: 0, up_to_date: 2 });
    }
}

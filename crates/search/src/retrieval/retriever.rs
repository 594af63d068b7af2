//! Retrieval pipeline: embed the query, search, optionally rerank, and
//! assemble prompt context.

use super::rerank::Reranker;
use coursemind_common::config::RetrievalConfig;
use coursemind_common::db::{ScoredChunk, SearchFilter, VectorStore};
use coursemind_common::embeddings::Embedder;
use coursemind_common::errors::Result;
use coursemind_common::metrics;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument};
use uuid::Uuid;

/// A ranked chunk with the title of its document, for citation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub document_title: String,
    pub content: String,
    pub chunk_index: i32,
    /// Cosine similarity to the query
    pub score: f64,
    pub metadata: serde_json::Value,
}

impl From<ScoredChunk> for SearchResult {
    fn from(chunk: ScoredChunk) -> Self {
        Self {
            chunk_id: chunk.chunk_id,
            document_id: chunk.document_id,
            document_title: chunk.document_title,
            content: chunk.content,
            chunk_index: chunk.chunk_index,
            score: chunk.score,
            metadata: chunk.metadata,
        }
    }
}

/// Orchestrates embed -> similarity search -> rerank
pub struct DocumentRetriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    reranker: Arc<dyn Reranker>,
    config: RetrievalConfig,
}

impl DocumentRetriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        reranker: Arc<dyn Reranker>,
        config: RetrievalConfig,
    ) -> Self {
        Self { embedder, store, reranker, config }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Number of candidates to request from the vector store
    fn pool_size(&self, top_k: usize) -> usize {
        if self.config.enable_reranking {
            self.config.top_k_search.max(top_k)
        } else {
            top_k
        }
    }

    /// Top `top_k` chunks in `scope_id` for `query`, best first.
    ///
    /// A blank query or `top_k == 0` yields no results without calling the
    /// embedding provider.
    #[instrument(skip(self, query), fields(query_len = query.len()))]
    pub async fn search(&self, query: &str, scope_id: Uuid, top_k: usize) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let start = Instant::now();

        let embedding = self.embedder.embed_query(query).await?;
        if embedding.is_empty() {
            return Ok(Vec::new());
        }

        let filter = SearchFilter {
            min_score: self.config.min_similarity_score,
            embedding_model: Some(self.embedder.model_name().to_string()),
        };

        let pool = self.pool_size(top_k);
        let mut candidates = self
            .store
            .similarity_search(&embedding, scope_id, pool, &filter)
            .await?;

        debug!(pool, candidates = candidates.len(), "Candidates retrieved");

        let reranked = self.config.enable_reranking && candidates.len() > top_k;
        if reranked {
            candidates = self.reranker.rerank(query, candidates, top_k).await?;
        }
        candidates.truncate(top_k);

        metrics::record_search(start.elapsed().as_secs_f64(), reranked, candidates.len());

        Ok(candidates.into_iter().map(SearchResult::from).collect())
    }

    /// Prompt-ready context for `query`. Empty when nothing matched.
    #[instrument(skip(self, query))]
    pub async fn get_context(&self, query: &str, scope_id: Uuid, max_chunks: usize) -> Result<String> {
        let results = self.search(query, scope_id, max_chunks).await?;
        Ok(format_context(&results))
    }
}

/// `[Source: <title>]` header per chunk, chunks separated by a blank line
pub fn format_context(results: &[SearchResult]) -> String {
    results
        .iter()
        .map(|r| format!("[Source: {}]\n{}", r.document_title, r.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

//! Second-stage ordering of vector candidates

use async_trait::async_trait;
use coursemind_common::config::RerankerKind;
use coursemind_common::db::ScoredChunk;
use coursemind_common::errors::Result;
use std::sync::Arc;

/// Re-orders candidates and bounds them to `top_k`
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(
        &self,
        query: &str,
        candidates: Vec<ScoredChunk>,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>>;

    fn name(&self) -> &'static str;
}

/// Keeps the vector store's order
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughReranker;

#[async_trait]
impl Reranker for PassthroughReranker {
    async fn rerank(
        &self,
        _query: &str,
        mut candidates: Vec<ScoredChunk>,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        candidates.truncate(top_k);
        Ok(candidates)
    }

    fn name(&self) -> &'static str {
        "passthrough"
    }
}

/// Slot for a learned relevance model.
///
/// No scoring model is wired in yet: candidates are stably re-sorted by their
/// similarity score and truncated, so results match [`PassthroughReranker`]
/// for input that is already ranked.
#[derive(Debug, Default, Clone, Copy)]
pub struct ModelReranker;

#[async_trait]
impl Reranker for ModelReranker {
    async fn rerank(
        &self,
        _query: &str,
        mut candidates: Vec<ScoredChunk>,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        tracing::debug!(candidates = candidates.len(), top_k, "Model reranker falling back to similarity order");
        candidates.sort_by(ScoredChunk::rank_order);
        candidates.truncate(top_k);
        Ok(candidates)
    }

    fn name(&self) -> &'static str {
        "model"
    }
}

/// Select the reranker named in configuration
pub fn build_reranker(kind: RerankerKind) -> Arc<dyn Reranker> {
    match kind {
        RerankerKind::Passthrough => Arc::new(PassthroughReranker),
        RerankerKind::Model => Arc::new(ModelReranker),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn candidates(scores: &[f64]) -> Vec<ScoredChunk> {
        let document_id = Uuid::new_v4();
        scores
            .iter()
            .enumerate()
            .map(|(i, &score)| ScoredChunk {
                chunk_id: Uuid::new_v4(),
                document_id,
                document_title: "Lecture".to_string(),
                content: format!("chunk {}", i),
                chunk_index: i as i32,
                score,
                metadata: serde_json::Value::Null,
            })
            .collect()
    }

    fn scores(chunks: &[ScoredChunk]) -> Vec<f64> {
        chunks.iter().map(|c| c.score).collect()
    }

    #[tokio::test]
    async fn test_passthrough_returns_min_of_len_and_top_k() {
        let reranker = PassthroughReranker;
        for top_k in 0..6 {
            let out = reranker.rerank("q", candidates(&[0.9, 0.8, 0.7, 0.6]), top_k).await.unwrap();
            assert_eq!(out.len(), top_k.min(4));
            assert_eq!(scores(&out), [0.9, 0.8, 0.7, 0.6][..top_k.min(4)].to_vec());
        }
    }

    #[tokio::test]
    async fn test_model_reranker_sorts_by_similarity() {
        let out = ModelReranker
            .rerank("q", candidates(&[0.5, 0.9, 0.7]), 2)
            .await
            .unwrap();
        assert_eq!(scores(&out), vec![0.9, 0.7]);
    }

    #[test]
    fn test_build_reranker_from_config() {
        assert_eq!(build_reranker(RerankerKind::Passthrough).name(), "passthrough");
        assert_eq!(build_reranker(RerankerKind::Model).name(), "model");
    }
}

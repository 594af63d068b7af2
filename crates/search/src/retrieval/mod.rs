//! Retrieval pipeline
//!
//! - Vector search over pgvector, restricted to one scope
//! - Optional reranking of the candidate pool
//! - Context assembly for prompt construction

mod rerank;
mod retriever;
mod vector;

pub use rerank::{build_reranker, ModelReranker, PassthroughReranker, Reranker};
pub use retriever::{format_context, DocumentRetriever, SearchResult};
pub use vector::PgVectorStore;

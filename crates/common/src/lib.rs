//! CourseMind Common Library
//!
//! Shared code for the CourseMind retrieval services including:
//! - Database models, store traits and the PostgreSQL repository
//! - Embedding client abstraction
//! - Error types and handling
//! - Configuration management
//! - Content hashing for change detection
//! - Metrics and observability
//! - SQS queue for ingestion triggers

pub mod config;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod hashing;
pub mod metrics;
pub mod queue;
pub mod telemetry;

// Re-export commonly used types
pub use crate::errors::{AppError, Result};
pub use crate::config::AppConfig;
pub use crate::db::{ChunkStore, DocumentStore, InMemoryStore, Repository, ScoredChunk, VectorStore};
pub use crate::embeddings::Embedder;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;

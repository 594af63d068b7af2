//! Ingestion service error types

use coursemind_common::errors::AppError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Text extraction failed for document {document_id}: {message}")]
    Extraction { document_id: Uuid, message: String },

    #[error("Chunking error: {0}")]
    Chunking(String),

    #[error("Embedder returned {actual} vectors for {expected} chunks")]
    EmbeddingMismatch { expected: usize, actual: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    App(#[from] AppError),
}

impl IngestionError {
    /// Whether a later attempt may succeed without any change to the input
    pub fn is_transient(&self) -> bool {
        match self {
            IngestionError::App(e) => {
                e.is_provider_failure()
                    || matches!(
                        e,
                        AppError::DatabaseConnection { .. } | AppError::Database(_) | AppError::Sqlx(_)
                    )
            }
            IngestionError::Io(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let rate_limited: IngestionError = AppError::EmbeddingRateLimited { message: "slow down".into() }.into();
        assert!(rate_limited.is_transient());

        let empty: IngestionError = AppError::EmptyIngestion { document_id: Uuid::nil() }.into();
        assert!(!empty.is_transient());
        assert!(!IngestionError::Chunking("bad".into()).is_transient());
    }
}

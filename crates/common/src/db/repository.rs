//! Repository pattern for database operations
//!
//! SeaORM-backed access to documents and the embedding model registry.
//! Chunk vectors are handled by the pgvector-aware stores in the search and
//! ingestion crates, which share the same [`DbPool`].

use crate::db::models::*;
use crate::db::store::{DocumentStore, EmbeddingModelRegistry, NewDocument, StatusUpdate};
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// pgvector refuses HNSW indexes above this dimension for `vector`
const MAX_INDEXED_DIMENSIONS: usize = 2000;

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    /// Underlying pool, for stores that need raw sqlx access
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    // ========================================================================
    // Health Check
    // ========================================================================

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    // ========================================================================
    // Vector Index Management
    // ========================================================================

    /// Create the partial HNSW index serving vectors of one model.
    ///
    /// The chunk table stores dimension-less vectors so models can coexist;
    /// each model's index casts to its own fixed dimension.
    pub async fn ensure_vector_index(&self, model_name: &str, dimensions: usize) -> Result<()> {
        if dimensions == 0 || dimensions > MAX_INDEXED_DIMENSIONS {
            warn!(
                model = model_name,
                dimensions,
                "Dimension outside HNSW range, vector search for this model will scan"
            );
            return Ok(());
        }

        let sql = vector_index_sql(model_name, dimensions);
        self.write_conn().execute_unprepared(&sql).await?;

        debug!(model = model_name, dimensions, "Vector index ensured");
        Ok(())
    }
}

/// Identifier-safe form of a model name
fn index_suffix(model_name: &str) -> String {
    model_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

fn vector_index_sql(model_name: &str, dimensions: usize) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS idx_chunks_hnsw_{suffix}_{dimensions} \
         ON document_chunks \
         USING hnsw ((embedding::vector({dimensions})) vector_cosine_ops) \
         WHERE embedding_model = '{literal}'",
        suffix = index_suffix(model_name),
        dimensions = dimensions,
        literal = model_name.replace('\'', "''"),
    )
}

#[async_trait]
impl DocumentStore for Repository {
    async fn create_document(&self, new: NewDocument) -> Result<Document> {
        let now = chrono::Utc::now();

        let document = DocumentActiveModel {
            id: Set(Uuid::new_v4()),
            scope_id: Set(new.scope_id),
            document_type: Set(new.document_type.as_str().to_string()),
            title: Set(new.title),
            content_hash: Set(None),
            status: Set(DocumentStatus::Pending.into()),
            error_message: Set(None),
            embedding_model: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            parsed_at: Set(None),
            embedded_at: Set(None),
        };

        document.insert(self.write_conn()).await.map_err(Into::into)
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>> {
        DocumentEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn list_documents(&self, scope_id: Uuid) -> Result<Vec<Document>> {
        DocumentEntity::find()
            .filter(DocumentColumn::ScopeId.eq(scope_id))
            .order_by_asc(DocumentColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn delete_document(&self, id: Uuid) -> Result<bool> {
        // document_chunks rows go with it through ON DELETE CASCADE
        let result = DocumentEntity::delete_by_id(id)
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn update_status(&self, id: Uuid, update: StatusUpdate) -> Result<Document> {
        let now = chrono::Utc::now();

        let current = DocumentEntity::find_by_id(id)
            .one(self.write_conn())
            .await?
            .ok_or(AppError::DocumentNotFound { id })?;

        let mut document: DocumentActiveModel = current.clone().into();

        match update {
            StatusUpdate::Processing => {
                current.document_status().ensure_transition(id, DocumentStatus::Processing)?;
                document.status = Set(DocumentStatus::Processing.into());
                document.error_message = Set(None);
                document.parsed_at = Set(Some(now.into()));
            }
            StatusUpdate::Completed { content_hash, embedding_model } => {
                current.document_status().ensure_transition(id, DocumentStatus::Completed)?;
                document.status = Set(DocumentStatus::Completed.into());
                document.content_hash = Set(Some(content_hash));
                document.embedding_model = Set(Some(embedding_model));
                document.error_message = Set(None);
                document.embedded_at = Set(Some(now.into()));
            }
            StatusUpdate::Failed { error } => {
                current.document_status().ensure_transition(id, DocumentStatus::Failed)?;
                document.status = Set(DocumentStatus::Failed.into());
                document.error_message = Set(Some(error));
            }
        }

        document.updated_at = Set(now.into());

        document.update(self.write_conn()).await.map_err(Into::into)
    }
}

#[async_trait]
impl EmbeddingModelRegistry for Repository {
    async fn register_model(&self, model_name: &str, dimensions: usize) -> Result<EmbeddingModelRecord> {
        let dims = i32::try_from(dimensions).map_err(|_| AppError::Validation {
            message: format!("dimension {} out of range", dimensions),
            field: Some("dimensions".to_string()),
        })?;

        if let Some(existing) = EmbeddingModelEntity::find()
            .filter(EmbeddingModelColumn::ModelName.eq(model_name))
            .filter(EmbeddingModelColumn::Dimensions.eq(dims))
            .one(self.write_conn())
            .await?
        {
            return Ok(existing);
        }

        let record = EmbeddingModelActiveModel {
            id: Set(Uuid::new_v4()),
            model_name: Set(model_name.to_string()),
            dimensions: Set(dims),
            is_active: Set(false),
            created_at: Set(chrono::Utc::now().into()),
        };

        let record = record.insert(self.write_conn()).await?;
        info!(model = model_name, dimensions, "Embedding model registered");
        Ok(record)
    }

    async fn activate_model(&self, model_name: &str, dimensions: usize) -> Result<EmbeddingModelRecord> {
        let record = self.register_model(model_name, dimensions).await?;
        if record.is_active {
            return Ok(record);
        }

        let txn = self.write_conn().begin().await?;

        EmbeddingModelEntity::update_many()
            .col_expr(EmbeddingModelColumn::IsActive, sea_orm::sea_query::Expr::value(false))
            .filter(EmbeddingModelColumn::IsActive.eq(true))
            .exec(&txn)
            .await?;

        let mut active: EmbeddingModelActiveModel = record.into();
        active.is_active = Set(true);
        let active = active.update(&txn).await?;

        txn.commit().await?;

        self.ensure_vector_index(model_name, dimensions).await?;

        info!(model = model_name, dimensions, "Embedding model activated");
        Ok(active)
    }

    async fn active_model(&self) -> Result<Option<EmbeddingModelRecord>> {
        EmbeddingModelEntity::find()
            .filter(EmbeddingModelColumn::IsActive.eq(true))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn list_models(&self) -> Result<Vec<EmbeddingModelRecord>> {
        EmbeddingModelEntity::find()
            .order_by_asc(EmbeddingModelColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }
}

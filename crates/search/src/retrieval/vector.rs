//! Vector similarity search using pgvector
//!
//! Chunks store dimension-less vectors; each query casts both sides to the
//! query's dimension so the per-model partial HNSW index can serve it.
//! The scope join filters after the index scan, so each search widens the
//! HNSW candidate list for its own transaction.

use async_trait::async_trait;
use coursemind_common::db::{DbPool, ScoredChunk, SearchFilter, VectorStore};
use coursemind_common::errors::Result;
use pgvector::Vector;
use tracing::instrument;
use uuid::Uuid;

/// PostgreSQL/pgvector implementation of [`VectorStore`]
#[derive(Clone)]
pub struct PgVectorStore {
    db: DbPool,
}

impl PgVectorStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

/// Floor for `hnsw.ef_search`; pgvector defaults to 40
const MIN_EF_SEARCH: usize = 100;
/// pgvector's upper bound for `hnsw.ef_search`
const MAX_EF_SEARCH: usize = 1000;

/// HNSW candidate list size for a scope-filtered search of `top_k` rows
fn ef_search(top_k: usize) -> usize {
    top_k.saturating_mul(20).clamp(MIN_EF_SEARCH, MAX_EF_SEARCH)
}

/// Query result row
#[derive(Debug, sqlx::FromRow)]
struct ChunkRow {
    chunk_id: Uuid,
    document_id: Uuid,
    document_title: String,
    content: String,
    chunk_index: i32,
    score: f64,
    metadata: serde_json::Value,
}

impl From<ChunkRow> for ScoredChunk {
    fn from(row: ChunkRow) -> Self {
        Self {
            chunk_id: row.chunk_id,
            document_id: row.document_id,
            document_title: row.document_title,
            content: row.content,
            chunk_index: row.chunk_index,
            score: row.score,
            metadata: row.metadata,
        }
    }
}

/// Build the search statement.
///
/// Binds: `$1` query vector, `$2` scope id, `$3` limit, `$4` min score (when set).
/// The model name is inlined so the planner can match the partial index.
fn build_search_sql(dims: usize, filter: &SearchFilter) -> String {
    let distance = format!("c.embedding::vector({dims}) <=> $1::vector({dims})");

    let mut sql = format!(
        "SELECT c.id AS chunk_id, c.document_id, d.title AS document_title, \
                c.content, c.chunk_index, c.metadata, \
                1 - ({distance}) AS score \
         FROM document_chunks c \
         INNER JOIN documents d ON d.id = c.document_id \
         WHERE d.scope_id = $2 \
           AND vector_dims(c.embedding) = {dims}"
    );

    if let Some(model) = &filter.embedding_model {
        sql.push_str(&format!(
            " AND c.embedding_model = '{}'",
            model.replace('\'', "''")
        ));
    }

    // Guarded so a same-named model stored at another dimension is skipped, not cast
    if filter.min_score.is_some() {
        sql.push_str(&format!(
            " AND CASE WHEN vector_dims(c.embedding) = {dims} THEN 1 - ({distance}) END >= $4"
        ));
    }

    sql.push_str(&format!(
        " ORDER BY {distance}, c.document_id, c.chunk_index LIMIT $3"
    ));

    sql
}

#[async_trait]
impl VectorStore for PgVectorStore {
    #[instrument(skip(self, embedding, filter), fields(dims = embedding.len()))]
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

        let sql = build_search_sql(embedding.len(), filter);

        let mut query = sqlx::query_as::<_, ChunkRow>(&sql)
            .bind(Vector::from(embedding.to_vec()))
            .bind(scope_id)
            .bind(top_k as i64);

        if let Some(min_score) = filter.min_score {
            query = query.bind(min_score);
        }

        let mut tx = self.db.pg_read().begin().await?;
        sqlx::query(&format!("SET LOCAL hnsw.ef_search = {}", ef_search(top_k)))
            .execute(&mut *tx)
            .await?;
        let rows = query.fetch_all(&mut *tx).await?;
        tx.commit().await?;

        tracing::debug!(candidates = rows.len(), "Vector search completed");

        Ok(rows.into_iter().map(ScoredChunk::from).collect())
    }
}

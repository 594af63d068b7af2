//! Search and context handlers

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;
use validator::Validate;

use crate::retrieval::{format_context, SearchResult};
use crate::AppState;
use coursemind_common::errors::{AppError, Result};

/// Search request
#[derive(Debug, Deserialize, Validate)]
pub struct SearchRequest {
    /// Blank queries return no results
    #[validate(length(max = 4000))]
    pub query: String,

    pub scope_id: Uuid,

    /// Defaults to `retrieval.default_top_k`
    #[validate(range(max = 100))]
    pub top_k: Option<usize>,
}

/// Search response
#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub total_results: usize,
    pub results: Vec<SearchResult>,
    pub processing_time_ms: u64,
}

/// Context request
#[derive(Debug, Deserialize, Validate)]
pub struct ContextRequest {
    #[validate(length(max = 4000))]
    pub query: String,

    pub scope_id: Uuid,

    /// Defaults to `retrieval.max_context_chunks`
    #[validate(range(max = 50))]
    pub max_chunks: Option<usize>,
}

/// Context response. `empty` means no relevant documents, not a failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ContextResponse {
    pub context: String,
    pub empty: bool,
    pub sources: Vec<Uuid>,
}

fn validate<T: Validate>(request: &T) -> Result<()> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: e.field_errors().keys().next().map(|k| k.to_string()),
    })
}

/// Rank chunks in a scope against a query
pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    let start = Instant::now();
    validate(&request)?;

    let top_k = request.top_k.unwrap_or(state.retriever.config().default_top_k);
    let results = state
        .retriever
        .search(&request.query, request.scope_id, top_k)
        .await?;

    let processing_time_ms = start.elapsed().as_millis() as u64;

    tracing::info!(
        scope_id = %request.scope_id,
        top_k,
        results = results.len(),
        latency_ms = processing_time_ms,
        "Search completed"
    );

    Ok(Json(SearchResponse {
        query: request.query,
        total_results: results.len(),
        results,
        processing_time_ms,
    }))
}

/// Assemble prompt context for a query
pub async fn context(
    State(state): State<AppState>,
    Json(request): Json<ContextRequest>,
) -> Result<Json<ContextResponse>> {
    validate(&request)?;

    let max_chunks = request
        .max_chunks
        .unwrap_or(state.retriever.config().max_context_chunks);

    let results = state
        .retriever
        .search(&request.query, request.scope_id, max_chunks)
        .await?;

    let mut sources: Vec<Uuid> = Vec::new();
    for result in &results {
        if !sources.contains(&result.document_id) {
            sources.push(result.document_id);
        }
    }

    let context = format_context(&results);

    tracing::info!(
        scope_id = %request.scope_id,
        chunks = results.len(),
        "Context assembled"
    );

    Ok(Json(ContextResponse {
        empty: context.is_empty(),
        context,
        sources,
    }))
}

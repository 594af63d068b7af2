//! CourseMind Search Service
//!
//! Retrieval for prompt construction:
//! - Query embedding
//! - Vector similarity search (pgvector) within a scope
//! - Optional reranking
//! - Context assembly with source headers

pub mod handlers;
pub mod retrieval;

use axum::{
    http::StatusCode,
    middleware,
    routing::{get, post},
    Router,
};
use coursemind_common::db::DbPool;
use retrieval::DocumentRetriever;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub retriever: Arc<DocumentRetriever>,
    /// Checked by the readiness probe; absent when running without a database
    pub db: Option<DbPool>,
}

/// Create the application router
pub fn create_router(state: AppState, request_timeout: Duration) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let api_routes = Router::new()
        .route("/search", post(handlers::search::search))
        .route("/context", post(handlers::search::context));

    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/v1", api_routes)
        .route_layer(middleware::from_fn(handlers::metrics::track_requests))
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(propagate_id)
        .layer(request_id)
        .with_state(state)
}

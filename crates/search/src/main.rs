//! CourseMind Search Service binary
//!
//! Serves `/v1/search` and `/v1/context` over HTTP.

use coursemind_common::{
    config::AppConfig,
    db::DbPool,
    embeddings::create_embedder,
    telemetry, VERSION,
};
use coursemind_search::{
    create_router,
    retrieval::{build_reranker, DocumentRetriever, PgVectorStore},
    AppState,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;

    telemetry::init_tracing(&config.observability);
    telemetry::init_metrics(&config.observability)?;

    info!("Starting CourseMind Search Service v{}", VERSION);

    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    if config.database.run_migrations {
        db.run_migrations().await?;
    }

    let embedder = create_embedder(&config.embedding)?;
    info!(
        model = embedder.model_name(),
        dimension = embedder.dimension(),
        reranking = config.retrieval.enable_reranking,
        "Retrieval pipeline configured"
    );

    let retriever = DocumentRetriever::new(
        embedder,
        Arc::new(PgVectorStore::new(db.clone())),
        build_reranker(config.retrieval.reranker),
        config.retrieval.clone(),
    );

    let state = AppState {
        retriever: Arc::new(retriever),
        db: Some(db),
    };

    let app = create_router(state, config.request_timeout());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Search service shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

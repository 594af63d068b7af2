//! CourseMind Ingestion Service binary
//!
//! Modes:
//! - `ingestion` polls the SQS ingestion queue
//! - `ingestion process <document-id> [--force]` processes one document
//! - `ingestion reembed <scope-id>` re-embeds documents made by an older model

use coursemind_common::{
    config::AppConfig,
    db::{DbPool, EmbeddingModelRegistry, Repository},
    embeddings::create_embedder,
    queue::Queue,
    telemetry, VERSION,
};
use coursemind_ingestion::{
    processor::DocumentProcessor,
    source::FileTextSource,
    storage::{ChunkStorageService, PgChunkStore},
    worker,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;

    telemetry::init_tracing(&config.observability);

    info!("Starting CourseMind Ingestion Service v{}", VERSION);

    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    if config.database.run_migrations {
        db.run_migrations().await?;
    }

    let embedder = create_embedder(&config.embedding)?;
    let repository = Arc::new(Repository::new(db.clone()));

    if let Some(previous) = repository.active_model().await? {
        if previous.model_name != embedder.model_name() {
            warn!(
                previous = %previous.model_name,
                current = %embedder.model_name(),
                "Active embedding model changed; run `ingestion reembed <scope-id>` to migrate chunks"
            );
        }
    }

    // New chunks are written with this model; make sure it has an index
    repository
        .activate_model(embedder.model_name(), embedder.dimension())
        .await?;

    info!(
        model = %embedder.model_name(),
        dimension = embedder.dimension(),
        "Embedder initialized"
    );

    let processor = DocumentProcessor::new(
        repository,
        ChunkStorageService::new(Arc::new(PgChunkStore::new(db))),
        embedder,
        Arc::new(FileTextSource::new(&config.ingestion.source_dir)),
        config.chunking.clone(),
        config.embedding.version,
    );

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("process") => {
            let document_id: Uuid = args
                .get(2)
                .ok_or("usage: ingestion process <document-id> [--force]")?
                .parse()?;
            let force = args.iter().skip(3).any(|a| a == "--force");

            match processor.process_document(document_id, force).await {
                Ok(outcome) => {
                    println!("{}", serde_json::to_string_pretty(&outcome)?);
                    Ok(())
                }
                Err(e) => {
                    error!(error = %e, "Failed to process document");
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Some("reembed") => {
            let scope_id: Uuid = args
                .get(2)
                .ok_or("usage: ingestion reembed <scope-id>")?
                .parse()?;
            let report = processor.reembed_stale(scope_id).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Some(other) => Err(format!("unknown command '{}'", other).into()),
        None => {
            telemetry::init_metrics(&config.observability)?;

            if config.queue.ingestion_queue_url.is_none() {
                warn!("queue.ingestion_queue_url not set, waiting for shutdown signal...");
                tokio::signal::ctrl_c().await?;
                info!("Ingestion service shutting down");
                return Ok(());
            }

            let queue = Queue::new(&config.queue).await?;
            info!("Ingestion worker ready, starting queue polling...");

            worker::run(&processor, &queue, async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "Failed to listen for Ctrl+C");
                }
            })
            .await;

            info!("Ingestion service shutting down");
            Ok(())
        }
    }
}

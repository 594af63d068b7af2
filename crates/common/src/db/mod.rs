//! Database layer for CourseMind
//!
//! Provides:
//! - SeaORM entity models
//! - Storage traits shared by retrieval and ingestion
//! - Repository (PostgreSQL) and in-memory implementations
//! - Connection pool management and schema bootstrap

mod memory;
pub mod models;
mod repository;
mod store;

pub use memory::InMemoryStore;
pub use repository::Repository;
pub use store::{
    ChunkBatch, ChunkStore, DocumentStore, EmbeddingModelRegistry, NewChunk, NewDocument,
    ScoredChunk, SearchFilter, StatusUpdate, VectorStore,
};

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use std::time::Duration;
use tracing::info;

/// Schema for documents, chunks and the embedding model registry
const SCHEMA_SQL: &str = include_str!("../../migrations/0001_retrieval_schema.sql");

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    /// Primary connection (for writes)
    pub primary: DatabaseConnection,

    /// Read replica connection (optional)
    pub replica: Option<DatabaseConnection>,
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to primary database...");

        let primary = Database::connect(Self::connect_options(&config.url, config))
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Failed to connect to primary: {}", e)
            })?;

        // Connect to replica if configured
        let replica = if let Some(ref read_url) = config.read_url {
            info!("Connecting to read replica...");

            let replica_conn = Database::connect(Self::connect_options(read_url, config))
                .await
                .map_err(|e| AppError::DatabaseConnection {
                    message: format!("Failed to connect to replica: {}", e)
                })?;

            Some(replica_conn)
        } else {
            None
        };

        info!("Database connections established");

        Ok(Self { primary, replica })
    }

    fn connect_options(url: &str, config: &DatabaseConfig) -> ConnectOptions {
        let mut opts = ConnectOptions::new(url);
        opts.max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .sqlx_logging(false);
        opts
    }

    /// Get the connection for reads (replica if available, otherwise primary)
    pub fn read(&self) -> &DatabaseConnection {
        self.replica.as_ref().unwrap_or(&self.primary)
    }

    /// Get the connection for writes (always primary)
    pub fn write(&self) -> &DatabaseConnection {
        &self.primary
    }

    /// Raw sqlx pool for reads, used for pgvector-typed queries
    pub fn pg_read(&self) -> &sqlx::PgPool {
        self.read().get_postgres_connection_pool()
    }

    /// Raw sqlx pool for writes, used for pgvector-typed statements
    pub fn pg_write(&self) -> &sqlx::PgPool {
        self.write().get_postgres_connection_pool()
    }

    /// Apply the bundled schema. Every statement is idempotent.
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Applying retrieval schema...");
        self.primary.execute_unprepared(SCHEMA_SQL).await?;
        Ok(())
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        self.primary
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Primary ping failed: {}", e),
            })?;

        if let Some(ref replica) = self.replica {
            replica
                .execute_unprepared("SELECT 1")
                .await
                .map_err(|e| AppError::DatabaseConnection {
                    message: format!("Replica ping failed: {}", e),
                })?;
        }

        Ok(())
    }
}

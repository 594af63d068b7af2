//! SeaORM entity models
//!
//! Database entities for the retrieval core

mod chunk;
mod document;
mod embedding_model;

pub use document::{
    Entity as DocumentEntity,
    Model as Document,
    ActiveModel as DocumentActiveModel,
    Column as DocumentColumn,
    DocumentStatus,
    DocumentType,
};

pub use chunk::{
    Entity as ChunkEntity,
    Model as Chunk,
    ActiveModel as ChunkActiveModel,
    Column as ChunkColumn,
};

pub use embedding_model::{
    Entity as EmbeddingModelEntity,
    Model as EmbeddingModelRecord,
    ActiveModel as EmbeddingModelActiveModel,
    Column as EmbeddingModelColumn,
};

//! Document chunk entity with embedding versioning
//!
//! The `embedding` vector column is not mapped here; vector reads and writes
//! go through sqlx with `pgvector::Vector` bindings.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "document_chunks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub document_id: Uuid,

    /// Ordering within the document, unique per document
    pub chunk_index: i32,

    #[sea_orm(column_type = "Text")]
    pub content: String,

    /// Embedding model identifier for versioning
    #[sea_orm(column_type = "Text")]
    pub embedding_model: String,

    /// Embedding version number for model upgrades
    pub embedding_version: i32,

    /// Token count for context budgeting
    pub token_count: i32,

    pub char_count: i32,

    /// Source attribution, section heading and offsets
    #[sea_orm(column_type = "JsonBinary")]
    pub metadata: Json,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::document::Entity",
        from = "Column::DocumentId",
        to = "super::document::Column::Id",
        on_delete = "Cascade"
    )]
    Document,
}

impl Related<super::document::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Document.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}


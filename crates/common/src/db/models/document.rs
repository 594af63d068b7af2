//! Document entity and its processing state machine

use crate::errors::AppError;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of parent content a document was uploaded for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Book,
    Video,
    Course,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Book => "book",
            DocumentType::Video => "video",
            DocumentType::Course => "course",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocumentType {
    type Err = AppError;

    fn from_str(s: &str) -> crate::errors::Result<Self> {
        match s {
            "book" => Ok(DocumentType::Book),
            "video" => Ok(DocumentType::Video),
            "course" => Ok(DocumentType::Course),
            other => Err(AppError::Validation {
                message: format!("unknown document type '{}'", other),
                field: Some("document_type".to_string()),
            }),
        }
    }
}

/// Processing status of a document
///
/// `pending → processing → {completed | failed}`; finished documents may be
/// sent back to `processing`. There is no cancelled state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// `processing → processing` is accepted so a run that died mid-flight
    /// can be restarted.
    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Completed, Processing)
                | (Failed, Processing)
        )
    }

    /// Check a transition for document `id`, producing a typed error.
    pub fn ensure_transition(&self, id: Uuid, next: DocumentStatus) -> crate::errors::Result<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(AppError::InvalidStatusTransition {
                id,
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for DocumentStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "processing" => DocumentStatus::Processing,
            "completed" => DocumentStatus::Completed,
            "failed" => DocumentStatus::Failed,
            _ => DocumentStatus::Pending,
        }
    }
}

impl From<DocumentStatus> for String {
    fn from(status: DocumentStatus) -> Self {
        status.as_str().to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "documents")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Parent content boundary (course, roadmap, book shelf) used to scope retrieval
    pub scope_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub document_type: String,

    #[sea_orm(column_type = "Text")]
    pub title: String,

    /// SHA-256 of the extracted text the current chunks were built from
    #[sea_orm(column_type = "Text", nullable)]
    pub content_hash: Option<String>,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,

    /// Model that produced the stored chunk vectors
    #[sea_orm(column_type = "Text", nullable)]
    pub embedding_model: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,

    pub parsed_at: Option<DateTimeWithTimeZone>,

    pub embedded_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    /// Get the processing status as an enum
    pub fn document_status(&self) -> DocumentStatus {
        DocumentStatus::from(self.status.clone())
    }

    /// Get the document type as an enum
    pub fn kind(&self) -> crate::errors::Result<DocumentType> {
        self.document_type.parse()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::chunk::Entity")]
    Chunks,
}

impl Related<super::chunk::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Chunks.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;
    use DocumentStatus::*;

    #[test]
    fn test_allowed_transitions() {
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Completed.can_transition_to(Processing));
        assert!(Failed.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Processing));
    }

    #[test]
    fn test_rejected_transitions() {
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Pending));

        let err = Pending.ensure_transition(Uuid::nil(), Completed).unwrap_err();
        assert!(matches!(err, AppError::InvalidStatusTransition { .. }));
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in [Pending, Processing, Completed, Failed] {
            assert_eq!(DocumentStatus::from(String::from(status)), status);
        }
        assert_eq!(DocumentStatus::from("garbage".to_string()), Pending);
    }

    #[test]
    fn test_model_accessors() {
        let now = chrono::Utc::now().into();
        let model = Model {
            id: Uuid::new_v4(),
            scope_id: Uuid::new_v4(),
            document_type: "book".to_string(),
            title: "The Rust Book".to_string(),
            content_hash: None,
            status: Completed.into(),
            error_message: None,
            embedding_model: None,
            created_at: now,
            updated_at: now,
            parsed_at: None,
            embedded_at: None,
        };
        assert_eq!(model.document_status(), Completed);
        assert_eq!(model.kind().unwrap(), DocumentType::Book);

        let unknown = Model { document_type: "podcast".to_string(), ..model };
        assert!(matches!(unknown.kind(), Err(AppError::Validation { .. })));
    }

    #[test]
    fn test_document_type_parse() {
        assert_eq!("video".parse::<DocumentType>().unwrap(), DocumentType::Video);
        assert!("podcast".parse::<DocumentType>().is_err());
    }
}

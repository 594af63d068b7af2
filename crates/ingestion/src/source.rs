//! Extracted-text sources
//!
//! Parsing books, transcripts and course material happens upstream; the
//! processor only sees the resulting text through [`TextSource`].

use crate::errors::{IngestionError, Result};
use async_trait::async_trait;
use coursemind_common::db::models::Document;
use std::path::PathBuf;

#[async_trait]
pub trait TextSource: Send + Sync {
    /// Full text of the document, as the parser produced it
    async fn extract_text(&self, document: &Document) -> Result<String>;
}

/// Reads `{document_id}.md` or `{document_id}.txt` from a directory
#[derive(Debug, Clone)]
pub struct FileTextSource {
    root: PathBuf,
}

impl FileTextSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl TextSource for FileTextSource {
    async fn extract_text(&self, document: &Document) -> Result<String> {
        for extension in ["md", "txt"] {
            let path = self.root.join(format!("{}.{}", document.id, extension));
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => return Ok(text),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(IngestionError::Extraction {
            document_id: document.id,
            message: format!("no extracted text under {}", self.root.display()),
        })
    }
}

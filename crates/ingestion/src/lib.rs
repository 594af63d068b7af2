//! CourseMind Ingestion Service
//!
//! Turns uploaded documents into retrievable chunks:
//! 1. Reads the extracted text
//! 2. Skips documents whose content hash is unchanged
//! 3. Chunks and embeds the text
//! 4. Replaces the stored chunk set in one transaction
//! 5. Records the outcome on the document

pub mod chunker;
pub mod errors;
pub mod processor;
pub mod source;
pub mod storage;
pub mod worker;

pub use errors::IngestionError;
pub use processor::{DocumentProcessor, ProcessOutcome, ReembedReport, SkipReason};

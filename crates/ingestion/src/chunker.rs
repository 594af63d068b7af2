//! Text chunking module
//!
//! Splits extracted document text into overlapping chunks for embedding and
//! tags each chunk with the markdown section it falls under.

use crate::errors::IngestionError;
use coursemind_common::config::ChunkingConfig;
use regex_lite::Regex;
use std::sync::OnceLock;
use text_splitter::{ChunkConfig, MarkdownSplitter, TextSplitter};
use tracing::debug;

/// A text chunk with position and heading information
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    /// The chunk content
    pub content: String,
    /// Index of this chunk in the document
    pub index: i32,
    /// Approximate token count
    pub token_count: i32,
    /// Characters in the chunk
    pub char_count: i32,
    /// Start byte offset in the original text
    pub start_pos: usize,
    /// End byte offset in the original text
    pub end_pos: usize,
    /// Closest markdown heading at or before the chunk
    pub section_heading: Option<String>,
}

fn heading_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?m)^#{1,6}[ \t]+(.+?)[ \t#]*$").expect("valid heading regex"))
}

/// (byte offset, heading text) for every markdown heading
fn headings(text: &str) -> Vec<(usize, String)> {
    heading_pattern()
        .captures_iter(text)
        .filter_map(|caps| {
            let start = caps.get(0)?.start();
            Some((start, caps.get(1)?.as_str().trim().to_string()))
        })
        .collect()
}

/// Roughly four characters per token
fn estimate_tokens(chars: usize) -> i32 {
    chars.div_ceil(4) as i32
}

/// Split text into chunks for embedding.
///
/// Markdown input is split on its structure; anything else on sentence and
/// word boundaries. Chunks shorter than `min_chunk_size` characters are
/// dropped and the survivors re-indexed from zero.
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Result<Vec<TextChunk>, IngestionError> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let chunk_config = ChunkConfig::new(config.chunk_size.max(1))
        .with_overlap(config.chunk_overlap)
        .map_err(|e| IngestionError::Chunking(e.to_string()))?;

    let headings = headings(text);

    let pieces: Vec<(usize, &str)> = if headings.is_empty() {
        TextSplitter::new(chunk_config).chunk_indices(text).collect()
    } else {
        MarkdownSplitter::new(chunk_config).chunk_indices(text).collect()
    };

    debug!(
        input_len = text.len(),
        chunk_count = pieces.len(),
        chunk_size = config.chunk_size,
        "Text chunked"
    );

    let chunks = pieces
        .into_iter()
        .filter_map(|(start_pos, content)| {
            let char_count = content.chars().count();
            if char_count < config.min_chunk_size {
                return None;
            }

            let section_heading = headings
                .iter()
                .take_while(|(offset, _)| *offset <= start_pos)
                .last()
                .map(|(_, heading)| heading.clone());

            Some((start_pos, content, char_count, section_heading))
        })
        .enumerate()
        .map(|(index, (start_pos, content, char_count, section_heading))| TextChunk {
            content: content.to_string(),
            index: index as i32,
            token_count: estimate_tokens(char_count),
            char_count: char_count as i32,
            start_pos,
            end_pos: start_pos + content.len(),
            section_heading,
        })
        .collect();

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(chunk_size: usize, chunk_overlap: usize, min_chunk_size: usize) -> ChunkingConfig {
        ChunkingConfig { chunk_size, chunk_overlap, min_chunk_size }
    }

    #[test]
    fn test_basic_chunking() {
        let text = "This is a test. ".repeat(100);
        let config = config(200, 50, 50);

        let chunks = chunk_text(&text, &config).unwrap();
        assert!(chunks.len() > 1);

        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i as i32);
            assert!(chunk.char_count as usize >= config.min_chunk_size);
            assert!(chunk.char_count <= 200);
            assert_eq!(&text[chunk.start_pos..chunk.end_pos], chunk.content);
        }
    }

    #[test]
    fn test_small_chunks_dropped_and_reindexed() {
        let chunks = chunk_text("tiny", &config(100, 0, 20)).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let result = chunk_text("some text here", &config(10, 20, 1));
        assert!(matches!(result, Err(IngestionError::Chunking(_))));
    }

    #[test]
    fn test_section_headings() {
        let text = "# Ownership\n\nEvery value has a single owner in Rust.\n\n\
                    ## Borrowing\n\nReferences borrow values without taking ownership.";
        let chunks = chunk_text(text, &config(60, 0, 5)).unwrap();

        assert!(chunks.len() >= 2);
        assert_eq!(chunks[0].section_heading.as_deref(), Some("Ownership"));
        let last = chunks.last().unwrap();
        assert_eq!(last.section_heading.as_deref(), Some("Borrowing"));
    }

    #[test]
    fn test_empty_text() {
        let chunks = chunk_text("  \n ", &ChunkingConfig::default()).unwrap();
        assert!(chunks.is_empty());
    }
}

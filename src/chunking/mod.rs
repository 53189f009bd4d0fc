//! Text chunking for breaking extracted documents into retrievable segments.
//!
//! Chunks overlap so that a sentence cut at one boundary is still whole in a
//! neighbouring chunk. Offsets are character positions in the normalized text.

mod recursive;

pub use recursive::RecursiveChunker;

use crate::config::ChunkingSettings;
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// A contiguous slice of normalized document text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSpan {
    pub text: String,
    /// Inclusive start, in characters.
    pub start_offset: usize,
    /// Exclusive end, in characters.
    pub end_offset: usize,
}

impl TextSpan {
    pub fn len_chars(&self) -> usize {
        self.end_offset - self.start_offset
    }
}

/// Configuration for chunking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Target chunk size in characters.
    pub chunk_size: usize,
    /// Characters shared by consecutive chunks.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap: 200,
        }
    }
}

impl From<&ChunkingSettings> for ChunkingConfig {
    fn from(settings: &ChunkingSettings) -> Self {
        Self {
            chunk_size: settings.chunk_size,
            overlap: settings.chunk_overlap,
        }
    }
}

/// Trait for text chunking implementations.
///
/// Implementations must be deterministic: the same text and configuration
/// always yield the same boundaries.
pub trait Chunker: Send + Sync {
    /// Split raw extracted text into ordered, overlapping spans.
    ///
    /// Fails with [`crate::error::BuddyError::EmptyDocument`] when the text is
    /// blank after normalization.
    fn chunk(&self, raw_text: &str) -> Result<Vec<TextSpan>>;
}

/// Normalize extracted text: unify line endings, collapse runs of spaces,
/// and keep at most one blank line between paragraphs.
pub fn normalize_text(raw: &str) -> String {
    let unified = raw
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\u{a0}', " ");

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current: Vec<String> = Vec::new();

    for line in unified.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n"));
    }

    paragraphs.join("\n\n")
}

//! Splitting source text into chunks.
//!
//! Ingestion only depends on the [`Chunker`] trait. [`ParagraphChunker`] is a
//! simple default that packs blank-line separated paragraphs up to a target
//! size.

use crate::storage::Metadata;

/// A chunk produced by a [`Chunker`], before embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDraft {
    pub content: String,
    pub metadata: Metadata,
}

impl ChunkDraft {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: Metadata::default(),
        }
    }
}

pub trait Chunker: Send + Sync {
    /// Split `text` into chunks in document order. Empty input yields no chunks.
    fn chunk(&self, text: &str) -> Vec<ChunkDraft>;

    /// Name recorded under the `chunking_strategy` metadata key
    fn strategy(&self) -> &'static str;
}

/// Packs paragraphs into chunks of roughly `target_chars` characters.
///
/// A paragraph longer than the target is split at line boundaries; a single
/// line longer than the target becomes its own chunk.
pub struct ParagraphChunker {
    target_chars: usize,
}

impl ParagraphChunker {
    pub fn new(target_chars: usize) -> Self {
        Self {
            target_chars: target_chars.max(1),
        }
    }

    fn push(chunks: &mut Vec<ChunkDraft>, buffer: &mut String) {
        let trimmed = buffer.trim();
        if !trimmed.is_empty() {
            chunks.push(ChunkDraft::new(trimmed));
        }
        buffer.clear();
    }
}

impl Default for ParagraphChunker {
    fn default() -> Self {
        // ~512 tokens at 4 chars per token
        Self::new(2048)
    }
}

impl Chunker for ParagraphChunker {
    fn chunk(&self, text: &str) -> Vec<ChunkDraft> {
        let mut chunks = Vec::new();
        let mut buffer = String::new();

        for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
            if !buffer.is_empty() && buffer.len() + paragraph.len() + 2 > self.target_chars {
                Self::push(&mut chunks, &mut buffer);
            }

            if paragraph.len() <= self.target_chars {
                if !buffer.is_empty() {
                    buffer.push_str("\n\n");
                }
                buffer.push_str(paragraph);
                continue;
            }

            for line in paragraph.lines() {
                if !buffer.is_empty() && buffer.len() + line.len() + 1 > self.target_chars {
                    Self::push(&mut chunks, &mut buffer);
                }
                if !buffer.is_empty() {
                    buffer.push('\n');
                }
                buffer.push_str(line);
            }
            Self::push(&mut chunks, &mut buffer);
        }

        Self::push(&mut chunks, &mut buffer);
        chunks
    }

    fn strategy(&self) -> &'static str {
        "paragraph"
    }
}

//! Data types for documents, chunks, and retrieval results.

use serde::{Deserialize, Serialize};

/// Free-form metadata attached to documents and chunks.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A source document handed to a [`Chunker`](crate::Chunker).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Stable identifier for the document, used as the chunk id prefix.
    pub id: String,
    /// The text content of the document.
    pub text: String,
    /// Metadata copied onto every chunk of this document.
    pub metadata: Metadata,
    /// Optional URI pointing to the original source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_uri: Option<String>,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { id: id.into(), text: text.into(), metadata: Metadata::new(), source_uri: None }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A bounded span of a [`Document`], the atomic retrievable unit.
///
/// `start_index..end_index` is the byte range of `content` inside the
/// document text, so `&document.text[chunk.start_index..chunk.end_index]`
/// equals `chunk.content`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// `{document_id}_chunk_{n}`, unique within one ingestion run.
    pub id: String,
    /// The trimmed text of the chunk.
    pub content: String,
    /// Document metadata plus chunk-specific fields such as `chunk_index`.
    pub metadata: Metadata,
    /// Byte offset of the first content byte.
    pub start_index: usize,
    /// Byte offset one past the last content byte.
    pub end_index: usize,
    /// The ID of the parent [`Document`].
    pub document_id: String,
}

/// The persisted form of a chunk: what a snapshot stores next to each vector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkRecord {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl From<Chunk> for ChunkRecord {
    fn from(chunk: Chunk) -> Self {
        Self { id: chunk.id, content: chunk.content, metadata: chunk.metadata }
    }
}

/// A retrieved chunk paired with a relevance score.
///
/// Scores are only comparable within a single retrieval call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalResult {
    pub id: String,
    pub content: String,
    /// Higher is more relevant.
    pub score: f32,
    pub metadata: Metadata,
}

impl RetrievalResult {
    pub(crate) fn from_record(record: &ChunkRecord, score: f32) -> Self {
        Self {
            id: record.id.clone(),
            content: record.content.clone(),
            score,
            metadata: record.metadata.clone(),
        }
    }
}

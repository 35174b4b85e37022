//! Document chunking strategies.
//!
//! This module provides the [`Chunker`] trait and three implementations:
//!
//! - [`FixedSizeChunker`]: sliding character window with overlap, preferring
//!   to cut right after a sentence terminator
//! - [`SemanticChunker`]: splits on markdown headings, then on blank-line
//!   paragraphs for oversized sections
//! - [`CodeAwareChunker`]: splits before lines that introduce a top-level
//!   function, class or binding
//!
//! [`ChunkingStrategy`] selects one of them by name at configuration time.
//!
//! Every strategy reports byte offsets into the source text such that
//! `&text[chunk.start_index..chunk.end_index] == chunk.content`.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::document::{Chunk, Document};
use crate::error::{RagError, Result};

/// How far back from a window end to look for a sentence terminator.
const SENTENCE_LOOKBACK: usize = 50;

static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#{1,3}\s").expect("heading pattern is valid"));

static CODE_BOUNDARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^(?:async def|def|class|function|const|export|pub|fn|impl|struct|enum|trait|mod)\s",
    )
    .expect("code boundary pattern is valid")
});

/// A strategy for splitting documents into chunks.
pub trait Chunker: Send + Sync {
    /// Split a document into chunks.
    ///
    /// Returns an empty `Vec` if the document has no non-whitespace text.
    /// Chunks are returned in document order and never have empty content.
    fn chunk(&self, document: &Document) -> Vec<Chunk>;
}

/// Size parameters used when selecting a strategy by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingParams {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_size: usize,
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self { chunk_size: 512, chunk_overlap: 50, min_chunk_size: 100 }
    }
}

/// The closed set of chunking strategies.
#[derive(Debug, Clone)]
pub enum ChunkingStrategy {
    Fixed(FixedSizeChunker),
    Semantic(SemanticChunker),
    Code(CodeAwareChunker),
}

impl ChunkingStrategy {
    /// Select a strategy by name: `"fixed"`, `"semantic"` or `"code"`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] for an unknown name or parameters
    /// the chosen strategy rejects.
    pub fn from_name(name: &str, params: &ChunkingParams) -> Result<Self> {
        match name {
            "fixed" => {
                Ok(Self::Fixed(FixedSizeChunker::new(params.chunk_size, params.chunk_overlap)?))
            }
            "semantic" => {
                Ok(Self::Semantic(SemanticChunker::new(params.chunk_size, params.min_chunk_size)?))
            }
            "code" => Ok(Self::Code(CodeAwareChunker::new(params.chunk_size)?)),
            other => Err(RagError::ConfigError(format!("unknown chunking strategy: {other}"))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Fixed(_) => "fixed",
            Self::Semantic(_) => "semantic",
            Self::Code(_) => "code",
        }
    }
}

impl Chunker for ChunkingStrategy {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        match self {
            Self::Fixed(chunker) => chunker.chunk(document),
            Self::Semantic(chunker) => chunker.chunk(document),
            Self::Code(chunker) => chunker.chunk(document),
        }
    }
}

/// Splits text into windows of `chunk_size` characters, with
/// `chunk_overlap` characters shared between consecutive windows.
///
/// A window that does not reach the end of the text is shortened to end
/// right after the last `". "` found within its trailing 50 characters.
///
/// # Example
///
/// ```rust,ignore
/// use docrag::FixedSizeChunker;
///
/// let chunker = FixedSizeChunker::new(256, 50)?;
/// let chunks = chunker.chunk(&document);
/// ```
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl FixedSizeChunker {
    /// Create a new `FixedSizeChunker`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] unless `0 <= chunk_overlap < chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::ConfigError("chunk_size must be greater than zero".to_string()));
        }
        if chunk_overlap >= chunk_size {
            return Err(RagError::ConfigError(format!(
                "chunk_overlap ({chunk_overlap}) must be less than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self { chunk_size, chunk_overlap })
    }
}

impl Chunker for FixedSizeChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let text = document.text.as_str();
        // Byte offset of every char boundary, including the end of the text.
        let bounds: Vec<usize> =
            text.char_indices().map(|(i, _)| i).chain(std::iter::once(text.len())).collect();
        let char_count = bounds.len() - 1;

        let mut sink = ChunkSink::new(document, None);
        let mut start = 0;

        while start < char_count {
            let mut end = (start + self.chunk_size).min(char_count);

            if end < char_count {
                let lookback = (start + self.chunk_size).saturating_sub(SENTENCE_LOOKBACK).max(start);
                let window = &text[bounds[lookback]..bounds[end]];
                if let Some(pos) = window.rfind(". ") {
                    let period_byte = bounds[lookback] + pos;
                    if let Ok(period) = bounds.binary_search(&period_byte) {
                        if period > start {
                            end = period + 1;
                        }
                    }
                }
            }

            sink.push(bounds[start], bounds[end]);

            if end == char_count {
                break;
            }
            let next = end.saturating_sub(self.chunk_overlap);
            start = if next > start { next } else { end };
        }

        sink.finish()
    }
}

/// Splits on markdown headings (`#` to `###`), then on blank lines for any
/// section longer than `max_chunk_size`.
///
/// Units are accumulated into a buffer that is emitted once adding the next
/// unit would exceed `max_chunk_size`, but only if the buffer already holds
/// `min_chunk_size` characters. Small neighbours are merged rather than
/// emitted as fragments, so a chunk may exceed the maximum.
#[derive(Debug, Clone)]
pub struct SemanticChunker {
    max_chunk_size: usize,
    min_chunk_size: usize,
}

impl SemanticChunker {
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if `max_chunk_size` is zero.
    pub fn new(max_chunk_size: usize, min_chunk_size: usize) -> Result<Self> {
        if max_chunk_size == 0 {
            return Err(RagError::ConfigError(
                "max_chunk_size must be greater than zero".to_string(),
            ));
        }
        Ok(Self { max_chunk_size, min_chunk_size })
    }
}

impl Chunker for SemanticChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let text = document.text.as_str();
        let mut sink = ChunkSink::new(document, None);
        let mut buffer = Accumulator::new(self.max_chunk_size, self.min_chunk_size);

        for section in boundary_spans(text, &HEADING) {
            if char_len(&text[section.0..section.1]) > self.max_chunk_size {
                for paragraph in paragraph_spans(text, section) {
                    buffer.add(text, paragraph, &mut sink);
                }
            } else {
                buffer.add(text, section, &mut sink);
            }
        }

        buffer.finish(&mut sink);
        sink.finish()
    }
}

/// Splits source code before lines that start a top-level definition.
///
/// The boundary test is a keyword match at column zero (`def`, `class`,
/// `function`, `const`, `export`, `fn`, `pub`, `impl`, `struct`, `enum`,
/// `trait`, `mod`), not a parse. Chunks carry `"type": "code"` metadata.
#[derive(Debug, Clone)]
pub struct CodeAwareChunker {
    max_chunk_size: usize,
}

impl CodeAwareChunker {
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if `max_chunk_size` is zero.
    pub fn new(max_chunk_size: usize) -> Result<Self> {
        if max_chunk_size == 0 {
            return Err(RagError::ConfigError(
                "max_chunk_size must be greater than zero".to_string(),
            ));
        }
        Ok(Self { max_chunk_size })
    }
}

impl Chunker for CodeAwareChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let text = document.text.as_str();
        let mut sink = ChunkSink::new(document, Some("code"));
        let mut buffer = Accumulator::new(self.max_chunk_size, 0);

        for unit in boundary_spans(text, &CODE_BOUNDARY) {
            buffer.add(text, unit, &mut sink);
        }

        buffer.finish(&mut sink);
        sink.finish()
    }
}

type Span = (usize, usize);

/// Collects trimmed spans of one document into numbered chunks.
struct ChunkSink<'a> {
    document: &'a Document,
    kind: Option<&'static str>,
    chunks: Vec<Chunk>,
}

impl<'a> ChunkSink<'a> {
    fn new(document: &'a Document, kind: Option<&'static str>) -> Self {
        Self { document, kind, chunks: Vec::new() }
    }

    fn push(&mut self, start: usize, end: usize) {
        let text = self.document.text.as_str();
        let Some((start, end)) = trim_span(text, start, end) else {
            return;
        };

        let index = self.chunks.len();
        let mut metadata = self.document.metadata.clone();
        metadata.insert("chunk_index".to_string(), Value::from(index));
        if let Some(kind) = self.kind {
            metadata.insert("type".to_string(), Value::from(kind));
        }

        self.chunks.push(Chunk {
            id: format!("{}_chunk_{index}", self.document.id),
            content: text[start..end].to_string(),
            metadata,
            start_index: start,
            end_index: end,
            document_id: self.document.id.clone(),
        });
    }

    fn finish(self) -> Vec<Chunk> {
        self.chunks
    }
}

/// Running buffer of contiguous units, flushed into a [`ChunkSink`].
struct Accumulator {
    max: usize,
    min: usize,
    /// Buffered span and its length in characters.
    buffer: Option<(Span, usize)>,
}

impl Accumulator {
    fn new(max: usize, min: usize) -> Self {
        Self { max, min, buffer: None }
    }

    fn add(&mut self, text: &str, unit: Span, sink: &mut ChunkSink<'_>) {
        let unit_text = &text[unit.0..unit.1];
        if unit_text.trim().is_empty() {
            return;
        }
        let unit_len = char_len(unit_text);

        self.buffer = match self.buffer.take() {
            None => Some((unit, unit_len)),
            Some(((start, end), len)) if len + unit_len > self.max && len >= self.min => {
                sink.push(start, end);
                Some((unit, unit_len))
            }
            Some(((start, end), len)) => {
                // Units are contiguous in the source, so the gap is separator text.
                let extended = len + char_len(&text[end..unit.1]);
                Some(((start, unit.1), extended))
            }
        };
    }

    fn finish(self, sink: &mut ChunkSink<'_>) {
        if let Some(((start, end), _)) = self.buffer {
            sink.push(start, end);
        }
    }
}

/// Split `text` into spans starting at every match of `pattern` after offset 0.
fn boundary_spans(text: &str, pattern: &Regex) -> Vec<Span> {
    let mut starts = vec![0];
    starts.extend(pattern.find_iter(text).map(|m| m.start()).filter(|&start| start > 0));
    starts.push(text.len());
    starts.windows(2).map(|w| (w[0], w[1])).filter(|(start, end)| start < end).collect()
}

/// Split a section into paragraph spans separated by blank lines.
fn paragraph_spans(text: &str, (start, end): Span) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut cursor = start;
    for (pos, separator) in text[start..end].match_indices("\n\n") {
        let at = start + pos;
        if at > cursor {
            spans.push((cursor, at));
        }
        cursor = at + separator.len();
    }
    if cursor < end {
        spans.push((cursor, end));
    }
    spans
}

/// Shrink `start..end` to exclude surrounding whitespace; `None` if nothing is left.
fn trim_span(text: &str, start: usize, end: usize) -> Option<Span> {
    let slice = &text[start..end];
    let trimmed_start = start + (slice.len() - slice.trim_start().len());
    let trimmed_end = start + slice.trim_end().len();
    (trimmed_start < trimmed_end).then_some((trimmed_start, trimmed_end))
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

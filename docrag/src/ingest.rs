//! Ingestion: source files → chunks → embeddings → persisted snapshot.
//!
//! # Example
//!
//! ```rust,ignore
//! use docrag::{Embedder, EmbeddingConfig, IngestionPipeline};
//!
//! let embedder = Embedder::from_config(&EmbeddingConfig::from_env()?)?;
//! let pipeline = IngestionPipeline::new(embedder);
//! let report = pipeline.ingest("docs".as_ref(), 512, 50, "data/vectors".as_ref()).await?;
//! println!("{} documents, {} chunks", report.documents_processed, report.chunks_created);
//! ```

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::chunking::{Chunker, SemanticChunker};
use crate::config::RagConfig;
use crate::document::{Chunk, ChunkRecord, Document, Metadata};
use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::snapshot::{IndexedChunk, Manifest, Snapshot};

/// Message reported when a run finds nothing to index.
pub const NO_DOCUMENTS: &str = "No documents found";

/// Which files a directory walk picks up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestOptions {
    /// Allowed extensions, lowercase with a leading dot.
    pub extensions: Vec<String>,
    /// Files whose path below the source root contains any of these are skipped.
    pub exclude_patterns: Vec<String>,
    /// Flush floor handed to the semantic chunker.
    pub min_chunk_size: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            extensions: [".md", ".txt", ".rst", ".py", ".ts", ".tsx", ".js", ".jsx", ".rs", ".json"]
                .map(String::from)
                .to_vec(),
            exclude_patterns: ["node_modules", "__pycache__", ".git", "dist", "target", "build", ".venv"]
                .map(String::from)
                .to_vec(),
            min_chunk_size: 100,
        }
    }
}

/// Outcome of one ingestion run.
///
/// An empty corpus is a completed run with a message in `errors`, not an `Err`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestReport {
    /// Distinct source files that contributed at least one chunk.
    pub documents_processed: usize,
    pub chunks_created: usize,
    pub errors: Vec<String>,
}

/// Coarse content category derived from a file extension.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Text,
    Code,
    Json,
}

impl FileType {
    pub fn from_path(path: &Path) -> Self {
        let extension =
            path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).unwrap_or_default();
        match extension.as_str() {
            "py" | "ts" | "tsx" | "js" | "jsx" | "rs" => Self::Code,
            "json" => Self::Json,
            _ => Self::Text,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Code => "code",
            Self::Json => "json",
        }
    }
}

/// Drives chunking, embedding and snapshot persistence for a source tree.
///
/// Runs against the same output directory must be serialized by the caller:
/// each run replaces the snapshot there.
#[derive(Debug, Clone)]
pub struct IngestionPipeline {
    embedder: Embedder,
    options: IngestOptions,
}

impl IngestionPipeline {
    pub fn new(embedder: Embedder) -> Self {
        Self { embedder, options: IngestOptions::default() }
    }

    /// Build the embedder named by `config` and take its `min_chunk_size`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the embedding backend cannot be
    /// constructed.
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        let embedder = Embedder::from_config(&config.embedding)?;
        let options =
            IngestOptions { min_chunk_size: config.min_chunk_size, ..IngestOptions::default() };
        Ok(Self::new(embedder).with_options(options))
    }

    pub fn with_options(mut self, options: IngestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &IngestOptions {
        &self.options
    }

    /// Eligible files under `source`, sorted by path.
    ///
    /// A file path is returned as-is, whatever its extension.
    pub fn discover(&self, source: &Path) -> Vec<PathBuf> {
        if source.is_file() {
            return vec![source.to_path_buf()];
        }

        let mut files: Vec<PathBuf> = WalkDir::new(source)
            .into_iter()
            .filter_entry(|entry| !self.is_excluded(source, entry.path()))
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| self.has_allowed_extension(entry.path()))
            .map(|entry| entry.into_path())
            .collect();
        files.sort();
        files
    }

    fn is_excluded(&self, root: &Path, path: &Path) -> bool {
        let relative = path.strip_prefix(root).unwrap_or(path).to_string_lossy();
        self.options.exclude_patterns.iter().any(|pattern| relative.contains(pattern.as_str()))
    }

    fn has_allowed_extension(&self, path: &Path) -> bool {
        let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        let dotted = format!(".{}", extension.to_ascii_lowercase());
        self.options.extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(&dotted))
    }

    /// Ingest `source` (a file or directory) and write a snapshot to `output`.
    ///
    /// Non-UTF-8 files are skipped with a warning and counted nowhere.
    /// Files that cannot be read are listed in the report's `errors`.
    ///
    /// # Errors
    ///
    /// - [`RagError::ConfigError`] for invalid chunk parameters
    /// - [`RagError::EmbeddingError`] if the embedding backend fails; no
    ///   snapshot is written in that case
    /// - [`RagError::Io`] / [`RagError::SnapshotError`] if persisting fails
    pub async fn ingest(
        &self,
        source: &Path,
        chunk_size: usize,
        chunk_overlap: usize,
        output: &Path,
    ) -> Result<IngestReport> {
        if chunk_overlap >= chunk_size {
            return Err(RagError::ConfigError(format!(
                "chunk_overlap ({chunk_overlap}) must be less than chunk_size ({chunk_size})"
            )));
        }
        let chunker = SemanticChunker::new(chunk_size, self.options.min_chunk_size)?;
        let mut report = IngestReport::default();

        info!(source = %source.display(), chunk_size, chunk_overlap, "starting document ingestion");

        if !source.exists() {
            warn!(source = %source.display(), "source path does not exist");
            report.errors.push(format!("source path does not exist: {}", source.display()));
            report.errors.push(NO_DOCUMENTS.to_string());
            return Ok(report);
        }

        let ingested_at = Utc::now();
        let stamp = ingested_at.to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut chunks: Vec<Chunk> = Vec::new();
        let mut contributing = HashSet::new();

        for path in self.discover(source) {
            let document = match load_document(&path, &stamp) {
                Ok(Some(document)) => document,
                Ok(None) => continue,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to read file");
                    report.errors.push(format!("{}: {e}", path.display()));
                    continue;
                }
            };

            let document_chunks = chunker.chunk(&document);
            debug!(path = %path.display(), chunks = document_chunks.len(), "ingested file");
            if !document_chunks.is_empty() {
                contributing.insert(document.id.clone());
                chunks.extend(document_chunks);
            }
        }

        if chunks.is_empty() {
            warn!(source = %source.display(), "no documents found");
            report.errors.push(NO_DOCUMENTS.to_string());
            return Ok(report);
        }

        info!(total_chunks = chunks.len(), "documents chunked");

        let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        let vectors = self
            .embedder
            .embed(&texts)
            .await
            .inspect_err(|e| error!(error = %e, "embedding failed during ingestion"))?;

        info!(dimensions = self.embedder.dimensions(), "embeddings generated");

        report.documents_processed = contributing.len();
        report.chunks_created = chunks.len();

        let entries = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexedChunk { record: ChunkRecord::from(chunk), vector })
            .collect();
        let manifest = Manifest {
            ingested_at,
            source: source.display().to_string(),
            chunk_size,
            chunk_overlap,
            total_chunks: report.chunks_created,
            embedding_model: self.embedder.model().to_string(),
            dimensions: self.embedder.dimensions(),
        };
        Snapshot::new(manifest, entries)?.persist(output)?;

        info!(
            output = %output.display(),
            documents = report.documents_processed,
            chunks = report.chunks_created,
            "ingestion complete"
        );
        Ok(report)
    }
}

/// Read `path` into a [`Document`]; `None` for blank or non-UTF-8 files.
fn load_document(path: &Path, ingested_at: &str) -> io::Result<Option<Document>> {
    let bytes = fs::read(path)?;
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(_) => {
            warn!(path = %path.display(), "skipping non-UTF-8 file");
            return Ok(None);
        }
    };
    if text.trim().is_empty() {
        return Ok(None);
    }

    let file_type = FileType::from_path(path);
    let mut metadata = Metadata::new();
    metadata.insert("source".to_string(), Value::from(path.display().to_string()));
    metadata.insert("file_type".to_string(), Value::from(file_type.as_str()));
    metadata.insert("size".to_string(), Value::from(text.len()));
    metadata.insert("ingested_at".to_string(), Value::from(ingested_at));

    Ok(Some(Document {
        id: document_id(path),
        text,
        metadata,
        source_uri: Some(path.display().to_string()),
    }))
}

/// First 12 hex digits of the SHA-256 of the canonical path.
pub fn document_id(path: &Path) -> String {
    let canonical = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let digest = Sha256::digest(canonical.to_string_lossy().as_bytes());
    format!("{digest:x}").chars().take(12).collect()
}

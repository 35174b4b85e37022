//! Configuration for ingestion, embedding and retrieval.
//!
//! Configuration is a plain value threaded through constructors. The only
//! environment lookup lives in [`EmbeddingConfig::from_env`], which is meant
//! to be called once at the edge of the program.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Default number of texts sent to a provider in one call.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Which embedding backend produces vectors.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Hosted OpenAI embeddings API (requires the `openai` feature).
    #[default]
    OpenAi,
    /// In-process feature-hashing model; no network access.
    Local,
}

impl EmbeddingBackend {
    /// The model used when none is configured explicitly.
    pub fn default_model(self) -> &'static str {
        match self {
            Self::OpenAi => "text-embedding-3-small",
            Self::Local => crate::hashing::HASHING_MODEL,
        }
    }
}

impl fmt::Display for EmbeddingBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenAi => f.write_str("openai"),
            Self::Local => f.write_str("local"),
        }
    }
}

impl FromStr for EmbeddingBackend {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "local" => Ok(Self::Local),
            other => Err(RagError::ConfigError(format!(
                "unknown embedding backend '{other}' (expected 'openai' or 'local')"
            ))),
        }
    }
}

/// Embedding backend selection and batching parameters.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    pub model: String,
    pub batch_size: usize,
    /// Overrides the model's native dimensionality when the backend allows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

impl fmt::Debug for EmbeddingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingConfig")
            .field("backend", &self.backend)
            .field("model", &self.model)
            .field("batch_size", &self.batch_size)
            .field("dimensions", &self.dimensions)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self::for_backend(EmbeddingBackend::default())
    }
}

impl EmbeddingConfig {
    /// Config for `backend` with that backend's default model.
    pub fn for_backend(backend: EmbeddingBackend) -> Self {
        Self {
            backend,
            model: backend.default_model().to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            dimensions: None,
            api_key: None,
        }
    }

    /// The offline hashing backend, used by tests and air-gapped deployments.
    pub fn local() -> Self {
        Self::for_backend(EmbeddingBackend::Local)
    }

    /// Read embedding settings from the environment.
    ///
    /// | variable | meaning |
    /// |---|---|
    /// | `DOCRAG_EMBEDDING_BACKEND` | `openai` (default) or `local` |
    /// | `DOCRAG_EMBEDDING_MODEL` | model name, defaults per backend |
    /// | `DOCRAG_EMBEDDING_BATCH_SIZE` | texts per provider call |
    /// | `OPENAI_API_KEY` | key for the `openai` backend |
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] for an unknown backend or an
    /// unparsable batch size.
    pub fn from_env() -> Result<Self> {
        let backend = match std::env::var("DOCRAG_EMBEDDING_BACKEND") {
            Ok(value) => value.parse()?,
            Err(_) => EmbeddingBackend::default(),
        };
        let mut config = Self::for_backend(backend);
        if let Ok(model) = std::env::var("DOCRAG_EMBEDDING_MODEL") {
            if !model.trim().is_empty() {
                config.model = model.trim().to_string();
            }
        }
        if let Ok(batch) = std::env::var("DOCRAG_EMBEDDING_BATCH_SIZE") {
            config.batch_size = batch.trim().parse().map_err(|_| {
                RagError::ConfigError(format!("DOCRAG_EMBEDDING_BATCH_SIZE is not a number: {batch}"))
            })?;
        }
        config.api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
        config.validate()?;
        Ok(config)
    }

    /// Check that batching parameters are usable.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if `batch_size` or an explicit
    /// `dimensions` override is zero, or the model name is empty.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(RagError::ConfigError("batch_size must be greater than zero".to_string()));
        }
        if self.dimensions == Some(0) {
            return Err(RagError::ConfigError("dimensions must be greater than zero".to_string()));
        }
        if self.model.trim().is_empty() {
            return Err(RagError::ConfigError("embedding model must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Configuration parameters shared by ingestion and retrieval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Overlap between consecutive fixed-size chunks, in characters.
    pub chunk_overlap: usize,
    /// Semantic chunker only flushes buffers at least this long.
    pub min_chunk_size: usize,
    /// Default number of results per query.
    pub top_k: usize,
    /// Results with a similarity below this are dropped.
    pub similarity_threshold: f32,
    /// Whether queries rerank by default.
    pub rerank: bool,
    /// Score added per query term found in a candidate during reranking.
    pub rerank_boost: f32,
    /// Weight of semantic similarity in hybrid fusion; keyword gets the rest.
    pub semantic_weight: f32,
    pub embedding: EmbeddingConfig,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            chunk_overlap: 50,
            min_chunk_size: 100,
            top_k: 5,
            similarity_threshold: 0.0,
            rerank: true,
            rerank_boost: 0.05,
            semantic_weight: 0.7,
            embedding: EmbeddingConfig::default(),
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// The retrieval-time subset of this configuration.
    pub fn retrieval_settings(&self) -> RetrievalSettings {
        RetrievalSettings { rerank_boost: self.rerank_boost, semantic_weight: self.semantic_weight }
    }
}

/// Tunable scoring heuristics used by the [`Retriever`](crate::Retriever).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RetrievalSettings {
    pub rerank_boost: f32,
    pub semantic_weight: f32,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        RagConfig::default().retrieval_settings()
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    pub fn min_chunk_size(mut self, size: usize) -> Self {
        self.config.min_chunk_size = size;
        self
    }

    /// Set the default number of results per query.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the minimum similarity threshold for filtering results.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = threshold;
        self
    }

    pub fn rerank(mut self, rerank: bool) -> Self {
        self.config.rerank = rerank;
        self
    }

    pub fn rerank_boost(mut self, boost: f32) -> Self {
        self.config.rerank_boost = boost;
        self
    }

    pub fn semantic_weight(mut self, weight: f32) -> Self {
        self.config.semantic_weight = weight;
        self
    }

    pub fn embedding(mut self, embedding: EmbeddingConfig) -> Self {
        self.config.embedding = embedding;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if:
    /// - `chunk_size == 0` or `chunk_overlap >= chunk_size`
    /// - `top_k == 0`
    /// - `semantic_weight` is outside `[0, 1]`
    /// - `rerank_boost` is negative or not finite
    /// - the embedding config is invalid
    pub fn build(self) -> Result<RagConfig> {
        let config = self.config;
        if config.chunk_size == 0 {
            return Err(RagError::ConfigError("chunk_size must be greater than zero".to_string()));
        }
        if config.chunk_overlap >= config.chunk_size {
            return Err(RagError::ConfigError(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                config.chunk_overlap, config.chunk_size
            )));
        }
        if config.top_k == 0 {
            return Err(RagError::ConfigError("top_k must be greater than zero".to_string()));
        }
        validate_semantic_weight(config.semantic_weight)?;
        validate_rerank_boost(config.rerank_boost)?;
        config.embedding.validate()?;
        Ok(config)
    }
}

pub(crate) fn validate_semantic_weight(weight: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&weight) {
        return Err(RagError::ConfigError(format!(
            "semantic_weight must be within [0, 1], got {weight}"
        )));
    }
    Ok(())
}

/// A negative boost would demote keyword matches below unmatched chunks.
pub(crate) fn validate_rerank_boost(boost: f32) -> Result<()> {
    if !boost.is_finite() || boost < 0.0 {
        return Err(RagError::ConfigError(format!(
            "rerank_boost must be a finite, non-negative number, got {boost}"
        )));
    }
    Ok(())
}

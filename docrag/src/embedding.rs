//! Embedding providers and the batching [`Embedder`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::error::{RagError, Result};
use crate::hashing::HashingEmbeddingProvider;

/// A provider that generates vector embeddings from text input.
///
/// Implementations wrap specific embedding backends behind a unified async
/// interface. The default [`embed_batch`](EmbeddingProvider::embed_batch)
/// implementation calls [`embed`](EmbeddingProvider::embed) sequentially;
/// backends that support native batching should override it.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for a single text input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embedding vectors for a batch of text inputs, in input order.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// Return the model name recorded in snapshot manifests.
    fn model(&self) -> &str;
}

/// Batches texts through an [`EmbeddingProvider`] and enforces alignment.
///
/// `embed(texts)` always returns exactly one vector per input, in input
/// order, each of length [`dimensions`](Embedder::dimensions) with only
/// finite components. A failing
/// batch aborts the whole call; no partial result is returned.
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
}

impl fmt::Debug for Embedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Embedder")
            .field("model", &self.provider.model())
            .field("dimensions", &self.provider.dimensions())
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl Embedder {
    /// Wrap an arbitrary provider.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if `batch_size` is zero.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(RagError::ConfigError("batch_size must be greater than zero".to_string()));
        }
        Ok(Self { provider, batch_size })
    }

    /// Construct the backend named by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the configuration is invalid or
    /// names a backend that was not compiled in.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        config.validate()?;
        let provider: Arc<dyn EmbeddingProvider> = match config.backend {
            EmbeddingBackend::Local => {
                let dimensions =
                    config.dimensions.unwrap_or(crate::hashing::DEFAULT_HASHING_DIMENSIONS);
                Arc::new(HashingEmbeddingProvider::new(dimensions)?.with_model(&config.model))
            }
            EmbeddingBackend::OpenAi => openai_provider(config)?,
        };
        Self::new(provider, config.batch_size)
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Embed `texts` in batches of at most `batch_size`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmbeddingError`] if any batch fails, returns a
    /// vector count or dimensionality that does not match the request, or
    /// returns a NaN or infinite component.
    pub async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let dimensions = self.provider.dimensions();
        let mut vectors = Vec::with_capacity(texts.len());

        for (batch_index, batch) in texts.chunks(self.batch_size).enumerate() {
            debug!(
                model = self.provider.model(),
                batch_index,
                batch_size = batch.len(),
                "embedding batch"
            );
            let embedded = self.provider.embed_batch(batch).await?;

            if embedded.len() != batch.len() {
                error!(expected = batch.len(), actual = embedded.len(), "embedding count mismatch");
                return Err(RagError::EmbeddingError {
                    provider: self.provider.model().to_string(),
                    message: format!(
                        "batch {batch_index} returned {} vectors for {} inputs",
                        embedded.len(),
                        batch.len()
                    ),
                });
            }
            if let Some(bad) = embedded.iter().find(|v| v.len() != dimensions) {
                error!(expected = dimensions, actual = bad.len(), "embedding dimension mismatch");
                return Err(RagError::EmbeddingError {
                    provider: self.provider.model().to_string(),
                    message: format!(
                        "batch {batch_index} returned a {}-dimensional vector, expected {dimensions}",
                        bad.len()
                    ),
                });
            }
            if let Some(position) =
                embedded.iter().position(|v| v.iter().any(|x| !x.is_finite()))
            {
                error!(batch_index, position, "embedding contains non-finite values");
                return Err(RagError::EmbeddingError {
                    provider: self.provider.model().to_string(),
                    message: format!(
                        "batch {batch_index} returned a non-finite value for input {position}"
                    ),
                });
            }

            vectors.extend(embedded);
        }

        Ok(vectors)
    }

    /// Embed a single query string.
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.embed(&[query]).await?.into_iter().next().ok_or_else(|| RagError::EmbeddingError {
            provider: self.provider.model().to_string(),
            message: "provider returned no vector for the query".to_string(),
        })
    }
}

#[cfg(feature = "openai")]
fn openai_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    use crate::openai::OpenAIEmbeddingProvider;

    let api_key = config.api_key.clone().ok_or_else(|| {
        RagError::ConfigError("the openai backend requires an API key (OPENAI_API_KEY)".to_string())
    })?;
    let mut provider = OpenAIEmbeddingProvider::new(api_key)?.with_model(&config.model);
    if let Some(dimensions) = config.dimensions {
        provider = provider.with_dimensions(dimensions);
    }
    Ok(Arc::new(provider))
}

#[cfg(not(feature = "openai"))]
fn openai_provider(_config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    Err(RagError::ConfigError(
        "the openai backend is not available; rebuild docrag with the `openai` feature".to_string(),
    ))
}

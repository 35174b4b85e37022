//! Hosted embeddings through the OpenAI `/v1/embeddings` endpoint.
//!
//! Only compiled with the `openai` feature.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";
const PROVIDER: &str = "OpenAI";

pub const DEFAULT_OPENAI_MODEL: &str = "text-embedding-3-small";

/// Native output size of an embedding model.
///
/// `text-embedding-3-small` and `text-embedding-ada-002` produce 1536
/// components, as does any model not listed.
pub fn model_dimensions(model: &str) -> usize {
    match model {
        "text-embedding-3-large" => 3072,
        _ => 1536,
    }
}

/// An [`EmbeddingProvider`] backed by the OpenAI embeddings API.
///
/// The whole batch is sent in one request; response items are reordered by
/// their `index` field so vectors always line up with the inputs.
///
/// # Example
///
/// ```rust,ignore
/// use docrag::openai::OpenAIEmbeddingProvider;
///
/// let provider = OpenAIEmbeddingProvider::new("sk-...")?.with_model("text-embedding-3-large");
/// assert_eq!(provider.dimensions(), 3072);
/// ```
pub struct OpenAIEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimensions: usize,
    /// Sent to the API for Matryoshka truncation when set.
    request_dimensions: Option<usize>,
}

impl OpenAIEmbeddingProvider {
    /// Create a provider for the default model.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmbeddingError`] if `api_key` is empty.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(embedding_error("API key must not be empty"));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model: DEFAULT_OPENAI_MODEL.to_string(),
            dimensions: model_dimensions(DEFAULT_OPENAI_MODEL),
            request_dimensions: None,
        })
    }

    /// Select the model; dimensions follow the model unless overridden.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        if self.request_dimensions.is_none() {
            self.dimensions = model_dimensions(&self.model);
        }
        self
    }

    /// Request truncated embeddings of `dims` components.
    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.dimensions = dims;
        self.request_dimensions = Some(dims);
        self
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

fn embedding_error(message: impl Into<String>) -> RagError {
    RagError::EmbeddingError { provider: PROVIDER.to_string(), message: message.into() }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| embedding_error("API returned empty response"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(provider = PROVIDER, batch_size = texts.len(), model = %self.model, "embedding batch");

        let request_body = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.request_dimensions,
        };

        let response = self
            .client
            .post(OPENAI_EMBEDDINGS_URL)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| {
                error!(provider = PROVIDER, error = %e, "request failed");
                embedding_error(format!("request failed: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);

            error!(provider = PROVIDER, %status, "API error");
            return Err(embedding_error(format!("API returned {status}: {detail}")));
        }

        let mut parsed: EmbeddingResponse = response.json().await.map_err(|e| {
            error!(provider = PROVIDER, error = %e, "failed to parse response");
            embedding_error(format!("failed to parse response: {e}"))
        })?;

        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_is_rejected() {
        assert!(matches!(
            OpenAIEmbeddingProvider::new(""),
            Err(RagError::EmbeddingError { .. })
        ));
    }

    #[test]
    fn dimensions_follow_model_unless_overridden() {
        let provider = OpenAIEmbeddingProvider::new("sk-test").unwrap();
        assert_eq!(provider.dimensions(), 1536);

        let large =
            OpenAIEmbeddingProvider::new("sk-test").unwrap().with_model("text-embedding-3-large");
        assert_eq!(large.dimensions(), 3072);
        assert_eq!(large.model(), "text-embedding-3-large");

        let truncated = OpenAIEmbeddingProvider::new("sk-test")
            .unwrap()
            .with_dimensions(256)
            .with_model("text-embedding-3-large");
        assert_eq!(truncated.dimensions(), 256);
    }

    #[test]
    fn response_items_are_reordered_by_index() {
        let body = r#"{"data":[{"index":1,"embedding":[2.0]},{"index":0,"embedding":[1.0]}]}"#;
        let mut parsed: EmbeddingResponse = serde_json::from_str(body).unwrap();
        parsed.data.sort_by_key(|d| d.index);
        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
        assert_eq!(vectors, vec![vec![1.0], vec![2.0]]);
    }
}

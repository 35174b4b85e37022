//! Local feature-hashing embedding provider.
//!
//! Maps each lowercase word token to one of `dimensions` buckets with a
//! signed FNV-1a hash and L2-normalizes the result. Texts sharing words end
//! up close together, which is enough for offline use and for tests. The
//! vectors are a pure function of the text, so snapshots built in one
//! process can be queried from another.

use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::keyword::tokenize;

/// Model name recorded in manifests for this provider.
pub const HASHING_MODEL: &str = "feature-hash-v1";

pub const DEFAULT_HASHING_DIMENSIONS: usize = 384;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// An [`EmbeddingProvider`] that runs entirely in process.
#[derive(Debug, Clone)]
pub struct HashingEmbeddingProvider {
    dimensions: usize,
    model: String,
}

impl HashingEmbeddingProvider {
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if `dimensions` is zero.
    pub fn new(dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(RagError::ConfigError("dimensions must be greater than zero".to_string()));
        }
        Ok(Self { dimensions, model: HASHING_MODEL.to_string() })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in tokenize(text) {
            let hash = fnv1a(token.as_bytes());
            let bucket = (hash % self.dimensions as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, &b| (hash ^ u64::from(b)).wrapping_mul(FNV_PRIME))
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vectorize(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.vectorize(text)).collect())
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

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn vectors_are_normalized_and_deterministic() {
        let provider = HashingEmbeddingProvider::new(64).unwrap();
        let a = provider.vectorize("Rust ownership and borrowing");
        let b = provider.vectorize("rust OWNERSHIP and borrowing!");
        assert_eq!(a, b);
        assert!((dot(&a, &a) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn shared_words_score_higher_than_disjoint_words() {
        let provider = HashingEmbeddingProvider::new(256).unwrap();
        let query = provider.vectorize("vector index persistence");
        let related = provider.vectorize("the vector index supports persistence to disk");
        let unrelated = provider.vectorize("bananas grow in tropical climates");
        assert!(dot(&query, &related) > dot(&query, &unrelated));
    }

    #[test]
    fn blank_text_embeds_to_zero_vector() {
        let provider = HashingEmbeddingProvider::new(8).unwrap();
        assert!(provider.vectorize("  ...  ").iter().all(|x| *x == 0.0));
    }

    #[test]
    fn zero_dimensions_rejected() {
        assert!(HashingEmbeddingProvider::new(0).is_err());
    }
}

//! Error types for the `docrag` crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in ingestion and retrieval.
#[derive(Debug, Error)]
pub enum RagError {
    /// An error occurred during embedding generation.
    #[error("Embedding error ({provider}): {message}")]
    EmbeddingError {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The flat index rejected a build or search request.
    #[error("Index error: {0}")]
    IndexError(String),

    /// A snapshot on disk could not be read or is inconsistent.
    #[error("Snapshot error ({}): {message}", path.display())]
    SnapshotError {
        /// The snapshot file or directory involved.
        path: PathBuf,
        /// A description of the failure.
        message: String,
    },

    /// Retrieval was attempted before any snapshot was loaded.
    #[error("Index not loaded: no snapshot found at {}", path.display())]
    IndexNotLoaded {
        /// The vector path the retriever was opened on.
        path: PathBuf,
    },

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;

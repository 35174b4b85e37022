//! Retrieval-augmented generation over local document trees.
//!
//! This crate provides:
//! - Fixed-size, heading-aware and code-aware chunking
//! - Batched embedding behind the [`EmbeddingProvider`] trait
//! - An exact flat L2 index persisted as a self-describing snapshot
//! - An ingestion pipeline that walks a file or directory into a snapshot
//! - Semantic, keyword and hybrid retrieval with lexical reranking
//!
//! # Quick start
//!
//! ```rust,ignore
//! use docrag::{Embedder, EmbeddingConfig, IngestionPipeline, RetrievalSettings, Retriever};
//!
//! let embedder = Embedder::from_config(&EmbeddingConfig::local())?;
//! let report = IngestionPipeline::new(embedder.clone())
//!     .ingest("docs".as_ref(), 512, 50, "data/vectors".as_ref())
//!     .await?;
//!
//! let retriever = Retriever::open("data/vectors", embedder, RetrievalSettings::default())?;
//! for result in retriever.retrieve("how are snapshots written?", 5, 0.0, true).await? {
//!     println!("{:.3} {}", result.score, result.id);
//! }
//! ```
//!
//! # Feature flags
//!
//! | Feature  | Enables |
//! |----------|---------|
//! | `openai` | [`openai::OpenAIEmbeddingProvider`] and the `openai` embedding backend |

pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod hashing;
pub mod index;
pub mod ingest;
pub mod keyword;
#[cfg(feature = "openai")]
pub mod openai;
pub mod reranker;
pub mod retriever;
pub mod snapshot;

pub use chunking::{
    Chunker, ChunkingParams, ChunkingStrategy, CodeAwareChunker, FixedSizeChunker,
    SemanticChunker,
};
pub use config::{
    EmbeddingBackend, EmbeddingConfig, RagConfig, RagConfigBuilder, RetrievalSettings,
};
pub use document::{Chunk, ChunkRecord, Document, Metadata, RetrievalResult};
pub use embedding::{Embedder, EmbeddingProvider};
pub use error::{RagError, Result};
pub use hashing::HashingEmbeddingProvider;
pub use index::{FlatL2Index, Neighbor, similarity};
pub use ingest::{FileType, IngestOptions, IngestReport, IngestionPipeline};
pub use reranker::KeywordBoostReranker;
pub use retriever::{Retriever, RetrieverStats};
pub use snapshot::{IndexedChunk, Manifest, Snapshot};

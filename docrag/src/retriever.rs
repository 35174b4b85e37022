//! Query-time retrieval over a loaded [`Snapshot`].
//!
//! The [`Retriever`] embeds a query, searches the flat index, converts
//! distances to similarities and optionally reranks the candidates by
//! literal term overlap. [`Retriever::retrieve_hybrid`] fuses semantic
//! similarity with a keyword score.
//!
//! # Example
//!
//! ```rust,ignore
//! use docrag::{Embedder, EmbeddingConfig, RetrievalSettings, Retriever};
//!
//! let embedder = Embedder::from_config(&EmbeddingConfig::local())?;
//! let retriever = Retriever::open("data/vectors", embedder, RetrievalSettings::default())?;
//! let results = retriever.retrieve("how are snapshots written?", 5, 0.0, true).await?;
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{RetrievalSettings, validate_rerank_boost, validate_semantic_weight};
use crate::document::RetrievalResult;
use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::index::similarity;
use crate::keyword::keyword_scores;
use crate::reranker::KeywordBoostReranker;
use crate::snapshot::Snapshot;

/// Candidates fetched per requested result when reranking.
const RERANK_OVERFETCH: usize = 3;
/// Candidates fetched per requested result by each hybrid leg.
const HYBRID_OVERFETCH: usize = 2;

/// Read-only description of the loaded snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrieverStats {
    pub total_chunks: usize,
    pub embedding_model: String,
    pub dimensions: usize,
    pub vector_path: String,
    /// When the loaded snapshot was ingested; `None` if nothing is loaded.
    pub last_updated: Option<DateTime<Utc>>,
}

impl RetrieverStats {
    /// Describe a snapshot read from `vector_path`, no embedder required.
    pub fn from_snapshot(snapshot: &Snapshot, vector_path: &Path) -> Self {
        Self {
            total_chunks: snapshot.len(),
            embedding_model: snapshot.manifest().embedding_model.clone(),
            dimensions: snapshot.dimensions(),
            vector_path: vector_path.display().to_string(),
            last_updated: Some(snapshot.manifest().ingested_at),
        }
    }
}

/// Answers queries against one immutable snapshot.
///
/// The snapshot is never mutated after construction, so a `Retriever` can
/// be shared behind an `Arc` and queried concurrently.
#[derive(Debug)]
pub struct Retriever {
    embedder: Embedder,
    snapshot: Option<Snapshot>,
    vector_path: PathBuf,
    settings: RetrievalSettings,
}

impl Retriever {
    /// Open the snapshot at `vector_path`.
    ///
    /// A missing snapshot is not an error: the retriever is created in the
    /// not-loaded state and every query returns [`RagError::IndexNotLoaded`].
    ///
    /// # Errors
    ///
    /// - [`RagError::SnapshotError`] if the snapshot exists but is invalid
    /// - [`RagError::ConfigError`] if `embedder` produces vectors of a
    ///   different dimensionality than the snapshot, or `settings` is invalid
    ///   (a semantic weight outside `[0, 1]` or a negative rerank boost)
    pub fn open(
        vector_path: impl Into<PathBuf>,
        embedder: Embedder,
        settings: RetrievalSettings,
    ) -> Result<Self> {
        let vector_path = vector_path.into();
        let snapshot = Snapshot::load(&vector_path)?;
        if snapshot.is_none() {
            warn!(path = %vector_path.display(), "index file not found; retriever not initialized");
        }
        Self::assemble(vector_path, snapshot, embedder, settings)
    }

    /// Build a retriever around an in-memory snapshot.
    pub fn from_snapshot(
        snapshot: Snapshot,
        embedder: Embedder,
        settings: RetrievalSettings,
    ) -> Result<Self> {
        Self::assemble(PathBuf::new(), Some(snapshot), embedder, settings)
    }

    fn assemble(
        vector_path: PathBuf,
        snapshot: Option<Snapshot>,
        embedder: Embedder,
        settings: RetrievalSettings,
    ) -> Result<Self> {
        validate_semantic_weight(settings.semantic_weight)?;
        validate_rerank_boost(settings.rerank_boost)?;

        if let Some(snapshot) = &snapshot {
            let manifest = snapshot.manifest();
            if manifest.dimensions != embedder.dimensions() {
                return Err(RagError::ConfigError(format!(
                    "snapshot holds {}-dimensional '{}' embeddings, embedder produces {}",
                    manifest.dimensions,
                    manifest.embedding_model,
                    embedder.dimensions()
                )));
            }
            if manifest.embedding_model != embedder.model() {
                warn!(
                    snapshot_model = %manifest.embedding_model,
                    embedder_model = embedder.model(),
                    "embedding model differs from the one used at ingestion"
                );
            }
            info!(
                chunks = snapshot.len(),
                dimensions = snapshot.dimensions(),
                "retriever index loaded"
            );
        }

        Ok(Self { embedder, snapshot, vector_path, settings })
    }

    pub fn is_loaded(&self) -> bool {
        self.snapshot.is_some()
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    pub fn settings(&self) -> RetrievalSettings {
        self.settings
    }

    pub fn vector_path(&self) -> &Path {
        &self.vector_path
    }

    fn loaded(&self) -> Result<&Snapshot> {
        self.snapshot
            .as_ref()
            .ok_or_else(|| RagError::IndexNotLoaded { path: self.vector_path.clone() })
    }

    /// Retrieve up to `top_k` chunks with similarity at least `threshold`.
    ///
    /// With `rerank`, `3 * top_k` candidates are fetched and, when more than
    /// `top_k` pass the threshold, reordered by [`KeywordBoostReranker`]
    /// before truncation. Results are sorted by descending score.
    ///
    /// # Errors
    ///
    /// - [`RagError::IndexNotLoaded`] if no snapshot is loaded
    /// - [`RagError::ConfigError`] if `top_k` is zero
    /// - [`RagError::EmbeddingError`] if the query cannot be embedded
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        threshold: f32,
        rerank: bool,
    ) -> Result<Vec<RetrievalResult>> {
        let snapshot = self.loaded()?;
        check_top_k(top_k)?;

        let query_vector = self.embedder.embed_query(query).await?;
        let search_k = if rerank { top_k.saturating_mul(RERANK_OVERFETCH) } else { top_k };
        let mut results = semantic_candidates(snapshot, &query_vector, search_k, threshold)?;
        debug!(search_k, candidates = results.len(), "vector search complete");

        if rerank && results.len() > top_k {
            results = KeywordBoostReranker::new(self.settings.rerank_boost).rerank(query, results);
        }
        results.truncate(top_k);

        info!(top_k, rerank, result_count = results.len(), "retrieval completed");
        Ok(results)
    }

    /// Score every chunk by the fraction of query words it contains.
    ///
    /// Chunks matching no query word are excluded; at most `limit` results
    /// are returned, best first.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexNotLoaded`] if no snapshot is loaded.
    pub fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<RetrievalResult>> {
        let snapshot = self.loaded()?;
        let records = snapshot.records();
        Ok(keyword_scores(query, records, limit)
            .into_iter()
            .map(|(position, score)| RetrievalResult::from_record(&records[position], score))
            .collect())
    }

    /// Fuse semantic and keyword retrieval by chunk id.
    ///
    /// Each leg fetches `2 * top_k` candidates. A chunk's fused score is
    /// `similarity * w + keyword * (1 - w)`, where a leg that did not return
    /// the chunk contributes zero. `threshold` filters the semantic leg only.
    /// `semantic_weight` defaults to the configured weight; a leg whose
    /// weight is zero is skipped entirely, so `1.0` is pure semantic and
    /// `0.0` pure keyword ranking.
    ///
    /// # Errors
    ///
    /// As [`retrieve`](Retriever::retrieve), plus [`RagError::ConfigError`]
    /// for a weight outside `[0, 1]`.
    pub async fn retrieve_hybrid(
        &self,
        query: &str,
        top_k: usize,
        threshold: f32,
        semantic_weight: Option<f32>,
    ) -> Result<Vec<RetrievalResult>> {
        let snapshot = self.loaded()?;
        check_top_k(top_k)?;
        let semantic_weight = semantic_weight.unwrap_or(self.settings.semantic_weight);
        validate_semantic_weight(semantic_weight)?;
        let keyword_weight = 1.0 - semantic_weight;
        let candidate_k = top_k.saturating_mul(HYBRID_OVERFETCH);

        let mut fused: Vec<RetrievalResult> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        if semantic_weight > 0.0 {
            let query_vector = self.embedder.embed_query(query).await?;
            let candidates = semantic_candidates(snapshot, &query_vector, candidate_k, threshold)?;
            for mut result in candidates {
                result.score *= semantic_weight;
                positions.insert(result.id.clone(), fused.len());
                fused.push(result);
            }
        }

        if keyword_weight > 0.0 {
            for mut result in self.keyword_search(query, candidate_k)? {
                let contribution = result.score * keyword_weight;
                match positions.get(&result.id) {
                    Some(&position) => fused[position].score += contribution,
                    None => {
                        result.score = contribution;
                        positions.insert(result.id.clone(), fused.len());
                        fused.push(result);
                    }
                }
            }
        }

        fused.sort_by(|a, b| b.score.total_cmp(&a.score));
        fused.truncate(top_k);

        info!(top_k, semantic_weight, result_count = fused.len(), "hybrid retrieval completed");
        Ok(fused)
    }

    /// Describe the loaded snapshot without side effects.
    pub fn stats(&self) -> RetrieverStats {
        match &self.snapshot {
            Some(snapshot) => RetrieverStats::from_snapshot(snapshot, &self.vector_path),
            None => RetrieverStats {
                total_chunks: 0,
                embedding_model: self.embedder.model().to_string(),
                dimensions: 0,
                vector_path: self.vector_path.display().to_string(),
                last_updated: None,
            },
        }
    }
}

fn check_top_k(top_k: usize) -> Result<()> {
    if top_k == 0 {
        return Err(RagError::ConfigError("top_k must be greater than zero".to_string()));
    }
    Ok(())
}

/// Nearest `k` chunks as results scored by similarity, below-threshold dropped.
fn semantic_candidates(
    snapshot: &Snapshot,
    query_vector: &[f32],
    k: usize,
    threshold: f32,
) -> Result<Vec<RetrievalResult>> {
    Ok(snapshot
        .search(query_vector, k)?
        .into_iter()
        .filter_map(|hit| {
            let score = similarity(hit.distance);
            (score >= threshold).then(|| RetrievalResult::from_record(hit.record, score))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingConfig;
    use crate::document::ChunkRecord;
    use crate::snapshot::{IndexedChunk, Manifest};

    fn embedder() -> Embedder {
        let mut config = EmbeddingConfig::local();
        config.dimensions = Some(128);
        Embedder::from_config(&config).unwrap()
    }

    async fn retriever(contents: &[&str]) -> Retriever {
        let embedder = embedder();
        let vectors = embedder.embed(contents).await.unwrap();
        let entries = contents
            .iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (content, vector))| IndexedChunk {
                record: ChunkRecord {
                    id: format!("c{i}"),
                    content: content.to_string(),
                    metadata: Default::default(),
                },
                vector,
            })
            .collect();
        let manifest = Manifest {
            ingested_at: Utc::now(),
            source: "memory".to_string(),
            chunk_size: 512,
            chunk_overlap: 50,
            total_chunks: 0,
            embedding_model: embedder.model().to_string(),
            dimensions: embedder.dimensions(),
        };
        let snapshot = Snapshot::new(manifest, entries).unwrap();
        Retriever::from_snapshot(snapshot, embedder, RetrievalSettings::default()).unwrap()
    }

    const CORPUS: &[&str] = &[
        "flat index search computes exact distances",
        "snapshots are written atomically to disk",
        "the chunker splits markdown at headings",
        "bananas and mangoes are tropical fruit",
    ];

    #[tokio::test]
    async fn unloaded_retriever_reports_index_not_loaded() {
        let temp = tempfile::tempdir().unwrap();
        let retriever =
            Retriever::open(temp.path().join("none"), embedder(), RetrievalSettings::default())
                .unwrap();
        assert!(!retriever.is_loaded());

        let err = retriever.retrieve("query", 3, 0.0, false).await.unwrap_err();
        assert!(matches!(err, RagError::IndexNotLoaded { .. }));
        assert!(retriever.keyword_search("query", 3).is_err());

        let stats = retriever.stats();
        assert_eq!(stats.total_chunks, 0);
        assert_eq!(stats.dimensions, 0);
        assert!(stats.last_updated.is_none());
    }

    #[tokio::test]
    async fn best_match_ranks_first() {
        let retriever = retriever(CORPUS).await;
        let results =
            retriever.retrieve("how are snapshots written to disk", 2, 0.0, false).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "c1");
        assert!(results[0].score >= results[1].score);
        assert!(results.iter().all(|r| r.score > 0.0 && r.score <= 1.0));
    }

    #[tokio::test]
    async fn top_k_larger_than_index_returns_everything() {
        let retriever = retriever(&CORPUS[..2]).await;
        for rerank in [false, true] {
            let results = retriever.retrieve("index", 5, 0.0, rerank).await.unwrap();
            assert_eq!(results.len(), 2);
        }
    }

    #[tokio::test]
    async fn threshold_filters_low_similarity() {
        let retriever = retriever(CORPUS).await;
        let results = retriever.retrieve("tropical fruit", 4, 0.99, false).await.unwrap();
        assert!(results.iter().all(|r| r.score >= 0.99));
        assert!(results.len() < 4);
    }

    #[tokio::test]
    async fn rerank_boosts_literal_matches() {
        let retriever = retriever(CORPUS).await;
        let results = retriever.retrieve("chunker markdown headings", 1, 0.0, true).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "c2");
        let unboosted = retriever.retrieve("chunker markdown headings", 1, 0.0, false).await.unwrap();
        assert!((results[0].score - unboosted[0].score - 0.15).abs() < 1e-5);
    }

    #[tokio::test]
    async fn zero_top_k_is_rejected() {
        let retriever = retriever(CORPUS).await;
        let err = retriever.retrieve("anything", 0, 0.0, true).await.unwrap_err();
        assert!(matches!(err, RagError::ConfigError(_)));
    }

    #[tokio::test]
    async fn keyword_search_scores_term_fraction() {
        let retriever = retriever(CORPUS).await;
        let results = retriever.keyword_search("exact distances everywhere", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "c0");
        assert!((results[0].score - 2.0 / 3.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn hybrid_weight_boundaries() {
        let retriever = retriever(CORPUS).await;
        let query = "markdown headings and tropical fruit";

        let semantic = retriever.retrieve(query, 3, 0.0, false).await.unwrap();
        let hybrid_semantic = retriever.retrieve_hybrid(query, 3, 0.0, Some(1.0)).await.unwrap();
        let ids = |rs: &[RetrievalResult]| rs.iter().map(|r| r.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&hybrid_semantic), ids(&semantic));

        let keyword = retriever.keyword_search(query, 3).unwrap();
        let hybrid_keyword = retriever.retrieve_hybrid(query, 3, 0.0, Some(0.0)).await.unwrap();
        assert_eq!(ids(&hybrid_keyword), ids(&keyword));
    }

    #[tokio::test]
    async fn hybrid_fuses_both_legs() {
        let retriever = retriever(CORPUS).await;
        let results = retriever.retrieve_hybrid("tropical fruit", 2, 0.0, None).await.unwrap();
        assert_eq!(results[0].id, "c3");
        // Semantic similarity is at most 1 and keyword score is 1 for c3.
        assert!(results[0].score > 0.3 && results[0].score <= 1.0 + 1e-6);
        assert!(retriever.retrieve_hybrid("x", 2, 0.0, Some(1.2)).await.is_err());
    }

    #[tokio::test]
    async fn stats_describe_loaded_snapshot() {
        let retriever = retriever(CORPUS).await;
        let stats = retriever.stats();
        assert_eq!(stats.total_chunks, 4);
        assert_eq!(stats.dimensions, 128);
        assert_eq!(stats.embedding_model, crate::hashing::HASHING_MODEL);
        assert!(stats.last_updated.is_some());
    }

    #[tokio::test]
    async fn stats_need_only_the_snapshot_on_disk() {
        let temp = tempfile::tempdir().unwrap();
        let retriever = retriever(CORPUS).await;
        retriever.snapshot().unwrap().persist(temp.path()).unwrap();

        let snapshot = Snapshot::load(temp.path()).unwrap().unwrap();
        let stats = RetrieverStats::from_snapshot(&snapshot, temp.path());
        assert_eq!(stats.total_chunks, 4);
        assert_eq!(stats.dimensions, 128);
        assert_eq!(stats.vector_path, temp.path().display().to_string());

        let opened =
            Retriever::open(temp.path(), embedder(), RetrievalSettings::default()).unwrap();
        assert_eq!(opened.stats(), stats);
    }

    #[tokio::test]
    async fn negative_rerank_boost_is_rejected() {
        let retriever = retriever(CORPUS).await;
        let snapshot = retriever.snapshot().unwrap().clone();
        let settings = RetrievalSettings { rerank_boost: -1.0, ..RetrievalSettings::default() };
        let err = Retriever::from_snapshot(snapshot, embedder(), settings).unwrap_err();
        assert!(matches!(err, RagError::ConfigError(ref m) if m.contains("rerank_boost")));

        let temp = tempfile::tempdir().unwrap();
        assert!(Retriever::open(temp.path().join("none"), embedder(), settings).is_err());
    }

    #[tokio::test]
    async fn dimension_mismatch_is_rejected() {
        let retriever = retriever(CORPUS).await;
        let snapshot = retriever.snapshot().unwrap().clone();
        let other = Embedder::from_config(&EmbeddingConfig::local()).unwrap();
        let err =
            Retriever::from_snapshot(snapshot, other, RetrievalSettings::default()).unwrap_err();
        assert!(matches!(err, RagError::ConfigError(_)));
    }
}

//! On-disk snapshots: flat index, aligned chunk records and a manifest.
//!
//! A snapshot directory holds three files that are only meaningful together:
//!
//! - `index.flat`: the [`FlatL2Index`] binary
//! - `chunks.json`: chunk records, position `i` belonging to vector `i`
//! - `metadata.json`: the [`Manifest`]
//!
//! [`Snapshot`] can only be constructed from `(record, vector)` pairs, so the
//! index and the record list cannot drift apart in memory. On disk the
//! manifest carries a SHA-256 checksum of the other two files, so a manifest
//! never validates an index or chunk file written by a different run.

use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::document::ChunkRecord;
use crate::error::{RagError, Result};
use crate::index::{FlatL2Index, Neighbor};

pub const INDEX_FILE: &str = "index.flat";
pub const CHUNKS_FILE: &str = "chunks.json";
pub const MANIFEST_FILE: &str = "metadata.json";

/// Describes how a snapshot was produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    /// When ingestion finished, ISO-8601 in UTC.
    pub ingested_at: DateTime<Utc>,
    /// The source path that was ingested.
    pub source: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub total_chunks: usize,
    pub embedding_model: String,
    pub dimensions: usize,
}

/// The manifest as written to disk, bound to the files it was written with.
#[derive(Debug, Serialize, Deserialize)]
struct StoredManifest {
    #[serde(flatten)]
    manifest: Manifest,
    /// Hex SHA-256 over the index and chunk files of the same write.
    checksum: String,
}

/// A chunk record together with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedChunk {
    pub record: ChunkRecord,
    pub vector: Vec<f32>,
}

/// A search hit resolved to its chunk record.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotHit<'a> {
    pub distance: f32,
    pub position: usize,
    pub record: &'a ChunkRecord,
}

/// An immutable, self-describing vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    manifest: Manifest,
    index: FlatL2Index,
    records: Vec<ChunkRecord>,
}

impl Snapshot {
    /// Build a snapshot from aligned pairs.
    ///
    /// `manifest.total_chunks` is overwritten with `entries.len()`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexError`] if any vector's length differs from
    /// `manifest.dimensions`.
    pub fn new(mut manifest: Manifest, entries: Vec<IndexedChunk>) -> Result<Self> {
        let index = FlatL2Index::build(
            manifest.dimensions,
            entries.iter().map(|entry| entry.vector.as_slice()),
        )?;
        let records: Vec<ChunkRecord> = entries.into_iter().map(|entry| entry.record).collect();
        manifest.total_chunks = records.len();
        Ok(Self { manifest, index, records })
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.index.dimensions()
    }

    pub fn records(&self) -> &[ChunkRecord] {
        &self.records
    }

    /// The record and vector at `position`.
    pub fn get(&self, position: usize) -> Option<(&ChunkRecord, &[f32])> {
        Some((self.records.get(position)?, self.index.vector(position)?))
    }

    /// Nearest `k` chunks to `query`, ascending by distance.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexError`] on a query dimension mismatch.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SnapshotHit<'_>>> {
        let neighbors = self.index.search(query, k)?;
        Ok(neighbors
            .into_iter()
            .filter_map(|Neighbor { distance, index }| {
                self.records.get(index).map(|record| SnapshotHit { distance, position: index, record })
            })
            .collect())
    }

    /// Write the snapshot into `dir`, replacing any previous snapshot there.
    ///
    /// Each file is first written to a temporary file in `dir` and flushed;
    /// only when all three are complete are they renamed into place, the
    /// manifest last. A failure before that point leaves the previous
    /// snapshot intact. A failure between renames leaves files whose
    /// checksum no longer matches the manifest, which [`load`](Snapshot::load)
    /// rejects.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Io`] or [`RagError::SnapshotError`] on write failure.
    pub fn persist(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;

        let mut index_bytes = Vec::new();
        self.index.write_to(&mut index_bytes)?;
        let chunks_bytes = serde_json::to_vec_pretty(&self.records)?;
        let stored = StoredManifest {
            manifest: self.manifest.clone(),
            checksum: content_checksum(&index_bytes, &chunks_bytes),
        };
        let manifest_bytes = serde_json::to_vec_pretty(&stored)?;

        let index_file = write_temp(dir, &index_bytes)?;
        let chunks_file = write_temp(dir, &chunks_bytes)?;
        let manifest_file = write_temp(dir, &manifest_bytes)?;

        for (temp, name) in
            [(index_file, INDEX_FILE), (chunks_file, CHUNKS_FILE), (manifest_file, MANIFEST_FILE)]
        {
            let target = dir.join(name);
            temp.persist(&target).map_err(|e| RagError::SnapshotError {
                path: target.clone(),
                message: format!("failed to move snapshot file into place: {}", e.error),
            })?;
            debug!(path = %target.display(), "snapshot file written");
        }

        info!(
            path = %dir.display(),
            total_chunks = self.len(),
            dimensions = self.dimensions(),
            "snapshot persisted"
        );
        Ok(())
    }

    /// Load the snapshot stored in `dir`.
    ///
    /// Returns `Ok(None)` when `dir` holds no snapshot files at all, which
    /// callers treat as "not initialized".
    ///
    /// # Errors
    ///
    /// Returns [`RagError::SnapshotError`] if only some of the files exist,
    /// a file cannot be decoded, the index and chunk files were not written
    /// together with the manifest, or the index, records and manifest
    /// disagree on count or dimensionality.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let paths = [dir.join(INDEX_FILE), dir.join(CHUNKS_FILE), dir.join(MANIFEST_FILE)];
        let present = paths.iter().filter(|p| p.is_file()).count();
        if present == 0 {
            return Ok(None);
        }
        if present < paths.len() {
            let missing: Vec<String> = paths
                .iter()
                .filter(|p| !p.is_file())
                .map(|p| p.display().to_string())
                .collect();
            let message = format!("incomplete snapshot, missing {}", missing.join(", "));
            return Err(snapshot_error(dir, message));
        }
        let [index_path, chunks_path, manifest_path] = paths;

        let stored: StoredManifest = read_json(&manifest_path)?;
        let index_bytes = fs::read(&index_path)?;
        let chunks_bytes = fs::read(&chunks_path)?;
        if content_checksum(&index_bytes, &chunks_bytes) != stored.checksum {
            return Err(snapshot_error(
                dir,
                "checksum mismatch: index and chunk files do not match the manifest",
            ));
        }

        let manifest = stored.manifest;
        let records: Vec<ChunkRecord> = serde_json::from_slice(&chunks_bytes)
            .map_err(|e| snapshot_error(&chunks_path, format!("invalid JSON: {e}")))?;
        let index = FlatL2Index::read_from(&mut index_bytes.as_slice())
            .map_err(|e| snapshot_error(&index_path, e.to_string()))?;

        if index.dimensions() != manifest.dimensions {
            return Err(snapshot_error(
                dir,
                format!(
                    "index has {} dimensions but manifest records {}",
                    index.dimensions(),
                    manifest.dimensions
                ),
            ));
        }
        if index.len() != records.len() || records.len() != manifest.total_chunks {
            return Err(snapshot_error(
                dir,
                format!(
                    "misaligned snapshot: {} vectors, {} chunk records, manifest total {}",
                    index.len(),
                    records.len(),
                    manifest.total_chunks
                ),
            ));
        }

        info!(
            path = %dir.display(),
            total_chunks = records.len(),
            dimensions = index.dimensions(),
            "snapshot loaded"
        );
        Ok(Some(Self { manifest, index, records }))
    }
}

fn write_temp(dir: &Path, bytes: &[u8]) -> Result<NamedTempFile> {
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    Ok(temp)
}

fn content_checksum(index_bytes: &[u8], chunks_bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update((index_bytes.len() as u64).to_le_bytes());
    hasher.update(index_bytes);
    hasher.update(chunks_bytes);
    format!("{:x}", hasher.finalize())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let reader = BufReader::new(File::open(path)?);
    serde_json::from_reader(reader).map_err(|e| snapshot_error(path, format!("invalid JSON: {e}")))
}

fn snapshot_error(path: &Path, message: impl Into<String>) -> RagError {
    RagError::SnapshotError { path: PathBuf::from(path), message: message.into() }
}

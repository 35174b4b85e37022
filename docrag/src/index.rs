//! Exact nearest-neighbour search over flat vector storage.
//!
//! [`FlatL2Index`] keeps every vector in one contiguous buffer and scans it
//! on each query. There is no clustering or quantization: recall is exact
//! and query cost is linear in the number of vectors.

use std::cmp::Ordering;
use std::io::{Read, Write};

use crate::error::{RagError, Result};

const MAGIC: &[u8; 4] = b"DRFI";
const FORMAT_VERSION: u16 = 1;

/// One search hit: squared L2 distance and the insertion position of the vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub distance: f32,
    pub index: usize,
}

/// Convert a distance into a similarity in `[0, 1]`, decreasing in distance.
///
/// A NaN distance has no meaningful similarity and maps to `0.0`.
pub fn similarity(distance: f32) -> f32 {
    if distance.is_nan() {
        return 0.0;
    }
    1.0 / (1.0 + distance.max(0.0))
}

/// A flat, exact L2 index.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatL2Index {
    dimensions: usize,
    data: Vec<f32>,
}

impl FlatL2Index {
    /// Create an empty index for vectors of `dimensions` components.
    pub fn new(dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(RagError::IndexError("dimensions must be greater than zero".to_string()));
        }
        Ok(Self { dimensions, data: Vec::new() })
    }

    /// Build an index from vectors; insertion order is the iteration order.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexError`] if any vector's length differs from
    /// `dimensions` or any component is NaN or infinite.
    pub fn build<'a>(
        dimensions: usize,
        vectors: impl IntoIterator<Item = &'a [f32]>,
    ) -> Result<Self> {
        let mut index = Self::new(dimensions)?;
        for vector in vectors {
            index.add(vector)?;
        }
        Ok(index)
    }

    fn add(&mut self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(RagError::IndexError(format!(
                "vector {} has {} dimensions, index expects {}",
                self.len(),
                vector.len(),
                self.dimensions
            )));
        }
        if !all_finite(vector) {
            return Err(RagError::IndexError(format!(
                "vector {} contains a non-finite component",
                self.len()
            )));
        }
        self.data.extend_from_slice(vector);
        Ok(())
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.dimensions
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The vector stored at `index`.
    pub fn vector(&self, index: usize) -> Option<&[f32]> {
        let start = index.checked_mul(self.dimensions)?;
        self.data.get(start..start + self.dimensions)
    }

    /// Return up to `k` nearest vectors, ascending by distance.
    ///
    /// Ties are broken by insertion position, so results are deterministic.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexError`] if the query has the wrong dimensionality
    /// or a non-finite component.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if query.len() != self.dimensions {
            return Err(RagError::IndexError(format!(
                "query has {} dimensions, index expects {}",
                query.len(),
                self.dimensions
            )));
        }
        if !all_finite(query) {
            return Err(RagError::IndexError("query contains a non-finite component".to_string()));
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut neighbors: Vec<Neighbor> = self
            .data
            .chunks_exact(self.dimensions)
            .enumerate()
            .map(|(index, vector)| Neighbor { distance: squared_l2(query, vector), index })
            .collect();

        if k < neighbors.len() {
            neighbors.select_nth_unstable_by(k - 1, compare_neighbors);
            neighbors.truncate(k);
        }
        neighbors.sort_by(compare_neighbors);
        Ok(neighbors)
    }

    /// Serialize as `DRFI | version u16 | dimensions u32 | count u64 | f32 data`, little-endian.
    pub fn write_to(&self, writer: &mut impl Write) -> Result<()> {
        writer.write_all(MAGIC)?;
        writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
        writer.write_all(&(self.dimensions as u32).to_le_bytes())?;
        writer.write_all(&(self.len() as u64).to_le_bytes())?;
        for value in &self.data {
            writer.write_all(&value.to_le_bytes())?;
        }
        Ok(())
    }

    /// Read an index written by [`write_to`](FlatL2Index::write_to).
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexError`] for a bad header, a size that does not
    /// match the header, or non-finite vector data.
    pub fn read_from(reader: &mut impl Read) -> Result<Self> {
        let mut magic = [0u8; 4];
        read_exact(reader, &mut magic, "header")?;
        if &magic != MAGIC {
            return Err(RagError::IndexError("not a flat index file (bad magic)".to_string()));
        }

        let mut version = [0u8; 2];
        read_exact(reader, &mut version, "version")?;
        let version = u16::from_le_bytes(version);
        if version != FORMAT_VERSION {
            return Err(RagError::IndexError(format!("unsupported index format version {version}")));
        }

        let mut dimensions = [0u8; 4];
        read_exact(reader, &mut dimensions, "dimensions")?;
        let dimensions = u32::from_le_bytes(dimensions) as usize;

        let mut count = [0u8; 8];
        read_exact(reader, &mut count, "count")?;
        let count = u64::from_le_bytes(count) as usize;

        let mut index = Self::new(dimensions)?;
        let expected = count
            .checked_mul(dimensions)
            .and_then(|total| total.checked_mul(size_of::<f32>()))
            .ok_or_else(|| {
                RagError::IndexError(format!("index size overflows: {count} x {dimensions}"))
            })?;

        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        if bytes.len() != expected {
            return Err(RagError::IndexError(format!(
                "expected {expected} bytes of vector data, found {}",
                bytes.len()
            )));
        }
        index.data = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        if !all_finite(&index.data) {
            return Err(RagError::IndexError("index file contains non-finite values".to_string()));
        }
        Ok(index)
    }
}

fn compare_neighbors(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance.total_cmp(&b.distance).then(a.index.cmp(&b.index))
}

fn all_finite(values: &[f32]) -> bool {
    values.iter().all(|v| v.is_finite())
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn read_exact(reader: &mut impl Read, buf: &mut [u8], field: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            RagError::IndexError(format!("index file truncated while reading {field}"))
        } else {
            RagError::Io(e)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> FlatL2Index {
        let vectors: Vec<Vec<f32>> =
            vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![0.0, 3.0], vec![1.0, 0.0]];
        FlatL2Index::build(2, vectors.iter().map(Vec::as_slice)).unwrap()
    }

    #[test]
    fn search_is_ascending_with_index_tiebreak() {
        let hits = index().search(&[1.0, 0.0], 4).unwrap();
        let order: Vec<usize> = hits.iter().map(|n| n.index).collect();
        assert_eq!(order, [1, 3, 0, 2]);
        assert_eq!(hits[0].distance, 0.0);
        assert_eq!(hits[2].distance, 1.0);
        assert_eq!(hits[3].distance, 10.0);
    }

    #[test]
    fn search_truncates_to_k_and_handles_small_indexes() {
        let index = index();
        assert_eq!(index.search(&[0.0, 0.0], 2).unwrap().len(), 2);
        assert_eq!(index.search(&[0.0, 0.0], 10).unwrap().len(), 4);
        assert!(index.search(&[0.0, 0.0], 0).unwrap().is_empty());
        assert!(FlatL2Index::new(2).unwrap().search(&[0.0, 0.0], 3).unwrap().is_empty());
    }

    #[test]
    fn rejects_dimension_mismatches() {
        assert!(index().search(&[1.0], 1).is_err());
        let ragged: Vec<Vec<f32>> = vec![vec![1.0, 2.0], vec![1.0]];
        assert!(FlatL2Index::build(2, ragged.iter().map(Vec::as_slice)).is_err());
    }

    #[test]
    fn similarity_is_bounded_and_decreasing() {
        assert_eq!(similarity(0.0), 1.0);
        assert!(similarity(1.0) < similarity(0.5));
        assert!(similarity(1e9) > 0.0);
        assert_eq!(similarity(f32::NAN), 0.0);
        assert_eq!(similarity(f32::INFINITY), 0.0);
    }

    #[test]
    fn rejects_non_finite_vectors_and_queries() {
        let poisoned: Vec<Vec<f32>> = vec![vec![0.0, 0.0], vec![f32::NAN, 1.0]];
        let err = FlatL2Index::build(2, poisoned.iter().map(Vec::as_slice)).unwrap_err();
        assert!(matches!(err, RagError::IndexError(ref m) if m.contains("non-finite")));

        let infinite: Vec<Vec<f32>> = vec![vec![f32::INFINITY, 0.0]];
        assert!(FlatL2Index::build(2, infinite.iter().map(Vec::as_slice)).is_err());

        assert!(index().search(&[f32::NAN, 0.0], 2).is_err());
    }

    #[test]
    fn binary_round_trip() {
        let original = index();
        let mut bytes = Vec::new();
        original.write_to(&mut bytes).unwrap();
        assert_eq!(&bytes[..4], b"DRFI");

        let restored = FlatL2Index::read_from(&mut bytes.as_slice()).unwrap();
        assert_eq!(restored, original);
        assert_eq!(restored.vector(2), Some(&[0.0, 3.0][..]));
        assert_eq!(restored.vector(4), None);
    }

    #[test]
    fn truncated_file_is_rejected() {
        let mut bytes = Vec::new();
        index().write_to(&mut bytes).unwrap();
        bytes.truncate(bytes.len() - 3);
        let err = FlatL2Index::read_from(&mut bytes.as_slice()).unwrap_err();
        assert!(matches!(err, RagError::IndexError(_)));

        let err = FlatL2Index::read_from(&mut &b"DR"[..]).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    fn header(dimensions: u32, count: u64) -> Vec<u8> {
        let mut bytes = b"DRFI".to_vec();
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&dimensions.to_le_bytes());
        bytes.extend_from_slice(&count.to_le_bytes());
        bytes
    }

    #[test]
    fn oversized_count_is_rejected_without_panicking() {
        for count in [1u64 << 62, u64::MAX / 4 + 1, u64::MAX] {
            let bytes = header(1, count);
            let err = FlatL2Index::read_from(&mut bytes.as_slice()).unwrap_err();
            assert!(matches!(err, RagError::IndexError(_)), "count {count}: {err}");
        }
    }

    #[test]
    fn non_finite_file_data_is_rejected() {
        let mut bytes = header(2, 1);
        bytes.extend_from_slice(&1.0f32.to_le_bytes());
        bytes.extend_from_slice(&f32::NAN.to_le_bytes());
        let err = FlatL2Index::read_from(&mut bytes.as_slice()).unwrap_err();
        assert!(err.to_string().contains("non-finite"));
    }
}

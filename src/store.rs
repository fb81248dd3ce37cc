//! The loaded, immutable search state
//!
//! A [`VectorStore`] pairs the ordered id list with the flat index built from
//! the same rows: `ids[i]` is the record whose vector sits at index position
//! `i`. It is never mutated after construction; a reload builds a new one
//! with the next generation number and swaps it in whole.

use semdex_core::simd::l2_normalized;
use semdex_core::{FlatIndex, IndexError};
use serde::Serialize;

use crate::catalog::RecordId;

/// A nearest-neighbor hit translated to record identity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Hit {
    pub position: usize,
    pub id: RecordId,
    /// Cosine similarity, nominally in `[-1, 1]`.
    pub similarity: f32,
}

#[derive(Debug)]
pub struct VectorStore {
    generation: u64,
    ids: Vec<RecordId>,
    index: Option<FlatIndex>,
}

/// `max(1, min(top_k, available))`
pub fn clamp_top_k(top_k: usize, available: usize) -> usize {
    top_k.min(available).max(1)
}

impl VectorStore {
    /// A store with nothing to search; every query answers `[]`.
    pub fn empty(generation: u64) -> Self {
        Self {
            generation,
            ids: Vec::new(),
            index: None,
        }
    }

    /// `index` rows must already be normalized and aligned with `ids`.
    pub(crate) fn from_parts(generation: u64, ids: Vec<RecordId>, index: FlatIndex) -> Self {
        debug_assert_eq!(ids.len(), index.len(), "ids and index rows diverge");
        Self {
            generation,
            ids,
            index: Some(index),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.index.as_ref().map_or(0, FlatIndex::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0 || self.ids.is_empty()
    }

    pub fn dim(&self) -> Option<usize> {
        self.index.as_ref().map(FlatIndex::dim)
    }

    pub fn ids(&self) -> &[RecordId] {
        &self.ids
    }

    pub fn memory_bytes(&self) -> usize {
        self.index.as_ref().map_or(0, FlatIndex::memory_bytes)
            + self.ids.len() * std::mem::size_of::<RecordId>()
    }

    /// Exact top-k by cosine similarity, best first.
    ///
    /// The query is normalized the same way the stored rows were. A query of
    /// the wrong dimensionality is a caller bug and comes back as an error.
    pub fn nearest(&self, query: &[f32], top_k: usize) -> Result<Vec<Hit>, IndexError> {
        let Some(index) = self.index.as_ref() else {
            return Ok(Vec::new());
        };
        if index.is_empty() || self.ids.is_empty() {
            return Ok(Vec::new());
        }

        let query = l2_normalized(query);
        let k = clamp_top_k(top_k, index.len());
        let neighbors = index.search(&query, k)?;

        Ok(neighbors
            .into_iter()
            .filter_map(|n| {
                // Positions past the id list cannot be attributed to a record.
                self.ids.get(n.position).map(|&id| Hit {
                    position: n.position,
                    id,
                    similarity: n.score,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semdex_core::simd::l2_normalize_rows;
    use semdex_core::Matrix;

    fn store(ids: &[i64], rows: &[Vec<f32>]) -> VectorStore {
        let mut matrix = Matrix::from_rows(rows).unwrap();
        let dim = matrix.dim();
        l2_normalize_rows(matrix.as_mut_slice(), dim);
        VectorStore::from_parts(
            1,
            ids.iter().copied().map(RecordId).collect(),
            FlatIndex::from_matrix(matrix).unwrap(),
        )
    }

    #[test]
    fn test_clamp_top_k() {
        assert_eq!(clamp_top_k(100, 3), 3);
        assert_eq!(clamp_top_k(0, 3), 1);
        assert_eq!(clamp_top_k(2, 3), 2);
    }

    #[test]
    fn test_position_maps_to_record_id() {
        let store = store(&[5, 9, 12], &[vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0]]);

        let hits = store.nearest(&[0.0, 1.0, 0.0], 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, RecordId(9));
        assert_eq!(hits[0].position, 1);
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_unnormalized_query_gives_cosine() {
        let store = store(&[1, 2], &[vec![3.0, 4.0], vec![-4.0, 3.0]]);

        let hits = store.nearest(&[30.0, 40.0], 2).unwrap();
        assert_eq!(hits[0].id, RecordId(1));
        assert!((hits[0].similarity - 1.0).abs() < 1e-5);
        assert!(hits[1].similarity.abs() < 1e-5);
    }

    #[test]
    fn test_empty_store_answers_nothing() {
        let store = VectorStore::empty(0);
        assert!(store.is_empty());
        assert_eq!(store.dim(), None);
        assert!(store.nearest(&[1.0, 2.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_zero_query_does_not_produce_nan() {
        let store = store(&[1, 2], &[vec![1.0, 0.0], vec![0.0, 1.0]]);
        let hits = store.nearest(&[0.0, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.similarity == 0.0));
    }

    #[test]
    fn test_wrong_dimension_is_loud() {
        let store = store(&[1], &[vec![1.0, 0.0]]);
        assert!(matches!(
            store.nearest(&[1.0, 0.0, 0.0], 1),
            Err(IndexError::DimensionMismatch { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn test_positions_past_ids_are_dropped() {
        let mut index = FlatIndex::new(2).unwrap();
        index.add(&[1.0, 0.0]).unwrap();
        index.add(&[0.0, 1.0]).unwrap();
        // Deliberately shorter id list; only constructible inside the crate.
        let store = VectorStore {
            generation: 1,
            ids: vec![RecordId(7)],
            index: Some(index),
        };

        let hits = store.nearest(&[0.0, 1.0], 2).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, RecordId(7));
    }
}

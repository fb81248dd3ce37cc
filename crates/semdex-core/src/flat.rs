//! Exact inner-product index
//!
//! Rows live in one contiguous buffer; a search scores every row against the
//! query and keeps the `k` best in a bounded min-heap. No approximation, no
//! training, no graph. Rows are expected to be L2-normalized by the caller
//! so that scores are cosine similarities.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rayon::prelude::*;
use thiserror::Error;

use crate::matrix::Matrix;
use crate::simd::dot_product;

/// Row count above which scoring fans out over the rayon pool.
const PARALLEL_ROWS: usize = 16_384;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum IndexError {
    #[error("Dimension mismatch: index has dim {expected}, query has dim {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid dimension 0")]
    ZeroDimension,
}

/// One search hit: internal row position and inner-product score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub score: f32,
}

/// Flat (brute force) inner-product index.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dim: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dim: usize) -> Result<Self, IndexError> {
        if dim == 0 {
            return Err(IndexError::ZeroDimension);
        }
        Ok(Self {
            dim,
            data: Vec::new(),
        })
    }

    /// Take ownership of a matrix as the index rows, in order.
    pub fn from_matrix(matrix: Matrix) -> Result<Self, IndexError> {
        if matrix.dim() == 0 {
            return Err(IndexError::ZeroDimension);
        }
        Ok(Self {
            dim: matrix.dim(),
            data: matrix.into_vec(),
        })
    }

    /// Append a row; its position is the previous `len()`.
    pub fn add(&mut self, row: &[f32]) -> Result<usize, IndexError> {
        self.check_dim(row.len())?;
        self.data.extend_from_slice(row);
        Ok(self.len() - 1)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.dim
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn row(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dim)?;
        self.data.get(start..start + self.dim)
    }

    pub fn memory_bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    /// The `k` rows with the largest inner product against `query`.
    ///
    /// Results are sorted by descending score; equal scores keep ascending
    /// position order. `k` larger than the index returns every row.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        self.check_dim(query.len())?;
        let k = k.min(self.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let scores: Vec<f32> = if self.len() >= PARALLEL_ROWS {
            self.data
                .par_chunks_exact(self.dim)
                .map(|row| dot_product(query, row))
                .collect()
        } else {
            self.data
                .chunks_exact(self.dim)
                .map(|row| dot_product(query, row))
                .collect()
        };

        Ok(select_top_k(&scores, k))
    }

    fn check_dim(&self, actual: usize) -> Result<(), IndexError> {
        if actual != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                actual,
            });
        }
        Ok(())
    }
}

/// Heap entry ordered so that the *worst* candidate sits at the top.
#[derive(Clone, Copy)]
struct Worst(Neighbor);

impl Worst {
    /// NaN ranks below every real score.
    fn key(&self) -> f32 {
        if self.0.score.is_nan() {
            f32::NEG_INFINITY
        } else {
            self.0.score
        }
    }

    /// Better candidates compare as Less.
    fn rank(&self, other: &Self) -> Ordering {
        other
            .key()
            .total_cmp(&self.key())
            .then(self.0.position.cmp(&other.0.position))
    }
}

impl PartialEq for Worst {
    fn eq(&self, other: &Self) -> bool {
        self.rank(other) == Ordering::Equal
    }
}
impl Eq for Worst {}
impl PartialOrd for Worst {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Worst {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank(other)
    }
}

fn select_top_k(scores: &[f32], k: usize) -> Vec<Neighbor> {
    let mut heap = BinaryHeap::with_capacity(k + 1);
    for (position, &score) in scores.iter().enumerate() {
        let candidate = Worst(Neighbor { position, score });
        if heap.len() < k {
            heap.push(candidate);
        } else if let Some(worst) = heap.peek() {
            if candidate < *worst {
                heap.pop();
                heap.push(candidate);
            }
        }
    }

    // into_sorted_vec is ascending under `Worst`, i.e. best first.
    heap.into_sorted_vec().into_iter().map(|w| w.0).collect()
}

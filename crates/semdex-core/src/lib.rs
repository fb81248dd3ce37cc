//! semdex core – dense vector files, normalization and exact similarity search
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │          FlatIndex (exact inner product, top-k heap)        │
//! ├─────────────────────────────────────────────────────────────┤
//! │        L2 normalization · dot product (simd module)         │
//! ├─────────────────────────────────────────────────────────────┤
//! │   Matrix / MatrixFile (mmap .vdb)  ·  .npy reader           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod flat;
pub mod format;
pub mod matrix;
pub mod npy;
pub mod simd;

pub use flat::{FlatIndex, IndexError, Neighbor};
pub use format::{write_matrix, FormatError, MatrixHeader, MatrixWriter};
pub use matrix::{read_matrix, Matrix, MatrixError, MatrixFile};
pub use simd::{dot_product, l2_normalize, l2_normalized};

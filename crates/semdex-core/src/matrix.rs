//! Dense row-major matrices and the memory-mapped `.vdb` reader
//!
//! [`MatrixFile`] gives zero-copy access to the rows of a `.vdb` file through
//! the OS page cache. [`Matrix`] is the owned form the index is built from;
//! [`read_matrix`] produces one from either a `.vdb` or a `.npy` file.
//!
//! # Safety
//!
//! Rows are viewed as `&[f32]` through `bytemuck::try_cast_slice`, which checks
//! alignment instead of assuming it.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use memmap2::Mmap;
use thiserror::Error;

use crate::format::{FormatError, MatrixHeader, MAGIC};
use crate::npy::{self, NpyError};

#[derive(Error, Debug)]
pub enum MatrixError {
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    #[error("NumPy error: {0}")]
    Npy(#[from] NpyError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Row out of bounds: {index} >= {rows}")]
    RowOutOfBounds { index: usize, rows: usize },

    #[error("Alignment error: row bytes not aligned to f32 (4 bytes)")]
    Alignment,

    #[error("Unrecognized vector file: neither .vdb nor .npy magic")]
    UnknownFormat,
}

/// Owned row-major matrix of `rows × dim` floats.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Matrix {
    rows: usize,
    dim: usize,
    data: Vec<f32>,
}

impl Matrix {
    /// # Panics
    ///
    /// Panics if `data.len() != rows * dim`.
    pub fn from_parts(rows: usize, dim: usize, data: Vec<f32>) -> Self {
        assert_eq!(data.len(), rows * dim, "matrix buffer does not match shape");
        Self { rows, dim, data }
    }

    /// Stack equal-length rows. Returns `None` when the rows are ragged.
    pub fn from_rows<R: AsRef<[f32]>>(rows: &[R]) -> Option<Self> {
        let dim = rows.first().map(|r| r.as_ref().len()).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * dim);
        for row in rows {
            let row = row.as_ref();
            if row.len() != dim {
                return None;
            }
            data.extend_from_slice(row);
        }
        Some(Self {
            rows: rows.len(),
            dim,
            data,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    #[inline]
    pub fn row(&self, index: usize) -> &[f32] {
        &self.data[index * self.dim..(index + 1) * self.dim]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Keep only the first `rows` rows.
    pub fn truncate(&mut self, rows: usize) {
        if rows < self.rows {
            self.rows = rows;
            self.data.truncate(rows * self.dim);
        }
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }
}

/// Memory-mapped `.vdb` file
pub struct MatrixFile {
    mmap: Mmap,
    header: MatrixHeader,
}

impl MatrixFile {
    /// Map a `.vdb` file read-only.
    ///
    /// # Safety
    ///
    /// Memory mapping is inherently unsafe: the file must not be truncated or
    /// rewritten while mapped. Exports write to a fresh path and rename.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, MatrixError> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        let header = MatrixHeader::from_bytes(&mmap)?;
        let expected = header.file_size();
        if mmap.len() < expected {
            return Err(FormatError::Truncated {
                expected,
                actual: mmap.len(),
            }
            .into());
        }

        Ok(Self { mmap, header })
    }

    pub fn rows(&self) -> usize {
        self.header.rows as usize
    }

    pub fn dim(&self) -> usize {
        self.header.dim as usize
    }

    /// Zero-copy view of row `index`.
    pub fn try_row(&self, index: usize) -> Result<&[f32], MatrixError> {
        if index >= self.rows() {
            return Err(MatrixError::RowOutOfBounds {
                index,
                rows: self.rows(),
            });
        }
        let start = self.header.row_offset(index);
        let bytes = &self.mmap[start..start + self.header.row_bytes()];
        bytemuck::try_cast_slice(bytes).map_err(|_| MatrixError::Alignment)
    }

    pub fn memory_bytes(&self) -> usize {
        self.mmap.len()
    }

    pub fn iter(&self) -> RowIter<'_> {
        RowIter {
            file: self,
            index: 0,
        }
    }

    /// Copy every row into an owned [`Matrix`].
    pub fn to_matrix(&self) -> Result<Matrix, MatrixError> {
        let mut data = Vec::with_capacity(self.rows() * self.dim());
        for row in self.iter() {
            data.extend_from_slice(row?);
        }
        Ok(Matrix::from_parts(self.rows(), self.dim(), data))
    }
}

pub struct RowIter<'a> {
    file: &'a MatrixFile,
    index: usize,
}

impl<'a> Iterator for RowIter<'a> {
    type Item = Result<&'a [f32], MatrixError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.file.rows() {
            return None;
        }
        let row = self.file.try_row(self.index);
        self.index += 1;
        Some(row)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.file.rows() - self.index;
        (remaining, Some(remaining))
    }
}

impl<'a> ExactSizeIterator for RowIter<'a> {}

/// Kind of vector file, decided by its magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorFileKind {
    Vdb,
    Npy,
}

pub fn detect_kind<P: AsRef<Path>>(path: P) -> Result<VectorFileKind, MatrixError> {
    let mut magic = [0u8; 8];
    let mut file = File::open(path)?;
    let n = file.read(&mut magic)?;
    if n == magic.len() && magic == MAGIC {
        Ok(VectorFileKind::Vdb)
    } else if n >= 6 && &magic[..6] == npy::MAGIC {
        Ok(VectorFileKind::Npy)
    } else {
        Err(MatrixError::UnknownFormat)
    }
}

/// Load a whole vector file into memory, whichever of the two formats it is.
pub fn read_matrix<P: AsRef<Path>>(path: P) -> Result<Matrix, MatrixError> {
    let path = path.as_ref();
    match detect_kind(path)? {
        VectorFileKind::Vdb => MatrixFile::open(path)?.to_matrix(),
        VectorFileKind::Npy => Ok(npy::read_npy(path)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::write_matrix;
    use tempfile::tempdir;

    #[test]
    fn test_open_and_read_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("embeddings.vdb");
        write_matrix(&path, 4, [[1.0f32, 2.0, 3.0, 4.0], [5.0, 6.0, 7.0, 8.0]]).unwrap();

        let file = MatrixFile::open(&path).unwrap();
        assert_eq!(file.rows(), 2);
        assert_eq!(file.dim(), 4);
        assert_eq!(file.try_row(1).unwrap(), &[5.0, 6.0, 7.0, 8.0]);
        assert!(matches!(
            file.try_row(2),
            Err(MatrixError::RowOutOfBounds { index: 2, rows: 2 })
        ));
    }

    #[test]
    fn test_truncated_file_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.vdb");
        write_matrix(&path, 2, [[1.0f32, 2.0], [3.0, 4.0]]).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();

        assert!(matches!(
            MatrixFile::open(&path),
            Err(MatrixError::Format(FormatError::Truncated { .. }))
        ));
    }

    #[test]
    fn test_read_matrix_dispatches_on_magic() {
        let dir = tempdir().unwrap();

        let vdb = dir.path().join("a.bin");
        write_matrix(&vdb, 2, [[1.0f32, 0.0], [0.0, 1.0]]).unwrap();
        let m = read_matrix(&vdb).unwrap();
        assert_eq!((m.rows(), m.dim()), (2, 2));

        let payload: Vec<u8> = [0.25f32, 0.75].iter().flat_map(|v| v.to_le_bytes()).collect();
        let npy_path = dir.path().join("b.bin");
        std::fs::write(&npy_path, npy::tests::npy_bytes("<f4", false, &[1, 2], &payload)).unwrap();
        let m = read_matrix(&npy_path).unwrap();
        assert_eq!(m.row(0), &[0.25, 0.75]);

        let junk = dir.path().join("c.bin");
        std::fs::write(&junk, b"not vectors").unwrap();
        assert!(matches!(read_matrix(&junk), Err(MatrixError::UnknownFormat)));
    }

    #[test]
    fn test_from_rows_and_truncate() {
        let mut m = Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]).unwrap();
        m.truncate(2);
        assert_eq!(m.rows(), 2);
        assert_eq!(m.as_slice(), &[1.0, 2.0, 3.0, 4.0]);

        assert!(Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0]]).is_none());
    }
}

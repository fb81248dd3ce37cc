//! `.vdb` dense matrix file
//!
//! The offline export step writes one row per embedded record, in ascending
//! record id order. The file itself carries no ids; the loader pairs row `i`
//! with the `i`-th id of the record store's ordered id list.
//!
//! # File Structure
//!
//! ```text
//! Offset   Size    Type        Description
//! ─────────────────────────────────────────────
//! 0x00     8       [u8; 8]     Magic: "SEMDEXV1"
//! 0x08     4       u32 LE      N: Number of rows
//! 0x0C     4       u32 LE      D: Dimensions
//! 0x10     N*D*4   [f32]       Row-major vector data (Little Endian)
//! ```
//!
//! # Example
//!
//! ```ignore
//! let mut writer = MatrixWriter::create("embeddings.vdb", 3072)?;
//! writer.write_row(&embedding)?;
//! writer.finish()?;
//! ```

use std::fs::File;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use thiserror::Error;

/// Magic bytes identifying a `.vdb` file
pub const MAGIC: [u8; 8] = *b"SEMDEXV1";

/// 8 (magic) + 4 (rows) + 4 (dim)
pub const HEADER_SIZE: usize = 16;

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("Invalid magic bytes: expected SEMDEXV1")]
    InvalidMagic,

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Truncated file: header promises {expected} bytes, found {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Row count overflow: more than {} rows", u32::MAX)]
    TooManyRows,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Parsed `.vdb` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixHeader {
    pub rows: u32,
    pub dim: u32,
}

impl MatrixHeader {
    /// Parse from the first [`HEADER_SIZE`] bytes of a file.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FormatError::Truncated {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }
        if bytes[0..8] != MAGIC {
            return Err(FormatError::InvalidMagic);
        }

        let rows = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        let dim = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);

        Ok(Self { rows, dim })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(&MAGIC);
        buf[8..12].copy_from_slice(&self.rows.to_le_bytes());
        buf[12..16].copy_from_slice(&self.dim.to_le_bytes());
        buf
    }

    /// Byte offset of row `index`
    #[inline(always)]
    pub fn row_offset(&self, index: usize) -> usize {
        HEADER_SIZE + index * self.row_bytes()
    }

    #[inline(always)]
    pub fn row_bytes(&self) -> usize {
        self.dim as usize * std::mem::size_of::<f32>()
    }

    /// Total file size implied by the header
    pub fn file_size(&self) -> usize {
        HEADER_SIZE + self.rows as usize * self.row_bytes()
    }
}

/// Streaming writer; the row count in the header is patched by [`MatrixWriter::finish`].
pub struct MatrixWriter {
    writer: BufWriter<File>,
    dim: usize,
    rows: u32,
}

impl MatrixWriter {
    pub fn create<P: AsRef<Path>>(path: P, dim: usize) -> Result<Self, FormatError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let header = MatrixHeader {
            rows: 0,
            dim: dim as u32,
        };
        writer.write_all(&header.to_bytes())?;

        Ok(Self {
            writer,
            dim,
            rows: 0,
        })
    }

    pub fn write_row(&mut self, row: &[f32]) -> Result<(), FormatError> {
        if row.len() != self.dim {
            return Err(FormatError::DimensionMismatch {
                expected: self.dim,
                actual: row.len(),
            });
        }
        if self.rows == u32::MAX {
            return Err(FormatError::TooManyRows);
        }

        for &val in row {
            self.writer.write_all(&val.to_le_bytes())?;
        }
        self.rows += 1;
        Ok(())
    }

    pub fn rows_written(&self) -> u32 {
        self.rows
    }

    /// Flush, write the final row count and fsync. Returns the row count.
    pub fn finish(mut self) -> Result<u32, FormatError> {
        self.writer.flush()?;

        let file = self.writer.get_mut();
        file.seek(SeekFrom::Start(8))?;
        file.write_all(&self.rows.to_le_bytes())?;
        file.sync_all()?;

        Ok(self.rows)
    }
}

/// Write a whole set of rows in one call.
pub fn write_matrix<P, R>(path: P, dim: usize, rows: R) -> Result<u32, FormatError>
where
    P: AsRef<Path>,
    R: IntoIterator,
    R::Item: AsRef<[f32]>,
{
    let mut writer = MatrixWriter::create(path, dim)?;
    for row in rows {
        writer.write_row(row.as_ref())?;
    }
    writer.finish()
}

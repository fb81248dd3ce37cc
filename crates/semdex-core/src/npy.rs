//! NumPy `.npy` reader for 2-D float arrays
//!
//! Only what an embedding export produces is accepted: a little-endian
//! `float32` or `float64` array of shape `(rows, dim)`. Fortran-ordered data
//! is transposed on read. Format versions 1.0, 2.0 and 3.0 are understood.
//!
//! ```text
//! Offset   Size     Description
//! ───────────────────────────────────────────────────────
//! 0x00     6        Magic: "\x93NUMPY"
//! 0x06     1        Major version
//! 0x07     1        Minor version
//! 0x08     2 | 4    Header length (u16 LE for v1, u32 LE for v2/v3)
//! ...      HLEN     Python dict literal: {'descr': .., 'fortran_order': .., 'shape': (..), }
//! ...      ...      Array data
//! ```

use std::path::Path;

use thiserror::Error;

use crate::matrix::Matrix;

pub const MAGIC: &[u8; 6] = b"\x93NUMPY";

#[derive(Error, Debug)]
pub enum NpyError {
    #[error("Invalid magic bytes: not a .npy file")]
    InvalidMagic,

    #[error("Unsupported .npy format version {major}.{minor}")]
    UnsupportedVersion { major: u8, minor: u8 },

    #[error("Malformed .npy header: {0}")]
    MalformedHeader(String),

    #[error("Unsupported dtype {0:?}: expected '<f4' or '<f8'")]
    UnsupportedDtype(String),

    #[error("Unsupported shape {0:?}: expected a 2-D array")]
    UnsupportedShape(Vec<usize>),

    #[error("Truncated array data: expected {expected} bytes, found {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dtype {
    F32,
    F64,
}

impl Dtype {
    fn parse(descr: &str) -> Result<Self, NpyError> {
        match descr {
            "<f4" => Ok(Dtype::F32),
            "<f8" => Ok(Dtype::F64),
            other => Err(NpyError::UnsupportedDtype(other.to_string())),
        }
    }

    fn size(self) -> usize {
        match self {
            Dtype::F32 => 4,
            Dtype::F64 => 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct NpyHeader {
    dtype: Dtype,
    fortran_order: bool,
    shape: Vec<usize>,
}

/// Read a `.npy` file into an owned row-major [`Matrix`].
pub fn read_npy<P: AsRef<Path>>(path: P) -> Result<Matrix, NpyError> {
    let bytes = std::fs::read(path)?;
    parse_npy(&bytes)
}

/// Parse an in-memory `.npy` image.
pub fn parse_npy(bytes: &[u8]) -> Result<Matrix, NpyError> {
    let (header, data_start) = split_header(bytes)?;

    let (rows, dim) = match header.shape.as_slice() {
        [rows, dim] => (*rows, *dim),
        // np.save of an empty list
        [0] => (0, 0),
        _ => return Err(NpyError::UnsupportedShape(header.shape.clone())),
    };

    let expected = rows
        .checked_mul(dim)
        .and_then(|elements| elements.checked_mul(header.dtype.size()))
        .ok_or_else(|| NpyError::UnsupportedShape(header.shape.clone()))?;
    let payload = &bytes[data_start..];
    if payload.len() < expected {
        return Err(NpyError::Truncated {
            expected,
            actual: payload.len(),
        });
    }
    let payload = &payload[..expected];

    let mut data: Vec<f32> = match header.dtype {
        Dtype::F32 => payload
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        Dtype::F64 => payload
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f32)
            .collect(),
    };

    if header.fortran_order && rows > 1 && dim > 1 {
        data = transpose(&data, rows, dim);
    }

    Ok(Matrix::from_parts(rows, dim, data))
}

/// Column-major (rows × dim) to row-major.
fn transpose(data: &[f32], rows: usize, dim: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; data.len()];
    for col in 0..dim {
        for row in 0..rows {
            out[row * dim + col] = data[col * rows + row];
        }
    }
    out
}

fn split_header(bytes: &[u8]) -> Result<(NpyHeader, usize), NpyError> {
    if bytes.len() < 10 || &bytes[0..6] != MAGIC {
        return Err(NpyError::InvalidMagic);
    }
    let (major, minor) = (bytes[6], bytes[7]);

    let (header_len, header_start) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(NpyError::MalformedHeader("missing header length".into()));
            }
            (
                u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
                12,
            )
        }
        _ => return Err(NpyError::UnsupportedVersion { major, minor }),
    };

    let header_end = header_start + header_len;
    if bytes.len() < header_end {
        return Err(NpyError::MalformedHeader(format!(
            "header length {} runs past end of file",
            header_len
        )));
    }
    let text = std::str::from_utf8(&bytes[header_start..header_end])
        .map_err(|e| NpyError::MalformedHeader(e.to_string()))?;

    Ok((parse_header_dict(text)?, header_end))
}

fn parse_header_dict(text: &str) -> Result<NpyHeader, NpyError> {
    let descr = dict_value(text, "descr")?;
    let descr = descr
        .trim()
        .trim_matches(|c| c == '\'' || c == '"')
        .to_string();
    let dtype = Dtype::parse(&descr)?;

    let fortran_order = match dict_value(text, "fortran_order")?.trim() {
        "True" => true,
        "False" => false,
        other => {
            return Err(NpyError::MalformedHeader(format!(
                "fortran_order = {}",
                other
            )))
        }
    };

    let shape_src = dict_value(text, "shape")?;
    let shape_src = shape_src.trim();
    let inner = shape_src
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| NpyError::MalformedHeader(format!("shape = {}", shape_src)))?;
    let shape = inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.trim_end_matches('L')
                .parse::<usize>()
                .map_err(|_| NpyError::MalformedHeader(format!("shape entry {:?}", s)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(NpyHeader {
        dtype,
        fortran_order,
        shape,
    })
}

/// Raw source text of the value stored under `key` in the header dict.
fn dict_value<'a>(text: &'a str, key: &str) -> Result<&'a str, NpyError> {
    let needle_single = format!("'{}'", key);
    let needle_double = format!("\"{}\"", key);
    let key_pos = text
        .find(&needle_single)
        .map(|p| p + needle_single.len())
        .or_else(|| text.find(&needle_double).map(|p| p + needle_double.len()))
        .ok_or_else(|| NpyError::MalformedHeader(format!("missing key '{}'", key)))?;

    let rest = text[key_pos..].trim_start();
    let rest = rest
        .strip_prefix(':')
        .ok_or_else(|| NpyError::MalformedHeader(format!("no ':' after '{}'", key)))?
        .trim_start();

    // A tuple value contains commas, so it ends at its closing paren.
    let end = if rest.starts_with('(') {
        rest.find(')').map(|p| p + 1)
    } else {
        rest.find([',', '}'])
    }
    .ok_or_else(|| NpyError::MalformedHeader(format!("unterminated value for '{}'", key)))?;

    Ok(&rest[..end])
}

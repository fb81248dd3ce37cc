//! Vector store loader
//!
//! Builds a [`VectorStore`] from the record store's ordered list of embedded
//! ids and a matrix of vectors written in that same order. The pairing is
//! purely positional, so the loader checks what it can: the id list must be
//! strictly ascending, every vector must have the same width, and the two
//! lengths must agree (or differ by no more than the configured tolerance,
//! in which case both sides are cut to the shorter one).

use std::path::PathBuf;

use semdex_core::matrix::{read_matrix, Matrix, MatrixError};
use semdex_core::simd::{l2_normalize_rows, zero_non_finite_rows};
use semdex_core::{FlatIndex, IndexError};
use serde::Serialize;
use thiserror::Error;

use crate::catalog::{RecordId, RecordStore};
use crate::config::{EngineConfig, VectorSource};
use crate::store::VectorStore;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("record store read failed: {0:#}")]
    Catalog(anyhow::Error),

    #[error("vector file {path:?}: {source}")]
    VectorFile {
        path: PathBuf,
        #[source]
        source: MatrixError,
    },

    #[error("embedded ids not strictly ascending at position {position}: {previous} then {next}")]
    UnorderedIds {
        position: usize,
        previous: RecordId,
        next: RecordId,
    },

    #[error("record {id} has a {actual}-dimensional embedding, expected {expected}")]
    RaggedEmbedding {
        id: RecordId,
        expected: usize,
        actual: usize,
    },

    #[error("{ids} embedded ids vs {rows} vector rows: skew exceeds tolerance of {tolerance}")]
    LengthSkew {
        ids: usize,
        rows: usize,
        tolerance: usize,
    },

    #[error("index build failed: {0}")]
    Index(#[from] IndexError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyReason {
    NoEmbeddedRecords,
    MissingVectorFile,
    EmptyVectorFile,
}

/// Both sides were cut to `kept` because their lengths disagreed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Truncation {
    pub ids: usize,
    pub rows: usize,
    pub kept: usize,
}

/// What a load or reload produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoadStatus {
    Ready {
        generation: u64,
        vectors: usize,
        dim: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        truncated: Option<Truncation>,
        zero_norm_rows: usize,
        non_finite_rows: usize,
    },
    Empty {
        generation: u64,
        reason: EmptyReason,
    },
    Failed {
        generation: u64,
        error: String,
    },
}

impl LoadStatus {
    pub fn generation(&self) -> u64 {
        match self {
            LoadStatus::Ready { generation, .. }
            | LoadStatus::Empty { generation, .. }
            | LoadStatus::Failed { generation, .. } => *generation,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, LoadStatus::Ready { .. })
    }
}

pub struct Loaded {
    pub store: VectorStore,
    pub status: LoadStatus,
}

impl Loaded {
    fn empty(generation: u64, reason: EmptyReason) -> Self {
        Self {
            store: VectorStore::empty(generation),
            status: LoadStatus::Empty { generation, reason },
        }
    }
}

/// Build generation `generation` of the search state.
pub fn load_vector_store(
    catalog: &dyn RecordStore,
    config: &EngineConfig,
    generation: u64,
) -> Result<Loaded, LoadError> {
    let (mut ids, mut matrix) = match &config.vectors {
        VectorSource::File(path) => {
            let ids = catalog.embedded_ids().map_err(LoadError::Catalog)?;
            if ids.is_empty() {
                tracing::warn!("No records with embeddings in the record store; search is empty");
                return Ok(Loaded::empty(generation, EmptyReason::NoEmbeddedRecords));
            }
            check_ascending(&ids)?;

            if !path.exists() {
                tracing::warn!("Vector file {:?} does not exist; search is empty", path);
                return Ok(Loaded::empty(generation, EmptyReason::MissingVectorFile));
            }
            let matrix = read_matrix(path).map_err(|source| LoadError::VectorFile {
                path: path.clone(),
                source,
            })?;
            (ids, matrix)
        }
        VectorSource::Catalog => {
            let pairs = catalog.embedded_vectors().map_err(LoadError::Catalog)?;
            if pairs.is_empty() {
                tracing::warn!("No records with embeddings in the record store; search is empty");
                return Ok(Loaded::empty(generation, EmptyReason::NoEmbeddedRecords));
            }
            stack_embeddings(pairs)?
        }
    };

    if matrix.is_empty() {
        tracing::warn!("Vector source holds no rows; search is empty");
        return Ok(Loaded::empty(generation, EmptyReason::EmptyVectorFile));
    }

    let truncated = reconcile_lengths(&mut ids, &mut matrix, config)?;

    let dim = matrix.dim();
    let non_finite_rows = zero_non_finite_rows(matrix.as_mut_slice(), dim);
    if non_finite_rows > 0 {
        tracing::warn!("{} vectors contain NaN or infinite values and were zeroed", non_finite_rows);
    }
    let zero_norm_rows = l2_normalize_rows(matrix.as_mut_slice(), dim);
    if zero_norm_rows > 0 {
        tracing::warn!("{} vectors have zero norm and were left unnormalized", zero_norm_rows);
    }

    let index = FlatIndex::from_matrix(matrix)?;
    let vectors = index.len();
    let store = VectorStore::from_parts(generation, ids, index);

    tracing::info!(
        "Vector store generation {} ready: {} vectors of dimension {}",
        generation,
        vectors,
        dim
    );

    Ok(Loaded {
        store,
        status: LoadStatus::Ready {
            generation,
            vectors,
            dim,
            truncated,
            zero_norm_rows,
            non_finite_rows,
        },
    })
}

fn check_ascending(ids: &[RecordId]) -> Result<(), LoadError> {
    match ids.windows(2).position(|w| w[0] >= w[1]) {
        Some(i) => Err(LoadError::UnorderedIds {
            position: i + 1,
            previous: ids[i],
            next: ids[i + 1],
        }),
        None => Ok(()),
    }
}

/// One ordered read yields both sides of the pairing.
fn stack_embeddings(
    pairs: Vec<(RecordId, Vec<f32>)>,
) -> Result<(Vec<RecordId>, Matrix), LoadError> {
    let expected = pairs.first().map(|(_, v)| v.len()).unwrap_or(0);
    let mut ids = Vec::with_capacity(pairs.len());
    let mut data = Vec::with_capacity(pairs.len() * expected);

    for (id, vector) in pairs {
        if vector.len() != expected {
            return Err(LoadError::RaggedEmbedding {
                id,
                expected,
                actual: vector.len(),
            });
        }
        ids.push(id);
        data.extend_from_slice(&vector);
    }
    check_ascending(&ids)?;

    let rows = ids.len();
    Ok((ids, Matrix::from_parts(rows, expected, data)))
}

fn reconcile_lengths(
    ids: &mut Vec<RecordId>,
    matrix: &mut Matrix,
    config: &EngineConfig,
) -> Result<Option<Truncation>, LoadError> {
    let (id_count, rows) = (ids.len(), matrix.rows());
    if id_count == rows {
        return Ok(None);
    }

    let skew = id_count.abs_diff(rows);
    if !config.tolerates_skew(skew) {
        return Err(LoadError::LengthSkew {
            ids: id_count,
            rows,
            tolerance: config.max_length_skew.unwrap_or(0),
        });
    }

    // Truncation is only correct if the tail is what went missing; a
    // reordering upstream would pair every row after it with the wrong id.
    let kept = id_count.min(rows);
    tracing::warn!(
        "Embedded id count ({}) and vector rows ({}) disagree; keeping the first {}",
        id_count,
        rows,
        kept
    );
    ids.truncate(kept);
    matrix.truncate(kept);

    Ok(Some(Truncation {
        ids: id_count,
        rows,
        kept,
    }))
}

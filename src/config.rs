use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Multiplier applied to cosine similarity before it is shown to callers.
pub const DEFAULT_SCORE_SCALE: f32 = 100.0;

/// Where the loader reads vectors from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorSource {
    /// A `.vdb` or `.npy` matrix written by the export step in ascending id order.
    File(PathBuf),
    /// The record store's own embedding fields, read in one ordered pass.
    Catalog,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub vectors: VectorSource,
    /// `similarity_score = similarity * score_scale`
    pub score_scale: f32,
    /// Largest `|ids - rows|` difference that is repaired by truncation.
    /// `None` always truncates; a larger skew fails the load.
    pub max_length_skew: Option<usize>,
}

impl EngineConfig {
    pub fn new(vectors: VectorSource) -> Self {
        Self {
            vectors,
            score_scale: DEFAULT_SCORE_SCALE,
            max_length_skew: None,
        }
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self::new(VectorSource::File(path.into()))
    }

    pub fn from_catalog() -> Self {
        Self::new(VectorSource::Catalog)
    }

    pub fn with_score_scale(mut self, scale: f32) -> Self {
        self.score_scale = scale;
        self
    }

    pub fn with_max_length_skew(mut self, skew: Option<usize>) -> Self {
        self.max_length_skew = skew;
        self
    }

    /// Whether a skew of `skew` rows may be repaired by truncating.
    pub fn tolerates_skew(&self, skew: usize) -> bool {
        self.max_length_skew.map_or(true, |max| skew <= max)
    }
}

//! Result and HTTP body types

use serde::{Deserialize, Serialize};

use crate::catalog::{Record, RecordId};

/// Output key carrying the rescaled similarity.
pub const SCORE_FIELD: &str = "similarity_score";

/// A search hit merged with its full record.
///
/// Serializes as the record's own fields plus `similarity_score`; the raw
/// embedding has already been stripped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    #[serde(skip)]
    pub id: RecordId,
    /// Cosine similarity as computed by the index.
    #[serde(skip)]
    pub similarity: f32,
    #[serde(rename = "similarity_score")]
    pub score: f32,
    #[serde(flatten)]
    pub record: Record,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub vector: Vec<f32>,

    /// Negative values count as zero, which still yields one result.
    #[serde(default = "default_top_k")]
    pub top_k: i64,
}

fn default_top_k() -> i64 {
    10
}

impl SearchRequest {
    pub fn effective_top_k(&self) -> usize {
        usize::try_from(self.top_k.max(0)).unwrap_or(usize::MAX)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<ScoredRecord>,
    pub query_time_ms: f64,
    /// Vector store generation that answered the query.
    pub generation: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub ready: bool,
    pub vectors_loaded: usize,
    pub dimensions: usize,
    pub memory_mb: f64,
    pub generation: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

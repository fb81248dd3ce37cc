//! semdex: exact semantic search over a record catalog
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      HTTP API (axum)                        │
//! │      POST /search, GET /records/:id, POST /admin/reload     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  SearchEngine (ArcSwap)                     │
//! │   snapshot → top-k → fetch records → re-rank → strip        │
//! └─────────────────────────────────────────────────────────────┘
//!                 │                              │
//!                 ▼                              ▼
//! ┌───────────────────────────────┐ ┌───────────────────────────┐
//! │   VectorStore (ids + index)   │ │   RecordStore (catalog)   │
//! │  built by the loader from a   │ │  JSON documents keyed by  │
//! │  .vdb/.npy file or catalog    │ │  primary and legacy id    │
//! └───────────────────────────────┘ └───────────────────────────┘
//! ```

pub mod catalog;
pub mod config;
pub mod engine;
pub mod export;
pub mod loader;
pub mod model;
pub mod server;
pub mod store;

pub use catalog::{FieldNames, JsonCatalog, Record, RecordId, RecordStore};
pub use config::{EngineConfig, VectorSource};
pub use engine::{SearchEngine, SearchError};
pub use loader::{load_vector_store, LoadError, LoadStatus};
pub use model::ScoredRecord;
pub use store::VectorStore;

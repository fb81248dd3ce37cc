//! Similarity query engine
//!
//! # Concurrency Model
//!
//! The loaded [`VectorStore`] sits behind an [`ArcSwap`]. Queries take a
//! snapshot (`load_full`) and run against it to completion without holding
//! any lock; a reload builds the next generation off to the side and
//! publishes it with a single pointer store. Queries already in flight keep
//! the previous generation alive through their `Arc` until they finish.
//!
//! Reloads are serialized by `reload_lock`, so generations are published in
//! the order they were numbered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use parking_lot::Mutex;
use semdex_core::IndexError;
use thiserror::Error;

use crate::catalog::{Record, RecordId, RecordStore};
use crate::config::EngineConfig;
use crate::loader::{load_vector_store, LoadError, LoadStatus, Loaded};
use crate::model::{ScoredRecord, SCORE_FIELD};
use crate::store::VectorStore;

#[derive(Error, Debug)]
pub enum SearchError {
    /// The query does not fit the loaded index; a caller bug.
    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("record store lookup failed: {0:#}")]
    Catalog(anyhow::Error),
}

pub struct SearchEngine {
    config: EngineConfig,
    catalog: Arc<dyn RecordStore>,
    current: ArcSwap<VectorStore>,
    last_status: ArcSwapOption<LoadStatus>,
    reload_lock: Mutex<()>,
    generation: AtomicU64,
}

impl SearchEngine {
    /// An engine serving the empty generation 0 until [`load`](Self::load) runs.
    pub fn new(catalog: Arc<dyn RecordStore>, config: EngineConfig) -> Self {
        Self {
            config,
            catalog,
            current: ArcSwap::from_pointee(VectorStore::empty(0)),
            last_status: ArcSwapOption::empty(),
            reload_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Build and load the first generation.
    pub fn open(catalog: Arc<dyn RecordStore>, config: EngineConfig) -> Self {
        let engine = Self::new(catalog, config);
        engine.load();
        engine
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Build a new generation from the record store as it is now.
    ///
    /// Never fails: a load error is logged and published as an empty store,
    /// so search answers `[]` until the next successful reload.
    pub fn load(&self) -> LoadStatus {
        self.rebuild(false)
    }

    /// Like [`load`](Self::load), but first asks the record store to re-read
    /// its backing storage.
    pub fn reload(&self) -> LoadStatus {
        self.rebuild(true)
    }

    fn rebuild(&self, refresh: bool) -> LoadStatus {
        let _guard = self.reload_lock.lock();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let refreshed = if refresh {
            self.catalog.refresh().map_err(LoadError::Catalog)
        } else {
            Ok(())
        };
        let result = refreshed
            .and_then(|()| load_vector_store(self.catalog.as_ref(), &self.config, generation));

        let Loaded { store, status } = match result {
            Ok(loaded) => loaded,
            Err(err) => {
                tracing::error!(
                    "Vector store load failed, serving empty generation {}: {}",
                    generation,
                    err
                );
                Loaded {
                    store: VectorStore::empty(generation),
                    status: LoadStatus::Failed {
                        generation,
                        error: err.to_string(),
                    },
                }
            }
        };

        self.current.store(Arc::new(store));
        self.last_status.store(Some(Arc::new(status.clone())));
        status
    }

    /// The generation currently answering queries.
    pub fn snapshot(&self) -> Arc<VectorStore> {
        self.current.load_full()
    }

    /// Outcome of the most recent load, if one has run.
    pub fn status(&self) -> Option<Arc<LoadStatus>> {
        self.last_status.load_full()
    }

    /// Top-k records by cosine similarity to `query`, best first.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredRecord>, SearchError> {
        let store = self.snapshot();
        self.search_in(&store, query, top_k)
    }

    /// Search a specific generation.
    pub fn search_in(
        &self,
        store: &VectorStore,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredRecord>, SearchError> {
        let hits = store.nearest(query, top_k)?;
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<RecordId> = hits.iter().map(|h| h.id).collect();
        let fields = self.catalog.fields();
        let fetched = self
            .catalog
            .fetch_many(&ids)
            .map_err(SearchError::Catalog)?;

        // The store returns records in no particular order; join on id and
        // walk the hits so rank order survives.
        let mut by_id: HashMap<RecordId, Record> = fetched
            .into_iter()
            .filter_map(|record| fields.record_id(&record).map(|id| (id, record)))
            .collect();

        let scale = self.config.score_scale;
        let results: Vec<ScoredRecord> = hits
            .iter()
            .filter_map(|hit| {
                let mut record = by_id.remove(&hit.id)?;
                fields.strip_embedding(&mut record);
                record.remove(SCORE_FIELD);
                Some(ScoredRecord {
                    id: hit.id,
                    similarity: hit.similarity,
                    score: hit.similarity * scale,
                    record,
                })
            })
            .collect();

        if results.len() < hits.len() {
            tracing::debug!(
                "Dropped {} hits with no record in the store",
                hits.len() - results.len()
            );
        }

        Ok(results)
    }

    /// Look a record up by primary id, falling back to the legacy id.
    pub fn get_by_id(&self, id: RecordId) -> Result<Option<Record>, SearchError> {
        let record = self.catalog.fetch_one(id).map_err(SearchError::Catalog)?;
        let fields = self.catalog.fields();
        Ok(record.map(|mut r| {
            fields.strip_embedding(&mut r);
            r
        }))
    }
}

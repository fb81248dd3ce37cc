use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use semdex::catalog::{FieldNames, JsonCatalog, Record, RecordId, RecordStore};
use semdex::config::EngineConfig;
use semdex::engine::SearchEngine;
use semdex::export::export_embeddings;
use semdex::loader::{EmptyReason, LoadStatus};
use semdex_core::format::write_matrix;
use serde_json::{json, Value};
use tempfile::tempdir;

/// Wraps a catalog and misbehaves in the ways a real document store may:
/// batch fetches come back in reverse order, some records vanish after the
/// index was built, and the embedded id listing can lose its ordering.
struct UnrulyStore {
    inner: JsonCatalog,
    hidden: RwLock<HashSet<RecordId>>,
    scramble_ids: bool,
}

impl UnrulyStore {
    fn new(inner: JsonCatalog) -> Self {
        Self {
            inner,
            hidden: RwLock::new(HashSet::new()),
            scramble_ids: false,
        }
    }

    fn hide(&self, id: i64) {
        self.hidden.write().insert(RecordId(id));
    }
}

impl RecordStore for UnrulyStore {
    fn fields(&self) -> &FieldNames {
        self.inner.fields()
    }

    fn embedded_ids(&self) -> anyhow::Result<Vec<RecordId>> {
        let mut ids = self.inner.embedded_ids()?;
        if self.scramble_ids && ids.len() > 1 {
            ids.swap(0, 1);
        }
        Ok(ids)
    }

    fn embedded_vectors(&self) -> anyhow::Result<Vec<(RecordId, Vec<f32>)>> {
        self.inner.embedded_vectors()
    }

    fn fetch_many(&self, ids: &[RecordId]) -> anyhow::Result<Vec<Record>> {
        let hidden = self.hidden.read();
        let fields = self.inner.fields();
        let mut records: Vec<Record> = self
            .inner
            .fetch_many(ids)?
            .into_iter()
            .filter(|r| fields.record_id(r).map_or(true, |id| !hidden.contains(&id)))
            .collect();
        records.reverse();
        Ok(records)
    }

    fn fetch_one(&self, id: RecordId) -> anyhow::Result<Option<Record>> {
        self.inner.fetch_one(id)
    }
}

fn compass_catalog() -> JsonCatalog {
    JsonCatalog::from_values(
        FieldNames::default(),
        vec![
            json!({"id": 1, "idMal": 4001, "title": "east", "embedding": [1.0, 0.0]}),
            json!({"id": 2, "idMal": 4002, "title": "north", "embedding": [0.0, 1.0]}),
            json!({"id": 3, "title": "mostly east", "embedding": [0.9, 0.1]}),
            json!({"id": 4, "title": "west", "embedding": [-1.0, 0.0]}),
        ],
    )
    .unwrap()
}

fn write_compass_vectors(path: &Path) {
    write_matrix(path, 2, [[1.0f32, 0.0], [0.0, 1.0], [0.9, 0.1], [-1.0, 0.0]]).unwrap();
}

fn ranked_ids(engine: &SearchEngine, query: &[f32], top_k: usize) -> Vec<i64> {
    engine
        .search(query, top_k)
        .unwrap()
        .iter()
        .map(|r| r.id.0)
        .collect()
}

#[test]
fn test_compass_scenario_from_vector_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("embeddings.vdb");
    write_compass_vectors(&path);

    let engine = SearchEngine::open(Arc::new(compass_catalog()), EngineConfig::from_file(&path));
    assert!(engine.status().unwrap().is_ready());

    let results = engine.search(&[1.0, 0.0], 2).unwrap();
    let ids: Vec<i64> = results.iter().map(|r| r.id.0).collect();
    assert_eq!(ids, vec![1, 3]);
    assert!(results[0].score > results[1].score);
    assert_eq!(results[0].record["title"], "east");
    assert_eq!(results[1].record["title"], "mostly east");
}

#[test]
fn test_top_k_is_clamped() {
    let engine = SearchEngine::open(Arc::new(compass_catalog()), EngineConfig::from_catalog());

    assert_eq!(engine.search(&[0.0, 1.0], 100).unwrap().len(), 4);
    assert_eq!(ranked_ids(&engine, &[0.0, 1.0], 0), vec![2]);
}

#[test]
fn test_rank_order_survives_reordered_fetch() {
    let store = Arc::new(UnrulyStore::new(compass_catalog()));
    let engine = SearchEngine::open(store, EngineConfig::from_catalog());

    let results = engine.search(&[1.0, 0.0], 4).unwrap();
    let ids: Vec<i64> = results.iter().map(|r| r.id.0).collect();
    assert_eq!(ids, vec![1, 3, 2, 4]);
    assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
}

#[test]
fn test_missing_records_are_dropped_in_order() {
    let store = Arc::new(UnrulyStore::new(compass_catalog()));
    let engine = SearchEngine::open(store.clone(), EngineConfig::from_catalog());

    store.hide(3);
    assert_eq!(ranked_ids(&engine, &[1.0, 0.0], 4), vec![1, 2, 4]);

    store.hide(1);
    assert_eq!(ranked_ids(&engine, &[1.0, 0.0], 2), Vec::<i64>::new());
}

#[test]
fn test_unordered_id_listing_fails_the_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("embeddings.vdb");
    write_compass_vectors(&path);

    let mut store = UnrulyStore::new(compass_catalog());
    store.scramble_ids = true;
    let engine = SearchEngine::open(Arc::new(store), EngineConfig::from_file(&path));

    let status = engine.status().unwrap();
    match &*status {
        LoadStatus::Failed { error, .. } => assert!(error.contains("not strictly ascending")),
        other => panic!("expected a failed load, got {:?}", other),
    }
    assert!(engine.search(&[1.0, 0.0], 2).unwrap().is_empty());
}

#[test]
fn test_embeddings_never_leak() {
    let engine = SearchEngine::open(Arc::new(compass_catalog()), EngineConfig::from_catalog());

    for result in engine.search(&[0.3, 0.7], 10).unwrap() {
        let value = serde_json::to_value(&result).unwrap();
        assert!(value.get("embedding").is_none());
    }
    for id in [1, 2, 3, 4, 4001] {
        let record = engine.get_by_id(RecordId(id)).unwrap().unwrap();
        assert!(!record.contains_key("embedding"));
    }
}

#[test]
fn test_get_by_id_primary_and_legacy() {
    let catalog = JsonCatalog::from_values(
        FieldNames::default(),
        vec![
            json!({"id": 7, "idMal": 70, "title": "seven"}),
            json!({"id": 70, "title": "seventy"}),
            json!({"id": 8, "idMal": 80, "title": "eight"}),
        ],
    )
    .unwrap();
    let engine = SearchEngine::new(Arc::new(catalog), EngineConfig::from_catalog());

    assert_eq!(engine.get_by_id(RecordId(80)).unwrap().unwrap()["title"], "eight");
    // 70 is a primary id as well as record 7's legacy id.
    assert_eq!(engine.get_by_id(RecordId(70)).unwrap().unwrap()["title"], "seventy");
    assert!(engine.get_by_id(RecordId(9)).unwrap().is_none());
}

#[test]
fn test_empty_sources_give_empty_store() {
    let catalog = JsonCatalog::from_values(FieldNames::default(), vec![json!({"id": 1})]).unwrap();
    let engine = SearchEngine::open(Arc::new(catalog), EngineConfig::from_catalog());
    assert!(matches!(
        *engine.status().unwrap(),
        LoadStatus::Empty { reason: EmptyReason::NoEmbeddedRecords, .. }
    ));
    assert!(engine.search(&[1.0, 0.0, 0.0], 3).unwrap().is_empty());

    let dir = tempdir().unwrap();
    let engine = SearchEngine::open(
        Arc::new(compass_catalog()),
        EngineConfig::from_file(dir.path().join("missing.vdb")),
    );
    assert!(matches!(
        *engine.status().unwrap(),
        LoadStatus::Empty { reason: EmptyReason::MissingVectorFile, .. }
    ));
    assert!(engine.search(&[1.0, 0.0], 3).unwrap().is_empty());
}

#[test]
fn test_skew_tolerance() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("embeddings.vdb");
    // Two rows for four embedded ids.
    write_matrix(&path, 2, [[1.0f32, 0.0], [0.0, 1.0]]).unwrap();

    let lenient = SearchEngine::open(Arc::new(compass_catalog()), EngineConfig::from_file(&path));
    assert_eq!(lenient.snapshot().ids(), &[RecordId(1), RecordId(2)]);
    assert_eq!(ranked_ids(&lenient, &[0.0, 1.0], 5), vec![2, 1]);

    let strict = SearchEngine::open(
        Arc::new(compass_catalog()),
        EngineConfig::from_file(&path).with_max_length_skew(Some(1)),
    );
    assert!(matches!(*strict.status().unwrap(), LoadStatus::Failed { .. }));
    assert!(strict.snapshot().is_empty());
}

#[test]
fn test_export_then_load_matches_catalog_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("exported.vdb");
    let catalog = Arc::new(compass_catalog());

    export_embeddings(catalog.as_ref(), &path).unwrap();

    let from_file = SearchEngine::open(catalog.clone(), EngineConfig::from_file(&path));
    let from_catalog = SearchEngine::open(catalog, EngineConfig::from_catalog());

    for query in [[1.0f32, 0.0], [0.0, 1.0], [-0.5, 0.2], [0.6, 0.6]] {
        assert_eq!(
            ranked_ids(&from_file, &query, 4),
            ranked_ids(&from_catalog, &query, 4)
        );
    }
}

#[test]
fn test_npy_vector_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("embeddings.npy");

    let header = "{'descr': '<f4', 'fortran_order': False, 'shape': (4, 2), }";
    let mut header = header.to_string();
    // magic (6) + version (2) + length (2) + header must be a multiple of 64
    while (10 + header.len() + 1) % 64 != 0 {
        header.push(' ');
    }
    header.push('\n');

    let mut bytes = b"\x93NUMPY\x01\x00".to_vec();
    bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
    bytes.extend_from_slice(header.as_bytes());
    for x in [1.0f32, 0.0, 0.0, 1.0, 0.9, 0.1, -1.0, 0.0] {
        bytes.extend_from_slice(&x.to_le_bytes());
    }
    std::fs::write(&path, bytes).unwrap();

    let engine = SearchEngine::open(Arc::new(compass_catalog()), EngineConfig::from_file(&path));
    assert_eq!(ranked_ids(&engine, &[1.0, 0.0], 2), vec![1, 3]);
}

#[test]
fn test_snapshot_outlives_reload() {
    let dir = tempdir().unwrap();
    let catalog_path = dir.path().join("catalog.jsonl");
    let write_catalog = |rows: &[Value]| {
        let text: Vec<String> = rows.iter().map(|r| r.to_string()).collect();
        std::fs::write(&catalog_path, text.join("\n")).unwrap();
    };

    write_catalog(&[
        json!({"id": 10, "embedding": [1.0, 0.0]}),
        json!({"id": 20, "embedding": [0.0, 1.0]}),
    ]);
    let catalog = JsonCatalog::open(&catalog_path, FieldNames::default()).unwrap();
    let engine = SearchEngine::open(Arc::new(catalog), EngineConfig::from_catalog());

    let before = engine.snapshot();
    assert_eq!(before.generation(), 1);

    write_catalog(&[
        json!({"id": 10, "embedding": [0.0, 1.0]}),
        json!({"id": 20, "embedding": [1.0, 0.0]}),
        json!({"id": 30, "embedding": [0.7, 0.7]}),
    ]);
    let status = engine.reload();
    assert_eq!(status.generation(), 2);

    // The old generation still answers with its own pairing.
    let old_hits = before.nearest(&[1.0, 0.0], 1).unwrap();
    assert_eq!(old_hits[0].id, RecordId(10));
    assert_eq!(before.len(), 2);

    let after = engine.snapshot();
    assert_eq!(after.generation(), 2);
    assert_eq!(after.len(), 3);
    assert_eq!(ranked_ids(&engine, &[1.0, 0.0], 1), vec![20]);
}

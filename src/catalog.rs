//! Record store interface and the JSON document catalog
//!
//! Records are schemaless JSON objects keyed by an integer [`RecordId`]. The
//! store answers three questions for the search core: which records carry an
//! embedding (in ascending id order), what are the full records for a set of
//! ids, and which record answers to a primary or legacy id.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Stable external identifier of a catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        RecordId(value)
    }
}

/// A full catalog entry.
pub type Record = Map<String, Value>;

/// Names of the fields the search core reads from a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldNames {
    pub id: String,
    pub legacy_id: String,
    pub embedding: String,
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            id: "id".to_string(),
            legacy_id: "idMal".to_string(),
            embedding: "embedding".to_string(),
        }
    }
}

impl FieldNames {
    pub fn record_id(&self, record: &Record) -> Option<RecordId> {
        record.get(&self.id).and_then(value_as_id)
    }

    pub fn legacy_id(&self, record: &Record) -> Option<RecordId> {
        record.get(&self.legacy_id).and_then(value_as_id)
    }

    /// An embedding is present when the field exists and is not `null`.
    pub fn has_embedding(&self, record: &Record) -> bool {
        record
            .get(&self.embedding)
            .is_some_and(|v| !v.is_null())
    }

    /// Parse the embedding field as a float vector.
    pub fn embedding(&self, record: &Record) -> Option<Vec<f32>> {
        let values = record.get(&self.embedding)?.as_array()?;
        values
            .iter()
            .map(|v| v.as_f64().map(|x| x as f32))
            .collect()
    }

    /// Drop the raw embedding from a record. Returns whether one was present.
    pub fn strip_embedding(&self, record: &mut Record) -> bool {
        record.remove(&self.embedding).is_some()
    }
}

/// Integer ids may arrive as JSON integers or as integral floats.
fn value_as_id(value: &Value) -> Option<RecordId> {
    if let Some(i) = value.as_i64() {
        return Some(RecordId(i));
    }
    let f = value.as_f64()?;
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(RecordId(f as i64))
    } else {
        None
    }
}

/// Read-only view of the record store consumed by the search core.
pub trait RecordStore: Send + Sync {
    /// Field names this store indexes records by.
    fn fields(&self) -> &FieldNames;

    /// Ids of every record that has an embedding, ascending.
    fn embedded_ids(&self) -> Result<Vec<RecordId>>;

    /// `(id, embedding)` of every record that has an embedding, ascending by id.
    ///
    /// Ids and vectors come from the same read, so they cannot drift apart.
    fn embedded_vectors(&self) -> Result<Vec<(RecordId, Vec<f32>)>>;

    /// Full records for `ids`. Missing ids are skipped; the order of the
    /// returned records is unspecified.
    fn fetch_many(&self, ids: &[RecordId]) -> Result<Vec<Record>>;

    /// The record whose primary id, or failing that legacy id, equals `id`.
    fn fetch_one(&self, id: RecordId) -> Result<Option<Record>>;

    /// Re-read backing storage, if any.
    fn refresh(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct CatalogData {
    records: BTreeMap<RecordId, Record>,
    /// legacy id -> primary id; the lowest primary id wins a collision
    legacy: HashMap<RecordId, RecordId>,
}

impl CatalogData {
    fn build(fields: &FieldNames, records: Vec<Record>) -> Result<Self> {
        let mut data = CatalogData::default();
        for record in records {
            let id = fields
                .record_id(&record)
                .ok_or_else(|| anyhow!("record without an integer '{}' field", fields.id))?;
            if data.records.insert(id, record).is_some() {
                bail!("duplicate record id {}", id);
            }
        }
        data.reindex_legacy(fields);
        Ok(data)
    }

    fn reindex_legacy(&mut self, fields: &FieldNames) {
        self.legacy.clear();
        for (id, record) in &self.records {
            if let Some(legacy) = fields.legacy_id(record) {
                self.legacy.entry(legacy).or_insert(*id);
            }
        }
    }
}

/// In-memory catalog of JSON documents, optionally loaded from a file.
///
/// A `.jsonl` file holds one record per line; anything else is read as a
/// single JSON array of records.
pub struct JsonCatalog {
    fields: FieldNames,
    source: Option<PathBuf>,
    data: RwLock<CatalogData>,
}

impl JsonCatalog {
    pub fn new(fields: FieldNames) -> Self {
        Self {
            fields,
            source: None,
            data: RwLock::new(CatalogData::default()),
        }
    }

    pub fn from_records<I>(fields: FieldNames, records: I) -> Result<Self>
    where
        I: IntoIterator<Item = Record>,
    {
        let data = CatalogData::build(&fields, records.into_iter().collect())?;
        Ok(Self {
            fields,
            source: None,
            data: RwLock::new(data),
        })
    }

    /// Build from JSON values, each of which must be an object.
    pub fn from_values<I>(fields: FieldNames, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = Value>,
    {
        let records = values
            .into_iter()
            .enumerate()
            .map(|(i, v)| match v {
                Value::Object(map) => Ok(map),
                other => Err(anyhow!("catalog entry {} is not an object: {}", i, other)),
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_records(fields, records)
    }

    pub fn open<P: AsRef<Path>>(path: P, fields: FieldNames) -> Result<Self> {
        let path = path.as_ref();
        let records = read_documents(path)?;
        let data = CatalogData::build(&fields, records)
            .with_context(|| format!("indexing catalog {:?}", path))?;
        tracing::info!("Loaded {} catalog records from {:?}", data.records.len(), path);
        Ok(Self {
            fields,
            source: Some(path.to_path_buf()),
            data: RwLock::new(data),
        })
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Insert or replace a record. Returns its id.
    pub fn insert(&self, record: Record) -> Result<RecordId> {
        let id = self
            .fields
            .record_id(&record)
            .ok_or_else(|| anyhow!("record without an integer '{}' field", self.fields.id))?;
        let mut data = self.data.write();
        data.records.insert(id, record);
        data.reindex_legacy(&self.fields);
        Ok(id)
    }

    pub fn remove(&self, id: RecordId) -> Option<Record> {
        let mut data = self.data.write();
        let removed = data.records.remove(&id);
        if removed.is_some() {
            data.reindex_legacy(&self.fields);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.data.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().records.is_empty()
    }
}

impl RecordStore for JsonCatalog {
    fn fields(&self) -> &FieldNames {
        &self.fields
    }

    fn embedded_ids(&self) -> Result<Vec<RecordId>> {
        let data = self.data.read();
        Ok(data
            .records
            .iter()
            .filter(|(_, r)| self.fields.has_embedding(r))
            .map(|(id, _)| *id)
            .collect())
    }

    fn embedded_vectors(&self) -> Result<Vec<(RecordId, Vec<f32>)>> {
        let data = self.data.read();
        data.records
            .iter()
            .filter(|(_, r)| self.fields.has_embedding(r))
            .map(|(id, r)| {
                let vector = self.fields.embedding(r).ok_or_else(|| {
                    anyhow!(
                        "record {} has a '{}' field that is not a numeric array",
                        id,
                        self.fields.embedding
                    )
                })?;
                Ok((*id, vector))
            })
            .collect()
    }

    fn fetch_many(&self, ids: &[RecordId]) -> Result<Vec<Record>> {
        let wanted: BTreeSet<RecordId> = ids.iter().copied().collect();
        let data = self.data.read();
        Ok(wanted
            .into_iter()
            .filter_map(|id| data.records.get(&id).cloned())
            .collect())
    }

    fn fetch_one(&self, id: RecordId) -> Result<Option<Record>> {
        let data = self.data.read();
        let primary = if data.records.contains_key(&id) {
            Some(id)
        } else {
            data.legacy.get(&id).copied()
        };
        Ok(primary.and_then(|p| data.records.get(&p).cloned()))
    }

    fn refresh(&self) -> Result<()> {
        let Some(path) = &self.source else {
            return Ok(());
        };
        let records = read_documents(path)?;
        let fresh = CatalogData::build(&self.fields, records)
            .with_context(|| format!("indexing catalog {:?}", path))?;
        let count = fresh.records.len();
        *self.data.write() = fresh;
        tracing::info!("Refreshed catalog {:?}: {} records", path, count);
        Ok(())
    }
}

fn read_documents(path: &Path) -> Result<Vec<Record>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading catalog {:?}", path))?;

    let is_lines = path.extension().and_then(|e| e.to_str()) == Some("jsonl");
    let values: Vec<Value> = if is_lines {
        text.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line)
                    .with_context(|| format!("parsing {:?} line {}", path, n + 1))
            })
            .collect::<Result<_>>()?
    } else {
        serde_json::from_str(&text).with_context(|| format!("parsing {:?}", path))?
    };

    values
        .into_iter()
        .enumerate()
        .map(|(i, v)| match v {
            Value::Object(map) => Ok(map),
            other => Err(anyhow!("{:?}: entry {} is not an object: {}", path, i, other)),
        })
        .collect()
}

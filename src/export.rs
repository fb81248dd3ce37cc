//! Offline export of catalog embeddings to a `.vdb` file
//!
//! Rows are written in ascending [`RecordId`] order, the same order
//! [`RecordStore::embedded_ids`] reports, which is what lets the loader pair
//! row `i` with id `i` later on.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use semdex_core::format::MatrixWriter;
use serde::Serialize;

use crate::catalog::{RecordId, RecordStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportReport {
    pub path: PathBuf,
    pub rows: usize,
    pub dim: usize,
    pub first_id: RecordId,
    pub last_id: RecordId,
}

/// Write every embedded record's vector to `output`.
///
/// The file is written next to `output` and renamed into place, so a loader
/// never observes a half-written matrix.
pub fn export_embeddings<P: AsRef<Path>>(catalog: &dyn RecordStore, output: P) -> Result<ExportReport> {
    let output = output.as_ref();
    let pairs = catalog
        .embedded_vectors()
        .context("reading embeddings from the record store")?;

    let Some((first_id, first)) = pairs.first() else {
        bail!("no records with embeddings to export");
    };
    let (first_id, dim) = (*first_id, first.len());
    if dim == 0 {
        bail!("record {} has an empty embedding", first_id);
    }

    let tmp = tmp_path(output);
    let written = write_rows(&tmp, dim, &pairs).and_then(|(rows, last_id)| {
        std::fs::rename(&tmp, output)
            .with_context(|| format!("moving {:?} into place at {:?}", tmp, output))?;
        Ok((rows, last_id))
    });
    let (rows, last_id) = match written {
        Ok(done) => done,
        Err(e) => {
            if let Err(cleanup) = std::fs::remove_file(&tmp) {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Could not remove {:?}: {}", tmp, cleanup);
                }
            }
            return Err(e);
        }
    };

    tracing::info!("Exported {} vectors of dimension {} to {:?}", rows, dim, output);

    Ok(ExportReport {
        path: output.to_path_buf(),
        rows,
        dim,
        first_id,
        last_id,
    })
}

/// Stream `pairs` into a fresh matrix file at `path`, checking ids ascend
/// and every row has width `dim`.
fn write_rows(path: &Path, dim: usize, pairs: &[(RecordId, Vec<f32>)]) -> Result<(usize, RecordId)> {
    let mut writer = MatrixWriter::create(path, dim)
        .with_context(|| format!("creating {:?}", path))?;

    let mut last_id: Option<RecordId> = None;
    for (id, vector) in pairs {
        if let Some(last) = last_id {
            if *id <= last {
                bail!("record store returned id {} after {}; export needs ascending ids", id, last);
            }
        }
        if vector.len() != dim {
            bail!(
                "record {} has a {}-dimensional embedding, expected {}",
                id,
                vector.len(),
                dim
            );
        }
        writer.write_row(vector)?;
        last_id = Some(*id);
    }
    let rows = writer.finish()? as usize;
    match last_id {
        Some(last) => Ok((rows, last)),
        None => bail!("no records with embeddings to export"),
    }
}

fn tmp_path(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    output.with_file_name(name)
}

//! Blocking filesystem backend: one JSON document per run record, plus
//! named documents for runtime state (global scope, wait ledger).
//!
//! Layout under the data directory:
//!
//! ```text
//! runs/<run_id>.json        one record per run
//! index/<goal_id>.json      run ids per goal
//! index/<goal_id>.lock      cross-process lock per index key
//! documents/<name>.json     named runtime documents
//! ```
//!
//! Writes land via temp-file-plus-rename so a crash mid-write never leaves a
//! truncated document behind.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;

use super::index;
use crate::run::RunRecord;

pub(crate) struct FileBackend {
    data_dir: PathBuf,
}

impl FileBackend {
    pub(crate) fn new(data_dir: impl Into<PathBuf>) -> io::Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(data_dir.join("runs"))?;
        fs::create_dir_all(data_dir.join("index"))?;
        fs::create_dir_all(data_dir.join("documents"))?;
        Ok(Self { data_dir })
    }

    pub(crate) fn index_dir(&self) -> PathBuf {
        self.data_dir.join("index")
    }

    fn run_path(&self, run_id: &str) -> PathBuf {
        self.data_dir.join("runs").join(format!("{run_id}.json"))
    }

    fn document_path(&self, name: &str) -> PathBuf {
        self.data_dir
            .join("documents")
            .join(format!("{name}.json"))
    }

    fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)
    }

    /// Persist a run record and register it in its goal's index.
    pub(crate) fn write_run(&self, record: &RunRecord) -> io::Result<()> {
        let bytes = serde_json::to_vec_pretty(record).map_err(io::Error::other)?;
        Self::write_atomic(&self.run_path(&record.id), &bytes)?;
        index::add(&self.index_dir(), &record.goal_id, &record.id)
    }

    pub(crate) fn read_run(&self, run_id: &str) -> io::Result<Option<RunRecord>> {
        match fs::read(self.run_path(run_id)) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub(crate) fn write_document(&self, name: &str, value: &Value) -> io::Result<()> {
        let bytes = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
        Self::write_atomic(&self.document_path(name), &bytes)
    }

    pub(crate) fn read_document(&self, name: &str) -> io::Result<Option<Value>> {
        match fs::read(self.document_path(name)) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

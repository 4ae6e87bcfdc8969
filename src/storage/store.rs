//! The run store: durable, lockable, cached persistence of run records and
//! goal indexes, safe under concurrent readers and writers from multiple OS
//! processes.

use miette::Diagnostic;
use parking_lot::Mutex;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

use super::backend::FileBackend;
use super::cache::TtlCache;
use super::index;
use super::locks::LockTable;
use super::writer::{self, WriteJob, WriterConfig};
use crate::run::RunRecord;

/// Tuning knobs for a [`RunStore`].
#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    pub cache_ttl: Duration,
    pub max_cache_size: usize,
    pub batch_interval: Duration,
    pub max_batch_size: usize,
    pub flush_retries: u32,
    pub max_locks: usize,
}

impl StoreConfig {
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            cache_ttl: Duration::from_secs(300),
            max_cache_size: 256,
            batch_interval: Duration::from_millis(100),
            max_batch_size: 32,
            flush_retries: 3,
            max_locks: 64,
        }
    }

    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_max_cache_size(mut self, size: usize) -> Self {
        self.max_cache_size = size;
        self
    }

    #[must_use]
    pub fn with_batch_interval(mut self, interval: Duration) -> Self {
        self.batch_interval = interval;
        self
    }

    #[must_use]
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }
}

/// Errors from store operations.
#[derive(Debug, Error, Diagnostic)]
pub enum StorageError {
    #[error("storage io error: {source}")]
    #[diagnostic(code(skeinrun::storage::io))]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("storage serialization error: {source}")]
    #[diagnostic(code(skeinrun::storage::serde))]
    Serde {
        #[from]
        source: serde_json::Error,
    },

    #[error("storage worker failed: {0}")]
    #[diagnostic(code(skeinrun::storage::worker))]
    Worker(String),
}

struct WriterHandle {
    sender: flume::Sender<WriteJob>,
    task: tokio::task::JoinHandle<()>,
}

/// Durable store for run records, goal indexes, and named documents.
///
/// Lifecycle: [`start`](Self::start) spawns the background flush loop;
/// [`stop`](Self::stop) drains the queue synchronously before returning, so
/// no acknowledged write is lost across a stop. Without a started writer,
/// saves fall back to direct (unbatched) writes.
pub struct RunStore {
    backend: Arc<FileBackend>,
    cache: Arc<Mutex<TtlCache<RunRecord>>>,
    locks: LockTable,
    writer: Mutex<Option<WriterHandle>>,
    config: StoreConfig,
}

impl RunStore {
    pub fn new(config: StoreConfig) -> Result<Self, StorageError> {
        let backend = Arc::new(FileBackend::new(&config.data_dir)?);
        Ok(Self {
            backend,
            cache: Arc::new(Mutex::new(TtlCache::new(
                config.cache_ttl,
                config.max_cache_size,
            ))),
            locks: LockTable::new(config.max_locks),
            writer: Mutex::new(None),
            config,
        })
    }

    /// Start the background flush loop. Idempotent.
    pub fn start(&self) {
        let mut writer = self.writer.lock();
        if writer.is_some() {
            return;
        }
        let (sender, receiver) = flume::unbounded();
        let task = tokio::spawn(writer::run_flush_loop(
            self.backend.clone(),
            self.cache.clone(),
            receiver,
            WriterConfig {
                batch_interval: self.config.batch_interval,
                max_batch_size: self.config.max_batch_size,
                flush_retries: self.config.flush_retries,
            },
        ));
        *writer = Some(WriterHandle { sender, task });
    }

    /// Stop the flush loop, draining every queued write before returning.
    pub async fn stop(&self) -> Result<(), StorageError> {
        let handle = self.writer.lock().take();
        if let Some(WriterHandle { sender, task }) = handle {
            drop(sender); // disconnect: the loop drains and exits
            task.await.map_err(|e| StorageError::Worker(e.to_string()))?;
        }
        Ok(())
    }

    /// Queue a run record for durable persistence.
    ///
    /// The record is visible through the cache immediately; durability
    /// arrives with the next batch flush (or synchronously when the writer
    /// is not running).
    #[instrument(skip(self, run), fields(run_id = %run.id, goal = %run.goal_id))]
    pub async fn save_run(&self, run: RunRecord) -> Result<(), StorageError> {
        self.cache.lock().insert(run.id.clone(), run.clone());

        let queued = {
            let writer = self.writer.lock();
            match writer.as_ref() {
                Some(handle) => handle.sender.send(WriteJob::Run(run.clone())).is_ok(),
                None => false,
            }
        };
        if queued {
            return Ok(());
        }

        let backend = self.backend.clone();
        tokio::task::spawn_blocking(move || backend.write_run(&run))
            .await
            .map_err(|e| StorageError::Worker(e.to_string()))??;
        Ok(())
    }

    /// Load a run record by id, through the cache unless bypassed.
    ///
    /// The per-key lock is scoped to this one id and is never held across
    /// unrelated work.
    #[instrument(skip(self))]
    pub async fn load_run(
        &self,
        run_id: &str,
        use_cache: bool,
    ) -> Result<Option<RunRecord>, StorageError> {
        let key_lock = self.locks.acquire(run_id);
        let _guard = key_lock.lock().await;

        if use_cache
            && let Some(hit) = self.cache.lock().get(run_id)
        {
            return Ok(Some(hit));
        }

        let backend = self.backend.clone();
        let owned_id = run_id.to_string();
        let loaded = tokio::task::spawn_blocking(move || backend.read_run(&owned_id))
            .await
            .map_err(|e| StorageError::Worker(e.to_string()))??;

        if let Some(record) = &loaded {
            self.cache.lock().insert(run_id.to_string(), record.clone());
        }
        Ok(loaded)
    }

    /// Run ids registered under a goal, read under the index's file lock.
    pub async fn get_runs_by_goal(&self, goal_id: &str) -> Result<Vec<String>, StorageError> {
        let dir = self.backend.index_dir();
        let goal = goal_id.to_string();
        let ids = tokio::task::spawn_blocking(move || index::read(&dir, &goal))
            .await
            .map_err(|e| StorageError::Worker(e.to_string()))??;
        Ok(ids)
    }

    /// Add a run id to a goal index, under the index's file lock.
    pub async fn index_add(&self, goal_id: &str, run_id: &str) -> Result<(), StorageError> {
        let dir = self.backend.index_dir();
        let (goal, run) = (goal_id.to_string(), run_id.to_string());
        tokio::task::spawn_blocking(move || index::add(&dir, &goal, &run))
            .await
            .map_err(|e| StorageError::Worker(e.to_string()))??;
        Ok(())
    }

    /// Remove a run id from a goal index, under the index's file lock.
    pub async fn index_remove(&self, goal_id: &str, run_id: &str) -> Result<(), StorageError> {
        let dir = self.backend.index_dir();
        let (goal, run) = (goal_id.to_string(), run_id.to_string());
        tokio::task::spawn_blocking(move || index::remove(&dir, &goal, &run))
            .await
            .map_err(|e| StorageError::Worker(e.to_string()))??;
        Ok(())
    }

    /// Persist a named runtime document (global state, wait ledger).
    pub async fn save_document(&self, name: &str, value: Value) -> Result<(), StorageError> {
        let backend = self.backend.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || backend.write_document(&name, &value))
            .await
            .map_err(|e| StorageError::Worker(e.to_string()))??;
        Ok(())
    }

    /// Load a named runtime document.
    pub async fn load_document(&self, name: &str) -> Result<Option<Value>, StorageError> {
        let backend = self.backend.clone();
        let name = name.to_string();
        let value = tokio::task::spawn_blocking(move || backend.read_document(&name))
            .await
            .map_err(|e| StorageError::Worker(e.to_string()))??;
        Ok(value)
    }

    /// Drop expired cache entries.
    pub fn purge_cache(&self) {
        self.cache.lock().purge_expired();
    }

    /// Number of live cache entries (test hook).
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }
}

//! Batched background writer.
//!
//! Writes queue on a flume channel and flush either every `batch_interval`
//! or as soon as `max_batch_size` jobs have accumulated. Each flush attempt
//! retries transient failures with jittered backoff up to a fixed bound; a
//! write that exhausts its retries is logged explicitly as dropped, never
//! silently discarded, and its cache entry is evicted so a later read
//! cannot return a value that was never durably written.

use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::backend::FileBackend;
use super::cache::TtlCache;
use crate::run::RunRecord;

/// One queued write.
pub(crate) enum WriteJob {
    Run(RunRecord),
    Document { name: String, value: Value },
}

impl WriteJob {
    fn describe(&self) -> (String, String) {
        match self {
            WriteJob::Run(record) => (record.id.clone(), record.goal_id.clone()),
            WriteJob::Document { name, .. } => (name.clone(), "document".to_string()),
        }
    }
}

pub(crate) struct WriterConfig {
    pub batch_interval: Duration,
    pub max_batch_size: usize,
    pub flush_retries: u32,
}

/// Background flush loop. Runs until the sending side disconnects, then
/// drains whatever is still queued before exiting; `stop()` relies on that
/// drain to guarantee no acknowledged write is lost.
pub(crate) async fn run_flush_loop(
    backend: Arc<FileBackend>,
    cache: Arc<Mutex<TtlCache<RunRecord>>>,
    receiver: flume::Receiver<WriteJob>,
    config: WriterConfig,
) {
    loop {
        let first = match receiver.recv_async().await {
            Ok(job) => job,
            Err(flume::RecvError::Disconnected) => break,
        };

        let mut batch = vec![first];
        let deadline = tokio::time::Instant::now() + config.batch_interval;
        let mut disconnected = false;
        while batch.len() < config.max_batch_size {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, receiver.recv_async()).await {
                Ok(Ok(job)) => batch.push(job),
                Ok(Err(flume::RecvError::Disconnected)) => {
                    disconnected = true;
                    break;
                }
                Err(_) => break, // interval elapsed
            }
        }

        flush_batch(&backend, &cache, batch, &config).await;
        if disconnected {
            break;
        }
    }

    // Drain everything still queued after disconnect.
    let mut rest = Vec::new();
    while let Ok(job) = receiver.try_recv() {
        rest.push(job);
    }
    if !rest.is_empty() {
        flush_batch(&backend, &cache, rest, &config).await;
    }
}

async fn flush_batch(
    backend: &Arc<FileBackend>,
    cache: &Arc<Mutex<TtlCache<RunRecord>>>,
    batch: Vec<WriteJob>,
    config: &WriterConfig,
) {
    tracing::debug!(jobs = batch.len(), "flushing write batch");
    for job in batch {
        flush_one(backend, cache, job, config).await;
    }
}

async fn flush_one(
    backend: &Arc<FileBackend>,
    cache: &Arc<Mutex<TtlCache<RunRecord>>>,
    job: WriteJob,
    config: &WriterConfig,
) {
    let (key, goal) = job.describe();
    let job = Arc::new(job);

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let backend = backend.clone();
        let job = job.clone();
        let result = tokio::task::spawn_blocking(move || match &*job {
            WriteJob::Run(record) => backend.write_run(record),
            WriteJob::Document { name, value } => backend.write_document(name, value),
        })
        .await;

        let error = match result {
            Ok(Ok(())) => return,
            Ok(Err(io_err)) => io_err.to_string(),
            Err(join_err) => join_err.to_string(),
        };

        if attempt <= config.flush_retries {
            tracing::debug!(key = %key, attempt, error = %error, "flush attempt failed, retrying");
            let backoff = Duration::from_millis(20u64 << attempt.min(6));
            let jitter = rand::rng().random_range(0.0..0.5);
            tokio::time::sleep(backoff.mul_f64(1.0 + jitter)).await;
            continue;
        }

        // The write is gone; say so loudly and make sure the cache cannot
        // serve a value that was never made durable.
        tracing::error!(
            key = %key,
            goal = %goal,
            attempts = attempt,
            error = %error,
            "dropping write after exhausting flush retries"
        );
        cache.lock().remove(&key);
        return;
    }
}

use std::fs::OpenOptions;
use std::time::{Duration, Instant};

use serde_json::json;
use skeinrun::run::RunRecord;
use skeinrun::storage::{RunStore, StoreConfig};

fn store_in(dir: &std::path::Path) -> RunStore {
    RunStore::new(StoreConfig::new(dir)).expect("store opens")
}

#[tokio::test]
async fn save_then_load_round_trips_with_and_without_cache() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());

    let record = RunRecord::new("goal-x");
    let run_id = record.id.clone();
    store.save_run(record).await.unwrap();

    let cached = store.load_run(&run_id, true).await.unwrap().unwrap();
    assert_eq!(cached.goal_id, "goal-x");

    let direct = store.load_run(&run_id, false).await.unwrap().unwrap();
    assert_eq!(direct.id, run_id);

    assert!(store.load_run("missing", true).await.unwrap().is_none());
}

#[tokio::test]
async fn stop_drains_every_queued_write() {
    let dir = tempfile::tempdir().unwrap();
    let store = RunStore::new(
        StoreConfig::new(dir.path())
            // Long interval and large batches: stop() must not depend on a
            // flush having happened already.
            .with_batch_interval(Duration::from_secs(60))
            .with_max_batch_size(1000),
    )
    .unwrap();
    store.start();

    let mut ids = Vec::new();
    for _ in 0..20 {
        let record = RunRecord::new("goal-drain");
        ids.push(record.id.clone());
        store.save_run(record).await.unwrap();
    }
    store.stop().await.unwrap();

    // A fresh store (no writer, cold cache) sees every record on disk.
    let reopened = store_in(dir.path());
    for id in &ids {
        assert!(
            reopened.load_run(id, false).await.unwrap().is_some(),
            "run {id} must be durable after stop()"
        );
    }
    let indexed = reopened.get_runs_by_goal("goal-drain").await.unwrap();
    assert_eq!(indexed.len(), 20);
}

#[tokio::test]
async fn expired_cache_entries_are_misses_and_disk_still_serves() {
    let dir = tempfile::tempdir().unwrap();
    let store = RunStore::new(
        StoreConfig::new(dir.path()).with_cache_ttl(Duration::from_millis(30)),
    )
    .unwrap();

    let record = RunRecord::new("goal-ttl");
    let run_id = record.id.clone();
    store.save_run(record).await.unwrap();
    assert_eq!(store.cache_len(), 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    store.purge_cache();
    assert_eq!(store.cache_len(), 0, "expired entry is removed, not served");

    // The durable copy is unaffected; loading re-populates the cache.
    assert!(store.load_run(&run_id, true).await.unwrap().is_some());
    assert_eq!(store.cache_len(), 1);
}

#[tokio::test]
async fn goal_index_tracks_add_and_remove() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());

    store.index_add("goal-idx", "run-1").await.unwrap();
    store.index_add("goal-idx", "run-2").await.unwrap();
    store.index_add("goal-idx", "run-1").await.unwrap(); // idempotent
    assert_eq!(
        store.get_runs_by_goal("goal-idx").await.unwrap(),
        vec!["run-1", "run-2"]
    );

    store.index_remove("goal-idx", "run-1").await.unwrap();
    assert_eq!(
        store.get_runs_by_goal("goal-idx").await.unwrap(),
        vec!["run-2"]
    );
}

/// A reader must block while another open file description holds the index
/// lock, and must then observe the writer's result. `File::lock` conflicts
/// between open file descriptions exactly as it does between OS processes;
/// the writer here runs on its own thread with its own descriptor.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn index_reader_blocks_until_writer_releases() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());

    // Materialize the index (and its lock file) first.
    store.index_add("goal-lock", "seed").await.unwrap();

    let lock_path = dir.path().join("index").join("goal-lock.lock");
    let index_path = dir.path().join("index").join("goal-lock.json");
    let hold = Duration::from_millis(250);

    let writer = std::thread::spawn(move || {
        let file = OpenOptions::new()
            .write(true)
            .open(&lock_path)
            .expect("lock file exists");
        file.lock().expect("exclusive lock");
        std::thread::sleep(hold);
        std::fs::write(&index_path, serde_json::to_vec(&json!(["alpha"])).unwrap())
            .expect("write index under lock");
        file.unlock().expect("release");
    });

    // Let the writer thread win the lock race.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    let ids = store.get_runs_by_goal("goal-lock").await.unwrap();
    let waited = started.elapsed();

    writer.join().unwrap();
    assert!(
        waited >= Duration::from_millis(150),
        "reader returned in {waited:?}, before the writer released"
    );
    assert_eq!(ids, vec!["alpha"], "reader sees the writer's update");
}

#[tokio::test]
async fn documents_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());

    assert!(store.load_document("absent").await.unwrap().is_none());
    store
        .save_document("runtime_state", json!({"counter": 7}))
        .await
        .unwrap();
    let loaded = store.load_document("runtime_state").await.unwrap().unwrap();
    assert_eq!(loaded["counter"], json!(7));
}

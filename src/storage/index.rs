//! Goal-scoped run indexes with cross-process file locking.
//!
//! Each goal has one JSON index document listing its run ids and one lock
//! file beside it. Every read and every read/modify/write cycle holds the
//! OS-level exclusive lock on the lock file for its duration, so a
//! concurrent reader in another process blocks until a writer releases.
//! The lock is advisory but every access path in this module takes it.
//!
//! All functions here perform blocking I/O; async callers go through
//! `spawn_blocking` (see the store).

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Sanitized file stem for a key, keeping index files path-safe.
fn file_stem(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub(crate) fn index_path(dir: &Path, goal_id: &str) -> PathBuf {
    dir.join(format!("{}.json", file_stem(goal_id)))
}

pub(crate) fn lock_path(dir: &Path, goal_id: &str) -> PathBuf {
    dir.join(format!("{}.lock", file_stem(goal_id)))
}

/// Guard holding the exclusive OS lock for one index key.
///
/// The lock releases on drop (closing the file descriptor); `unlock` errors
/// at that point have no caller to report to and are ignored.
struct IndexGuard {
    lock_file: File,
}

impl IndexGuard {
    fn acquire(dir: &Path, goal_id: &str) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(lock_path(dir, goal_id))?;
        // Blocks until any concurrent holder (thread or OS process) releases.
        lock_file.lock()?;
        Ok(Self { lock_file })
    }
}

impl Drop for IndexGuard {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

fn read_ids(path: &Path) -> io::Result<Vec<String>> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

fn write_ids(path: &Path, ids: &[String]) -> io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec(ids).map_err(io::Error::other)?;
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

/// Read a goal's run ids under the index lock.
pub(crate) fn read(dir: &Path, goal_id: &str) -> io::Result<Vec<String>> {
    let _guard = IndexGuard::acquire(dir, goal_id)?;
    read_ids(&index_path(dir, goal_id))
}

/// Add a run id to a goal's index (idempotent) under the index lock.
pub(crate) fn add(dir: &Path, goal_id: &str, run_id: &str) -> io::Result<()> {
    let _guard = IndexGuard::acquire(dir, goal_id)?;
    let path = index_path(dir, goal_id);
    let mut ids = read_ids(&path)?;
    if !ids.iter().any(|id| id == run_id) {
        ids.push(run_id.to_string());
        write_ids(&path, &ids)?;
    }
    Ok(())
}

/// Remove a run id from a goal's index under the index lock.
pub(crate) fn remove(dir: &Path, goal_id: &str, run_id: &str) -> io::Result<()> {
    let _guard = IndexGuard::acquire(dir, goal_id)?;
    let path = index_path(dir, goal_id);
    let mut ids = read_ids(&path)?;
    let before = ids.len();
    ids.retain(|id| id != run_id);
    if ids.len() != before {
        write_ids(&path, &ids)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_idempotent_and_remove_deletes() {
        let dir = tempfile::tempdir().unwrap();
        add(dir.path(), "goal", "run-1").unwrap();
        add(dir.path(), "goal", "run-1").unwrap();
        add(dir.path(), "goal", "run-2").unwrap();
        assert_eq!(read(dir.path(), "goal").unwrap(), vec!["run-1", "run-2"]);

        remove(dir.path(), "goal", "run-1").unwrap();
        assert_eq!(read(dir.path(), "goal").unwrap(), vec!["run-2"]);
    }

    #[test]
    fn missing_index_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read(dir.path(), "nothing").unwrap().is_empty());
    }

    #[test]
    fn odd_goal_ids_stay_path_safe() {
        let dir = tempfile::tempdir().unwrap();
        add(dir.path(), "goal/with:odd chars", "run-1").unwrap();
        assert_eq!(read(dir.path(), "goal/with:odd chars").unwrap(), vec![
            "run-1"
        ]);
    }
}

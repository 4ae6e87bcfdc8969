//! Per-key lock table with weak handles and a bounded strong-reference LRU.
//!
//! Every logical key (a run id) gets one exclusive async lock. The table
//! holds locks weakly so an unreferenced lock can be reclaimed, while a
//! bounded LRU of strong references keeps the most recently contended locks
//! alive across acquisitions. Eviction from the LRU drops only the strong
//! reference; the lock itself is reclaimed once no caller still holds it.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use rustc_hash::FxHashMap;

/// Exclusive async lock handle for one logical key.
pub type KeyLock = Arc<tokio::sync::Mutex<()>>;

struct TableInner {
    weak: FxHashMap<String, Weak<tokio::sync::Mutex<()>>>,
    strong: FxHashMap<String, (KeyLock, u64)>,
    recency: BTreeMap<u64, String>,
    clock: u64,
}

/// Table of per-key exclusive locks.
pub struct LockTable {
    max_locks: usize,
    inner: Mutex<TableInner>,
}

impl LockTable {
    #[must_use]
    pub fn new(max_locks: usize) -> Self {
        Self {
            max_locks: max_locks.max(1),
            inner: Mutex::new(TableInner {
                weak: FxHashMap::default(),
                strong: FxHashMap::default(),
                recency: BTreeMap::new(),
                clock: 0,
            }),
        }
    }

    /// Handle for the key's lock, creating it on first use.
    ///
    /// The returned handle keeps the lock alive for as long as the caller
    /// holds it, independent of LRU eviction.
    #[must_use]
    pub fn acquire(&self, key: &str) -> KeyLock {
        let mut inner = self.inner.lock();

        let lock = match inner.weak.get(key).and_then(Weak::upgrade) {
            Some(existing) => existing,
            None => {
                let fresh: KeyLock = Arc::new(tokio::sync::Mutex::new(()));
                inner.weak.insert(key.to_string(), Arc::downgrade(&fresh));
                fresh
            }
        };

        // Refresh this key's strong slot, evicting the stalest if needed.
        inner.clock += 1;
        let stamp = inner.clock;
        if let Some((_, old_stamp)) = inner.strong.remove(key) {
            inner.recency.remove(&old_stamp);
        }
        while inner.strong.len() >= self.max_locks {
            let Some((&oldest, _)) = inner.recency.iter().next() else {
                break;
            };
            if let Some(evicted_key) = inner.recency.remove(&oldest) {
                inner.strong.remove(&evicted_key);
            }
        }
        inner.strong.insert(key.to_string(), (lock.clone(), stamp));
        inner.recency.insert(stamp, key.to_string());

        // Opportunistic sweep of dead weak entries.
        inner.weak.retain(|_, weak| weak.strong_count() > 0);

        lock
    }

    /// Number of locks currently held strongly by the table.
    #[must_use]
    pub fn strong_len(&self) -> usize {
        self.inner.lock().strong.len()
    }

    /// Number of keys with a live lock (strongly or by an outstanding
    /// caller handle).
    #[must_use]
    pub fn live_len(&self) -> usize {
        self.inner.lock().weak.len()
    }
}

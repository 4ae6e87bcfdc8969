//! Scoped shared-state store with configurable isolation.
//!
//! The store is an explicit service injected into every execution context,
//! never a process-wide singleton. Each [`StateScope`] maps to one versioned
//! key/value scope; the stream manager resolves an entry point's isolation
//! level to the scope an execution should see:
//!
//! - `Isolated` → a private `Execution` scope
//! - `Shared` → the stream's scope
//! - `Synchronized` → the stream's scope with mutations serialized through a
//!   single writer lock, so readers never observe a partial update
//!
//! The `Global` scope is visible across all streams and survives process
//! restart by being flushed to durable storage on shutdown and reloaded on
//! start (the stream manager owns that lifecycle).

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;

use crate::types::StateScope;

#[derive(Debug, Default)]
struct Scope {
    values: RwLock<FxHashMap<String, Value>>,
    version: std::sync::atomic::AtomicU32,
    /// Serializes multi-key mutation batches for synchronized handles.
    writer: tokio::sync::Mutex<()>,
}

/// Registry of live memory scopes.
///
/// Scopes are created on demand and shared by handle; dropping all handles
/// does not discard scope data (executions may resume into it later).
#[derive(Debug, Default)]
pub struct StateStore {
    scopes: RwLock<FxHashMap<StateScope, Arc<Scope>>>,
}

impl StateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to a scope, creating it if absent.
    ///
    /// `synchronized` handles route every mutation through the scope's single
    /// writer lock; plain handles only take the per-scope data lock.
    #[must_use]
    pub fn scope(&self, scope: StateScope, synchronized: bool) -> ScopeHandle {
        let inner = {
            let scopes = self.scopes.read();
            scopes.get(&scope).cloned()
        };
        let inner = match inner {
            Some(existing) => existing,
            None => {
                let mut scopes = self.scopes.write();
                scopes.entry(scope).or_default().clone()
            }
        };
        ScopeHandle {
            inner,
            synchronized,
        }
    }

    /// Snapshot of the global scope for flushing to durable storage.
    #[must_use]
    pub fn global_snapshot(&self) -> FxHashMap<String, Value> {
        self.scope(StateScope::Global, false).snapshot()
    }

    /// Replace the global scope contents, used when reloading on start.
    pub fn load_global(&self, values: FxHashMap<String, Value>) {
        let handle = self.scope(StateScope::Global, false);
        let mut guard = handle.inner.values.write();
        *guard = values;
    }
}

/// Shared handle onto one memory scope.
#[derive(Clone, Debug)]
pub struct ScopeHandle {
    inner: Arc<Scope>,
    synchronized: bool,
}

impl ScopeHandle {
    /// Read a single key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.values.read().get(key).cloned()
    }

    /// Clone the full scope contents.
    #[must_use]
    pub fn snapshot(&self) -> FxHashMap<String, Value> {
        self.inner.values.read().clone()
    }

    /// Current mutation version of the scope.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.inner
            .version
            .load(std::sync::atomic::Ordering::Acquire)
    }

    /// Apply a batch of updates atomically.
    ///
    /// The whole batch lands under one write lock, so concurrent readers see
    /// either none or all of it. Synchronized handles additionally hold the
    /// scope's writer lock for the duration, serializing batches from
    /// concurrent executions.
    pub async fn apply(&self, updates: FxHashMap<String, Value>) {
        if updates.is_empty() {
            return;
        }
        let _writer = if self.synchronized {
            Some(self.inner.writer.lock().await)
        } else {
            None
        };
        let mut values = self.inner.values.write();
        for (key, value) in updates {
            values.insert(key, value);
        }
        self.inner
            .version
            .fetch_add(1, std::sync::atomic::Ordering::AcqRel);
    }

    /// Insert a single key.
    pub async fn insert(&self, key: impl Into<String>, value: Value) {
        let mut updates = FxHashMap::default();
        updates.insert(key.into(), value);
        self.apply(updates).await;
    }
}

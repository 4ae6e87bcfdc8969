//! Concurrent storage: cached, batched, lockable persistence of run records
//! under concurrent, possibly multi-process access.
//!
//! The store composes four mechanisms, each in its own module:
//! a TTL+LRU [`cache`], a per-key [`locks`] table with a bounded
//! strong-reference LRU, a batched background [`writer`] that never drops a
//! write silently, and goal-scoped [`index`] documents guarded by OS-level
//! file locks for cross-process safety.

mod backend;
pub mod cache;
mod index;
pub mod locks;
pub mod store;
mod writer;

pub use cache::TtlCache;
pub use locks::{KeyLock, LockTable};
pub use store::{RunStore, StorageError, StoreConfig};

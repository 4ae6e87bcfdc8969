//! Runtime configuration.
//!
//! The data directory resolves from the environment (via dotenv) when not
//! set explicitly, so a bare `RuntimeConfig::default()` is usable out of the
//! box and deployments override through `SKEINRUN_DATA_DIR`.

use std::path::PathBuf;

use crate::event_bus::DEFAULT_BUFFER_CAPACITY;
use crate::executor::ExecutorConfig;
use crate::storage::StoreConfig;
use crate::types::JoinPolicy;

/// Environment variable naming the durable data directory.
pub const DATA_DIR_ENV: &str = "SKEINRUN_DATA_DIR";

/// Configuration for a [`RuntimeManager`](super::RuntimeManager).
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Root directory for run records, indexes, and runtime documents.
    pub data_dir: PathBuf,
    /// Event-bus broadcast buffer capacity.
    pub event_buffer: usize,
    /// Executor tunables applied to every execution.
    pub executor: ExecutorConfig,
    /// Storage tunables; `None` derives defaults from `data_dir`.
    pub store: Option<StoreConfig>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            data_dir: Self::resolve_data_dir(None),
            event_buffer: DEFAULT_BUFFER_CAPACITY,
            executor: ExecutorConfig::default(),
            store: None,
        }
    }
}

impl RuntimeConfig {
    fn resolve_data_dir(provided: Option<PathBuf>) -> PathBuf {
        if let Some(dir) = provided {
            return dir;
        }
        dotenvy::dotenv().ok();
        std::env::var(DATA_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./skeinrun-data"))
    }

    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Self::resolve_data_dir(Some(data_dir.into())),
            event_buffer: DEFAULT_BUFFER_CAPACITY,
            executor: ExecutorConfig::default(),
            store: None,
        }
    }

    #[must_use]
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    #[must_use]
    pub fn with_executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }

    #[must_use]
    pub fn with_join_policy(mut self, policy: JoinPolicy) -> Self {
        self.executor.join_policy = policy;
        self
    }

    #[must_use]
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = Some(store);
        self
    }

    /// The effective storage configuration.
    #[must_use]
    pub fn store_config(&self) -> StoreConfig {
        self.store
            .clone()
            .unwrap_or_else(|| StoreConfig::new(&self.data_dir))
    }
}

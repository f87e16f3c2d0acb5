//! Engine and store configuration.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::store::{DocumentStore, MemoryStore, SledStore, StoreError, DEFAULT_PAGE_SIZE};

/// Default number of keys per batch read.
pub const DEFAULT_BATCH_CHUNK_SIZE: usize = 25;

/// Largest batch read the store accepts.
pub const MAX_BATCH_CHUNK_SIZE: usize = crate::store::MAX_BATCH_GET_KEYS;

/// Default number of retries for throttled batch calls.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default base delay for exponential backoff, in milliseconds.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 50;

/// Prefix of the environment variables read by [`EngineConfig::from_env`].
pub const ENV_PREFIX: &str = "DYNORM_";

/// Settings consumed by the planner and executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Allow filtered full-table scans. When false, a non-key filter that
    /// would need a scan fails with a configuration error.
    pub scan_on_filter: bool,

    /// Strongly consistent point, batch and index reads.
    pub consistent_read: bool,

    /// Keys per batch read. Clamped to `1..=MAX_BATCH_CHUNK_SIZE` on use.
    pub batch_chunk_size: usize,

    /// Prefix prepended to every physical table name.
    pub table_prefix: String,

    /// Treat naive stored timestamps as UTC when decoding.
    pub use_tz: bool,

    /// Retries for throttled or partially processed batch calls.
    pub max_retries: u32,

    /// Base delay for exponential backoff, in milliseconds.
    pub retry_base_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scan_on_filter: true,
            consistent_read: false,
            batch_chunk_size: DEFAULT_BATCH_CHUNK_SIZE,
            table_prefix: String::new(),
            use_tz: true,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
        }
    }
}

impl EngineConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow or forbid filtered scans.
    pub fn with_scan_on_filter(mut self, enabled: bool) -> Self {
        self.scan_on_filter = enabled;
        self
    }

    /// Enable strongly consistent reads.
    pub fn with_consistent_read(mut self, enabled: bool) -> Self {
        self.consistent_read = enabled;
        self
    }

    /// Set the batch read chunk size.
    pub fn with_batch_chunk_size(mut self, size: usize) -> Self {
        self.batch_chunk_size = size.clamp(1, MAX_BATCH_CHUNK_SIZE);
        self
    }

    /// Set the table name prefix.
    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    /// Enable or disable the naive-as-UTC decode rule.
    pub fn with_use_tz(mut self, enabled: bool) -> Self {
        self.use_tz = enabled;
        self
    }

    /// Set the retry ceiling for batch calls.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the backoff base delay.
    pub fn with_retry_base_delay_ms(mut self, delay_ms: u64) -> Self {
        self.retry_base_delay_ms = delay_ms;
        self
    }

    /// Effective batch read chunk size.
    pub fn chunk_size(&self) -> usize {
        self.batch_chunk_size.clamp(1, MAX_BATCH_CHUNK_SIZE)
    }

    /// Physical table name for a logical one.
    pub fn table_name(&self, table: &str) -> String {
        format!("{}{}", self.table_prefix, table)
    }

    /// Load settings from `DYNORM_*` environment variables over the defaults.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load settings through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));
        let mut config = Self::default();

        if let Some(v) = var("SCAN_ON_FILTER") {
            config.scan_on_filter = parse_bool("SCAN_ON_FILTER", &v)?;
        }
        if let Some(v) = var("CONSISTENT_READ") {
            config.consistent_read = parse_bool("CONSISTENT_READ", &v)?;
        }
        if let Some(v) = var("BATCH_CHUNK_SIZE") {
            let size = parse_number::<usize>("BATCH_CHUNK_SIZE", &v)?;
            config = config.with_batch_chunk_size(size);
        }
        if let Some(v) = var("TABLE_PREFIX") {
            config.table_prefix = v;
        }
        if let Some(v) = var("USE_TZ") {
            config.use_tz = parse_bool("USE_TZ", &v)?;
        }
        if let Some(v) = var("MAX_RETRIES") {
            config.max_retries = parse_number("MAX_RETRIES", &v)?;
        }
        if let Some(v) = var("RETRY_BASE_DELAY_MS") {
            config.retry_base_delay_ms = parse_number("RETRY_BASE_DELAY_MS", &v)?;
        }
        Ok(config)
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, Error> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Configuration(format!(
            "{}{} must be a boolean, got {:?}",
            ENV_PREFIX, name, value
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, Error> {
    value.trim().parse().map_err(|_| {
        Error::Configuration(format!(
            "{}{} must be a non-negative integer, got {:?}",
            ENV_PREFIX, name, value
        ))
    })
}

/// Which store backend a connection alias opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Process-local in-memory store.
    Memory {
        /// Items evaluated per page.
        page_size: usize,
    },
    /// Persistent sled store.
    Sled {
        /// Database directory.
        path: PathBuf,
        /// Items evaluated per page.
        page_size: usize,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::memory()
    }
}

impl StoreConfig {
    /// In-memory store with the default page size.
    pub fn memory() -> Self {
        StoreConfig::Memory {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// sled store at `path` with the default page size.
    pub fn sled(path: impl Into<PathBuf>) -> Self {
        StoreConfig::Sled {
            path: path.into(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Open a new store handle.
    pub fn open(&self) -> Result<Arc<dyn DocumentStore>, StoreError> {
        match self {
            StoreConfig::Memory { page_size } => {
                Ok(Arc::new(MemoryStore::new().with_page_size(*page_size)))
            }
            StoreConfig::Sled { path, page_size } => {
                Ok(Arc::new(SledStore::open(path)?.with_page_size(*page_size)))
            }
        }
    }
}

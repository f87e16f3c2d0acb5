//! Connection registry.
//!
//! Store handles are opened lazily, once per connection alias, and shared
//! by every caller using that alias. [`ConnectionRegistry::global`] is the
//! process-wide instance; tests call [`ConnectionRegistry::reset`] to force
//! fresh handles.

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use tracing::{debug, info};

use super::{DocumentStore, StoreError};
use crate::config::StoreConfig;

/// Alias to store handle map.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, Arc<dyn DocumentStore>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> &'static ConnectionRegistry {
        static GLOBAL: OnceLock<ConnectionRegistry> = OnceLock::new();
        GLOBAL.get_or_init(ConnectionRegistry::new)
    }

    /// Return the handle for `alias`, opening it from `config` on first use.
    pub fn connect(
        &self,
        alias: &str,
        config: &StoreConfig,
    ) -> Result<Arc<dyn DocumentStore>, StoreError> {
        if let Some(existing) = self.connections.get(alias) {
            return Ok(Arc::clone(existing.value()));
        }
        let entry = self
            .connections
            .entry(alias.to_string())
            .or_try_insert_with(|| {
                info!(alias, ?config, "opening store connection");
                config.open()
            })?;
        Ok(Arc::clone(entry.value()))
    }

    /// Install an already-open handle under `alias`, replacing any other.
    pub fn register(&self, alias: &str, store: Arc<dyn DocumentStore>) {
        self.connections.insert(alias.to_string(), store);
    }

    /// Handle for `alias`, if connected.
    pub fn get(&self, alias: &str) -> Option<Arc<dyn DocumentStore>> {
        self.connections.get(alias).map(|e| Arc::clone(e.value()))
    }

    /// Number of open aliases.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no alias is connected.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Drop every cached handle.
    pub fn reset(&self) {
        debug!(connections = self.connections.len(), "resetting connection registry");
        self.connections.clear();
    }
}

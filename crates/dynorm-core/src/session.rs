//! Per-request entry point combining a store handle, catalog and settings.

use std::sync::Arc;

use dynorm_proto::{FieldValue, Mutation, MutationResult, Predicate, SelectQuery, Value};
use tracing::{debug, info};

use crate::catalog::{Catalog, ColumnDef};
use crate::config::{EngineConfig, StoreConfig};
use crate::error::Error;
use crate::migration::{Backfill, BackfillConfig, BackfillProgress};
use crate::mutation::MutationExecutor;
use crate::query::{CacheStats, PhysicalPlan, QueryExecutor, RequestCache, Row};
use crate::store::{ConnectionRegistry, DocumentStore};

/// A unit of work against one store connection.
///
/// Each session owns a fresh lookup cache, so create one per request and
/// drop it when the request ends.
pub struct Session {
    store: Arc<dyn DocumentStore>,
    catalog: Arc<Catalog>,
    config: EngineConfig,
    cache: RequestCache,
}

impl Session {
    /// Create a session over an open store handle.
    pub fn new(store: Arc<dyn DocumentStore>, catalog: Arc<Catalog>, config: EngineConfig) -> Self {
        Self {
            store,
            catalog,
            config,
            cache: RequestCache::new(),
        }
    }

    /// Create a session on the shared connection for `alias`.
    ///
    /// The store is opened from `store_config` the first time the alias is
    /// used in this process.
    pub fn connect(
        alias: &str,
        store_config: &StoreConfig,
        catalog: Arc<Catalog>,
        config: EngineConfig,
    ) -> Result<Self, Error> {
        let store = ConnectionRegistry::global().connect(alias, store_config)?;
        Ok(Self::new(store, catalog, config))
    }

    /// Get a reference to the store.
    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    /// Get a reference to the catalog.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Get a reference to the engine settings.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Lookup cache statistics for this session.
    pub fn cache_stats(&self) -> &CacheStats {
        self.cache.stats()
    }

    /// Forget every cached item.
    pub fn reset_cache(&self) {
        self.cache.clear();
    }

    /// Create the table of every registered model that is missing one.
    pub fn provision(&self) -> Result<(), Error> {
        for name in self.catalog.model_names() {
            let spec = self.catalog.model(&name)?.table_spec(&self.config);
            debug!(model = %name, table = %spec.name, "provisioning table");
            self.store.create_table(spec)?;
        }
        info!(models = self.catalog.model_names().len(), "tables provisioned");
        Ok(())
    }

    /// Create a query executor sharing this session's cache.
    pub fn executor(&self) -> QueryExecutor<'_> {
        QueryExecutor::new(self.store.as_ref(), &self.catalog, &self.config).with_cache(&self.cache)
    }

    /// Create a mutation executor that keeps this session's cache current.
    pub fn mutations(&self) -> MutationExecutor<'_> {
        MutationExecutor::new(self.store.as_ref(), &self.catalog, &self.config)
            .with_cache(&self.cache)
    }

    /// Run a select.
    pub fn select(&self, query: &SelectQuery) -> Result<Vec<Row>, Error> {
        self.executor().select(query)
    }

    /// Count the rows a select would return.
    pub fn count(&self, query: &SelectQuery) -> Result<usize, Error> {
        self.executor().count(query)
    }

    /// Whether a select would return any row.
    pub fn exists(&self, query: &SelectQuery) -> Result<bool, Error> {
        self.executor().exists(query)
    }

    /// Fetch exactly one row.
    pub fn get(&self, query: &SelectQuery) -> Result<Row, Error> {
        self.executor().get(query)
    }

    /// The access path a select would use.
    pub fn explain(&self, query: &SelectQuery) -> Result<PhysicalPlan, Error> {
        self.executor().explain(query)
    }

    /// Insert rows, returning their primary keys.
    pub fn insert(&self, model: &str, rows: &[Vec<FieldValue>]) -> Result<Vec<Value>, Error> {
        self.mutations().insert(model, rows)
    }

    /// Update matching rows.
    pub fn update(
        &self,
        model: &str,
        filter: Option<&Predicate>,
        data: &[FieldValue],
    ) -> Result<usize, Error> {
        self.mutations().update(model, filter, data)
    }

    /// Delete matching rows.
    pub fn delete(&self, model: &str, filter: Option<&Predicate>) -> Result<usize, Error> {
        self.mutations().delete(model, filter)
    }

    /// Execute a mutation request.
    pub fn execute(&self, mutation: &Mutation) -> Result<MutationResult, Error> {
        self.mutations().execute(mutation)
    }

    /// Add a column to `model` and backfill its default onto existing items.
    pub fn add_column(
        &self,
        model: &str,
        column: ColumnDef,
        backfill: BackfillConfig,
    ) -> Result<BackfillProgress, Error> {
        let table = self.config.table_name(&self.catalog.model(model)?.table);
        let progress = Backfill::new(self.store.as_ref(), &self.catalog, &self.config)
            .with_config(backfill)
            .add_column(model, column)?;
        self.cache.invalidate_table(&table);
        Ok(progress)
    }
}

//! Mutation executor for handling write operations.

use dynorm_proto::{FieldValue, Mutation, MutationResult, Predicate, Value};
use tracing::{debug, instrument, warn};

use crate::catalog::{Catalog, ModelDef};
use crate::config::EngineConfig;
use crate::error::Error;
use crate::query::{PhysicalPlan, Planner, QueryExecutor, RequestCache, ValueCodec};
use crate::retry::RetryPolicy;
use crate::store::{
    DocumentStore, PutCondition, StoreError, WriteRequest, MAX_BATCH_WRITE_REQUESTS,
};

use super::keys::{generate_key, MAX_KEY_ATTEMPTS};
use super::validator::{PreparedRow, RowValidator};

/// Executes inserts, updates and deletes against a document store.
pub struct MutationExecutor<'a> {
    store: &'a dyn DocumentStore,
    catalog: &'a Catalog,
    config: &'a EngineConfig,
    cache: Option<&'a RequestCache>,
}

impl<'a> MutationExecutor<'a> {
    /// Create a new mutation executor.
    pub fn new(
        store: &'a dyn DocumentStore,
        catalog: &'a Catalog,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            config,
            cache: None,
        }
    }

    /// Keep `cache` consistent with the writes made here.
    pub fn with_cache(mut self, cache: &'a RequestCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Execute a single mutation.
    pub fn execute(&self, mutation: &Mutation) -> Result<MutationResult, Error> {
        match mutation {
            Mutation::Insert { model, rows } => {
                Ok(MutationResult::inserted(self.insert(model, rows)?))
            }
            Mutation::Update {
                model,
                filter,
                data,
            } => Ok(MutationResult::affected(self.update(
                model,
                filter.as_ref(),
                data,
            )?)),
            Mutation::Delete { model, filter } => {
                Ok(MutationResult::affected(self.delete(model, filter.as_ref())?))
            }
        }
    }

    /// Insert rows, returning their primary keys in row order.
    ///
    /// All rows are validated before the first write.
    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    pub fn insert(&self, model: &str, rows: &[Vec<FieldValue>]) -> Result<Vec<Value>, Error> {
        let model = self.catalog.model(model)?;
        let validator = RowValidator::new(&model, self.codec());
        let prepared = rows
            .iter()
            .map(|row| validator.prepare_insert(row))
            .collect::<Result<Vec<_>, Error>>()?;

        let table = self.table(&model);
        let mut keys = Vec::with_capacity(prepared.len());
        for row in prepared {
            keys.push(self.insert_row(&model, &validator, &table, row)?);
        }
        if let Some(cache) = self.cache {
            cache.invalidate_table(&table);
        }
        debug!(table = %table, inserted = keys.len(), "inserted rows");
        Ok(keys)
    }

    fn insert_row(
        &self,
        model: &ModelDef,
        validator: &RowValidator<'_>,
        table: &str,
        row: PreparedRow,
    ) -> Result<Value, Error> {
        let PreparedRow { mut item, key } = row;
        if let Some(key) = key {
            self.store.put_item(table, item, PutCondition::Always)?;
            return Ok(key);
        }

        let pk = model.primary_key_column()?;
        let mut attempt = 0;
        loop {
            let key = generate_key(pk)?;
            item.insert(pk.name.clone(), validator.encode_key(pk, &key)?);
            match self
                .store
                .put_item(table, item.clone(), PutCondition::KeyAbsent)
            {
                Ok(()) => return Ok(key),
                Err(StoreError::ConditionalCheckFailed) if attempt + 1 < MAX_KEY_ATTEMPTS => {
                    warn!(table, key = %key, attempt, "generated key collided, regenerating");
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Apply assignments to every matching item. Returns the number written.
    ///
    /// A null assignment removes the attribute.
    #[instrument(skip(self, filter, data))]
    pub fn update(
        &self,
        model: &str,
        filter: Option<&Predicate>,
        data: &[FieldValue],
    ) -> Result<usize, Error> {
        let model = self.catalog.model(model)?;
        let assignments = RowValidator::new(&model, self.codec()).prepare_update(data)?;

        let plan = Planner::new(self.catalog, self.config).plan(&model, filter, None)?;
        let items = self.reader().fetch(&model, &plan, None)?;
        let table = self.table(&model);
        let spec = model.table_spec(self.config);

        for mut item in items.iter().cloned() {
            for (column, attr) in &assignments {
                match attr {
                    Some(attr) => item.insert(column.clone(), attr.clone()),
                    None => item.remove(column),
                };
            }
            let key = spec.key_of(&item)?;
            self.store.put_item(&table, item, PutCondition::Always)?;
            if let Some(cache) = self.cache {
                cache.invalidate(&table, &key);
            }
        }
        debug!(table = %table, plan = plan.kind(), updated = items.len(), "updated items");
        Ok(items.len())
    }

    /// Delete every matching item. Returns the number of keys targeted.
    #[instrument(skip(self, filter))]
    pub fn delete(&self, model: &str, filter: Option<&Predicate>) -> Result<usize, Error> {
        let model = self.catalog.model(model)?;
        let table = self.table(&model);
        let plan = Planner::new(self.catalog, self.config).plan(&model, filter, None)?;

        let keys = match &plan {
            PhysicalPlan::Empty => Vec::new(),
            PhysicalPlan::PointGet { key } => {
                self.store.delete_item(&table, key)?;
                vec![key.clone()]
            }
            _ => {
                let spec = model.table_spec(self.config);
                let keys = self
                    .reader()
                    .fetch(&model, &plan, None)?
                    .iter()
                    .map(|item| spec.key_of(item))
                    .collect::<Result<Vec<_>, StoreError>>()?;
                self.batch_delete(&table, &keys)?;
                keys
            }
        };

        if let Some(cache) = self.cache {
            for key in &keys {
                cache.invalidate(&table, key);
            }
        }
        debug!(table = %table, plan = plan.kind(), deleted = keys.len(), "deleted items");
        Ok(keys.len())
    }

    fn batch_delete(&self, table: &str, keys: &[String]) -> Result<(), Error> {
        let chunk_size = self.config.chunk_size().min(MAX_BATCH_WRITE_REQUESTS);
        let retry = RetryPolicy::from_config(self.config);
        for chunk in keys.chunks(chunk_size) {
            let requests: Vec<WriteRequest> = chunk
                .iter()
                .map(|key| WriteRequest::Delete(key.clone()))
                .collect();
            retry.drain("batch_write_item", requests, |pending| {
                self.store.batch_write_item(table, pending.to_vec())
            })?;
        }
        Ok(())
    }

    fn reader(&self) -> QueryExecutor<'a> {
        let reader = QueryExecutor::new(self.store, self.catalog, self.config);
        match self.cache {
            Some(cache) => reader.with_cache(cache),
            None => reader,
        }
    }

    fn codec(&self) -> ValueCodec<'a> {
        ValueCodec::new(self.catalog, self.config.use_tz)
    }

    fn table(&self, model: &ModelDef) -> String {
        self.config.table_name(&model.table)
    }
}

//! Query executor for running planned reads.
//!
//! The executor plans a [`SelectQuery`], performs the store calls the plan
//! needs, and finishes the result in memory: decoding, ordering, slicing and
//! projection.

use std::cmp::Ordering;
use std::collections::HashSet;

use dynorm_proto::{OrderDirection, SelectQuery};
use tracing::{debug, instrument};

use crate::catalog::{Catalog, ColumnDef, ModelDef};
use crate::config::EngineConfig;
use crate::error::Error;
use crate::retry::RetryPolicy;
use crate::store::{DocumentStore, Item, Page, QueryRequest, ScanRequest, StoreError};

use super::cache::RequestCache;
use super::filter::compile;
use super::planner::{PhysicalPlan, Planner};
use super::relation::resolve_join;
use super::row::Row;
use super::value_codec::ValueCodec;

/// Query executor that runs reads against a document store.
pub struct QueryExecutor<'a> {
    store: &'a dyn DocumentStore,
    catalog: &'a Catalog,
    config: &'a EngineConfig,
    cache: Option<&'a RequestCache>,
}

impl<'a> QueryExecutor<'a> {
    /// Create a new executor with store, catalog and settings.
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

    /// Serve and remember primary-key reads through `cache`.
    pub fn with_cache(mut self, cache: &'a RequestCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Run a select and return decoded rows.
    #[instrument(skip(self, query), fields(model = %query.model))]
    pub fn select(&self, query: &SelectQuery) -> Result<Vec<Row>, Error> {
        let model = self.catalog.model(&query.model)?;
        let plan = self.plan(&model, query)?;
        let items = self.fetch(&model, &plan, early_stop(query))?;
        debug!(plan = plan.kind(), items = items.len(), "fetched items");
        self.finish(&model, query, items)
    }

    /// Number of rows the select would return.
    #[instrument(skip(self, query), fields(model = %query.model))]
    pub fn count(&self, query: &SelectQuery) -> Result<usize, Error> {
        let model = self.catalog.model(&query.model)?;
        let plan = self.plan(&model, query)?;
        let total = match &plan {
            PhysicalPlan::Scan { conditions } => {
                let filter = compile(&self.codec(), &model, conditions)?;
                let request = ScanRequest::new().with_filter(filter).count_only();
                self.scan_count(&self.table(&model), request)?
            }
            _ => self.fetch(&model, &plan, None)?.len(),
        };
        Ok(match query.pagination {
            Some(p) => {
                let remaining = total.saturating_sub(p.offset);
                p.limit.map_or(remaining, |limit| remaining.min(limit))
            }
            None => total,
        })
    }

    /// Whether the select would return at least one row.
    #[instrument(skip(self, query), fields(model = %query.model))]
    pub fn exists(&self, query: &SelectQuery) -> Result<bool, Error> {
        let model = self.catalog.model(&query.model)?;
        let plan = self.plan(&model, query)?;
        let offset = query.pagination.map_or(0, |p| p.offset);
        if query.pagination.and_then(|p| p.limit) == Some(0) {
            return Ok(false);
        }
        Ok(self.fetch(&model, &plan, Some(offset + 1))?.len() > offset)
    }

    /// Exactly one row, or [`Error::NotFound`] / [`Error::MultipleResults`].
    #[instrument(skip(self, query), fields(model = %query.model))]
    pub fn get(&self, query: &SelectQuery) -> Result<Row, Error> {
        let mut rows = self.select(query)?;
        match rows.len() {
            0 => Err(Error::NotFound {
                model: query.model.clone(),
            }),
            1 => Ok(rows.remove(0)),
            count => Err(Error::MultipleResults {
                model: query.model.clone(),
                count,
            }),
        }
    }

    /// The plan a select would run, without touching the store.
    pub fn explain(&self, query: &SelectQuery) -> Result<PhysicalPlan, Error> {
        let model = self.catalog.model(&query.model)?;
        self.plan(&model, query)
    }

    pub(crate) fn catalog(&self) -> &'a Catalog {
        self.catalog
    }

    pub(crate) fn codec(&self) -> ValueCodec<'a> {
        ValueCodec::new(self.catalog, self.config.use_tz)
    }

    pub(crate) fn retry(&self) -> RetryPolicy {
        RetryPolicy::from_config(self.config)
    }

    /// Physical table of `model`.
    pub(crate) fn table(&self, model: &ModelDef) -> String {
        self.config.table_name(&model.table)
    }

    fn plan(&self, model: &ModelDef, query: &SelectQuery) -> Result<PhysicalPlan, Error> {
        Planner::new(self.catalog, self.config).plan(
            model,
            query.filter.as_ref(),
            query.join.as_ref(),
        )
    }

    /// Fetch the items a plan selects.
    ///
    /// With a `ceiling`, reads stop once that many items are collected.
    pub(crate) fn fetch(
        &self,
        model: &ModelDef,
        plan: &PhysicalPlan,
        ceiling: Option<usize>,
    ) -> Result<Vec<Item>, Error> {
        let table = self.table(model);
        match plan {
            PhysicalPlan::Empty => Ok(Vec::new()),
            PhysicalPlan::PointGet { key } => Ok(self.point_get(&table, key)?.into_iter().collect()),
            PhysicalPlan::BatchGet { keys } => {
                self.batch_get(model, keys, self.config.consistent_read, ceiling)
            }
            PhysicalPlan::IndexedQuery {
                index,
                key_column,
                key_value,
            } => {
                let request = QueryRequest::new(index.clone(), key_column.clone(), key_value.clone())
                    .with_consistent_read(self.config.consistent_read);
                self.query_pages(&table, request, ceiling)
            }
            PhysicalPlan::RelationJoin { .. } => resolve_join(self, model, plan, ceiling),
            PhysicalPlan::Scan { conditions } => {
                let filter = compile(&self.codec(), model, conditions)?;
                self.scan_pages(&table, ScanRequest::new().with_filter(filter), ceiling)
            }
        }
    }

    fn point_get(&self, table: &str, key: &str) -> Result<Option<Item>, Error> {
        if let Some(item) = self.cache.and_then(|c| c.get(table, key)) {
            return Ok(Some(item));
        }
        let item = self
            .store
            .get_item(table, key, self.config.consistent_read)?;
        if let (Some(cache), Some(item)) = (self.cache, &item) {
            cache.insert(table, key, item.clone());
        }
        Ok(item)
    }

    /// Fetch items of `model` by key in chunks, collapsing duplicate keys.
    ///
    /// Each chunk is drained of unprocessed keys before the next one is
    /// sent. With a `ceiling`, chunks stop once enough items are found.
    pub(crate) fn batch_get(
        &self,
        model: &ModelDef,
        keys: &[String],
        consistent_read: bool,
        ceiling: Option<usize>,
    ) -> Result<Vec<Item>, Error> {
        let table = self.table(model);
        let mut seen = HashSet::with_capacity(keys.len());
        let mut items = Vec::new();
        let mut pending = Vec::with_capacity(keys.len());
        for key in keys {
            if !seen.insert(key.as_str()) {
                continue;
            }
            match self.cache.and_then(|c| c.get(&table, key)) {
                Some(item) => items.push(item),
                None => pending.push(key.clone()),
            }
        }

        for chunk in pending.chunks(self.config.chunk_size()) {
            if ceiling.is_some_and(|c| items.len() >= c) {
                break;
            }
            let found = self.batch_get_chunk(&table, chunk, consistent_read)?;
            if let Some(cache) = self.cache {
                for item in &found {
                    if let Some(key) = item.get(&model.primary_key).and_then(|v| v.as_s()) {
                        cache.insert(&table, key, item.clone());
                    }
                }
            }
            items.extend(found);
        }
        Ok(items)
    }

    fn batch_get_chunk(
        &self,
        table: &str,
        chunk: &[String],
        consistent_read: bool,
    ) -> Result<Vec<Item>, Error> {
        let mut items = Vec::with_capacity(chunk.len());
        self.retry().drain("batch_get_item", chunk.to_vec(), |keys| {
            let output = self.store.batch_get_item(table, keys, consistent_read)?;
            items.extend(output.items);
            Ok(output.unprocessed_keys)
        })?;
        Ok(items)
    }

    pub(crate) fn query_pages(
        &self,
        table: &str,
        mut request: QueryRequest,
        ceiling: Option<usize>,
    ) -> Result<Vec<Item>, Error> {
        self.paginate(ceiling, true, |start, limit| {
            request.exclusive_start_key = start;
            request.limit = limit;
            self.store.query(table, &request)
        })
    }

    pub(crate) fn scan_pages(
        &self,
        table: &str,
        mut request: ScanRequest,
        ceiling: Option<usize>,
    ) -> Result<Vec<Item>, Error> {
        // A filtered page limit counts evaluated items, not matches.
        let bounded = request.filter.is_none();
        self.paginate(ceiling, bounded, |start, limit| {
            request.exclusive_start_key = start;
            request.limit = limit;
            self.store.scan(table, &request)
        })
    }

    fn scan_count(&self, table: &str, mut request: ScanRequest) -> Result<usize, Error> {
        let mut total = 0;
        loop {
            let page = self.store.scan(table, &request)?;
            total += page.count;
            match page.last_evaluated_key {
                Some(key) => request.exclusive_start_key = Some(key),
                None => return Ok(total),
            }
        }
    }

    /// Follow continuation tokens until the read is exhausted or the
    /// ceiling is reached. With `bounded`, each page asks only for the
    /// items still missing.
    fn paginate(
        &self,
        ceiling: Option<usize>,
        bounded: bool,
        mut next_page: impl FnMut(Option<String>, Option<usize>) -> Result<Page, StoreError>,
    ) -> Result<Vec<Item>, Error> {
        let mut items = Vec::new();
        let mut start = None;
        loop {
            let limit = if bounded {
                ceiling.map(|c| c - items.len())
            } else {
                None
            };
            let page = next_page(start.take(), limit)?;
            items.extend(page.items);

            let reached = ceiling.is_some_and(|c| items.len() >= c);
            match page.last_evaluated_key {
                Some(key) if !reached => start = Some(key),
                _ => break,
            }
        }
        if let Some(c) = ceiling {
            items.truncate(c);
        }
        Ok(items)
    }

    /// Decode, order, slice and project.
    fn finish(
        &self,
        model: &ModelDef,
        query: &SelectQuery,
        items: Vec<Item>,
    ) -> Result<Vec<Row>, Error> {
        let columns: Vec<&ColumnDef> = model.columns.iter().collect();
        let codec = self.codec();
        let mut rows: Vec<Row> = items
            .iter()
            .map(|item| codec.decode_item(&columns, item))
            .collect();

        let order: Vec<(String, OrderDirection)> = query
            .order_by
            .iter()
            .map(|spec| Ok((model.require_column(&spec.field)?.name.clone(), spec.direction)))
            .collect::<Result<_, Error>>()?;
        sort_rows(&mut rows, &order);

        if let Some(p) = query.pagination {
            if p.offset >= rows.len() {
                rows.clear();
            } else {
                rows.drain(0..p.offset);
            }
            if let Some(limit) = p.limit {
                rows.truncate(limit);
            }
        }

        if query.fields.is_empty() {
            return Ok(rows);
        }
        let projection: Vec<String> = query
            .fields
            .iter()
            .map(|f| Ok(model.require_column(f)?.name.clone()))
            .collect::<Result<_, Error>>()?;
        Ok(rows.into_iter().map(|row| row.project(&projection)).collect())
    }
}

/// Item ceiling for early stopping: only an unordered, unskipped slice can
/// stop reading once it has enough items.
fn early_stop(query: &SelectQuery) -> Option<usize> {
    match query.pagination {
        Some(p) if p.offset == 0 && query.order_by.is_empty() => p.high_mark(),
        _ => None,
    }
}

/// Stable sort with nulls first in both directions.
fn sort_rows(rows: &mut [Row], order: &[(String, OrderDirection)]) {
    if order.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for (column, direction) in order {
            let (av, bv) = (a.value(column), b.value(column));
            let cmp = match (av.is_null(), bv.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => match direction {
                    OrderDirection::Asc => av.sort_cmp(bv),
                    OrderDirection::Desc => av.sort_cmp(bv).reverse(),
                },
            };
            if cmp != Ordering::Equal {
                return cmp;
            }
        }
        Ordering::Equal
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, ColumnType};
    use crate::store::{AttributeValue, MemoryStore, PutCondition};
    use dynorm_proto::{Lookup, OrderSpec, Pagination, Value};

    struct TestDb {
        store: MemoryStore,
        catalog: Catalog,
        config: EngineConfig,
    }

    fn setup_test_db() -> TestDb {
        let book = ModelDef::new("Book", "id")
            .with_column(ColumnDef::new("id", ColumnType::String))
            .with_column(ColumnDef::new("title", ColumnType::String))
            .with_column(ColumnDef::optional("rating", ColumnType::Integer))
            .with_column(ColumnDef::new("shelf", ColumnType::String).with_index());
        let catalog = Catalog::new().with_models([book]).unwrap();
        let config = EngineConfig::default().with_retry_base_delay_ms(0);
        let store = MemoryStore::new().with_page_size(2);
        let model = catalog.model("Book").unwrap();
        store.create_table(model.table_spec(&config)).unwrap();
        TestDb {
            store,
            catalog,
            config,
        }
    }

    fn insert_book(db: &TestDb, id: &str, title: &str, rating: Option<i64>, shelf: &str) {
        let mut item = Item::new();
        item.insert("id".into(), AttributeValue::s(id));
        item.insert("title".into(), AttributeValue::s(title));
        item.insert("shelf".into(), AttributeValue::s(shelf));
        if let Some(rating) = rating {
            item.insert("rating".into(), AttributeValue::n(rating));
        }
        db.store.put_item("book", item, PutCondition::Always).unwrap();
    }

    fn setup_books() -> TestDb {
        let db = setup_test_db();
        insert_book(&db, "b1", "Dune", Some(5), "sf");
        insert_book(&db, "b2", "Emma", None, "classic");
        insert_book(&db, "b3", "Solaris", Some(4), "sf");
        insert_book(&db, "b4", "Ulysses", Some(2), "classic");
        insert_book(&db, "b5", "Hyperion", None, "sf");
        db.store.reset_calls();
        db
    }

    fn executor(db: &TestDb) -> QueryExecutor<'_> {
        QueryExecutor::new(&db.store, &db.catalog, &db.config)
    }

    fn ids(rows: &[Row]) -> Vec<String> {
        rows.iter()
            .map(|r| r.value("id").as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn test_select_all_pages_through_scan() {
        let db = setup_books();
        let rows = executor(&db).select(&SelectQuery::new("Book")).unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(db.store.calls().scan, 3);
    }

    #[test]
    fn test_point_get() {
        let db = setup_books();
        let query = SelectQuery::new("Book").with_filter(Lookup::exact("pk", "b3"));
        let row = executor(&db).get(&query).unwrap();
        assert_eq!(row.value("title"), &Value::String("Solaris".into()));
        assert_eq!(db.store.calls().get_item, 1);
        assert_eq!(db.store.calls().scan, 0);
    }

    #[test]
    fn test_get_errors() {
        let db = setup_books();
        let missing = SelectQuery::new("Book").with_filter(Lookup::exact("pk", "nope"));
        assert!(executor(&db).get(&missing).unwrap_err().is_not_found());

        let many = SelectQuery::new("Book").with_filter(Lookup::exact("shelf", "sf"));
        assert!(matches!(
            executor(&db).get(&many),
            Err(Error::MultipleResults { count: 3, .. })
        ));
    }

    #[test]
    fn test_order_nulls_first_both_directions() {
        let db = setup_books();
        let asc = SelectQuery::new("Book").with_order(OrderSpec::asc("rating"));
        assert_eq!(
            ids(&executor(&db).select(&asc).unwrap()),
            vec!["b2", "b5", "b4", "b3", "b1"]
        );

        let desc = SelectQuery::new("Book").with_order(OrderSpec::desc("rating"));
        assert_eq!(
            ids(&executor(&db).select(&desc).unwrap()),
            vec!["b2", "b5", "b1", "b3", "b4"]
        );
    }

    #[test]
    fn test_offset_limit_and_projection() {
        let db = setup_books();
        let query = SelectQuery::new("Book")
            .with_order(OrderSpec::asc("title"))
            .with_pagination(Pagination::new(2, 1))
            .with_fields(vec!["title".into()]);
        let rows = executor(&db).select(&query).unwrap();
        let titles: Vec<&Value> = rows.iter().map(|r| r.value("title")).collect();
        assert_eq!(
            titles,
            vec![&Value::String("Emma".into()), &Value::String("Hyperion".into())]
        );
        assert_eq!(rows[0].len(), 1);
    }

    #[test]
    fn test_limit_stops_early() {
        let db = setup_books();
        let query = SelectQuery::new("Book").with_pagination(Pagination::limit(1));
        assert_eq!(executor(&db).select(&query).unwrap().len(), 1);
        assert_eq!(db.store.calls().scan, 1);
    }

    #[test]
    fn test_count_and_exists() {
        let db = setup_books();
        let exec = executor(&db);
        let sf = SelectQuery::new("Book").with_filter(Lookup::exact("shelf", "sf"));
        assert_eq!(exec.count(&sf).unwrap(), 3);

        let rated = SelectQuery::new("Book").with_filter(Lookup::gte("rating", 4));
        assert_eq!(exec.count(&rated).unwrap(), 2);
        assert!(exec.exists(&rated).unwrap());

        let none = SelectQuery::new("Book").with_filter(Lookup::gt("rating", 10));
        assert_eq!(exec.count(&none).unwrap(), 0);
        assert!(!exec.exists(&none).unwrap());

        let sliced = SelectQuery::new("Book").with_pagination(Pagination::new(10, 3));
        assert_eq!(exec.count(&sliced).unwrap(), 2);
    }

    #[test]
    fn test_batch_get_dedupes_and_chunks() {
        let db = setup_books();
        let config = EngineConfig::default()
            .with_batch_chunk_size(2)
            .with_retry_base_delay_ms(0);
        let exec = QueryExecutor::new(&db.store, &db.catalog, &config);
        let keys = ["b1", "b2", "b1", "b3", "missing"]
            .iter()
            .map(|k| Value::from(*k))
            .collect();
        let query = SelectQuery::new("Book").with_filter(Lookup::in_values("pk", keys));
        assert_eq!(exec.select(&query).unwrap().len(), 3);
        assert_eq!(db.store.calls().batch_get_item, 2);
    }

    #[test]
    fn test_unprocessed_keys_are_retried() {
        let db = setup_books();
        db.store.inject_partial_batches(2);
        let keys = ["b1", "b2", "b3", "b4"].iter().map(|k| Value::from(*k)).collect();
        let query = SelectQuery::new("Book").with_filter(Lookup::in_values("id", keys));
        assert_eq!(executor(&db).select(&query).unwrap().len(), 4);
        assert_eq!(db.store.calls().batch_get_item, 3);
    }

    #[test]
    fn test_stalled_batch_gives_up() {
        let db = setup_books();
        let config = EngineConfig::default()
            .with_max_retries(2)
            .with_retry_base_delay_ms(0);
        db.store.inject_partial_batches(10);
        let exec = QueryExecutor::new(&db.store, &db.catalog, &config);
        let query = SelectQuery::new("Book")
            .with_filter(Lookup::in_values("id", vec![Value::from("b1")]));
        assert!(matches!(
            exec.select(&query),
            Err(Error::Store(StoreError::Unprocessed { remaining: 1, .. }))
        ));
    }

    #[test]
    fn test_consistent_read_reaches_key_and_index_reads() {
        let db = setup_books();
        let config = EngineConfig::default()
            .with_consistent_read(true)
            .with_retry_base_delay_ms(0);
        let exec = QueryExecutor::new(&db.store, &db.catalog, &config);

        exec.get(&SelectQuery::new("Book").with_filter(Lookup::exact("pk", "b1")))
            .unwrap();
        assert_eq!(db.store.calls().consistent_reads, 1);

        let keys = vec![Value::from("b2"), Value::from("b3")];
        exec.select(&SelectQuery::new("Book").with_filter(Lookup::in_values("pk", keys)))
            .unwrap();
        assert_eq!(db.store.calls().consistent_reads, 2);

        db.store.reset_calls();
        let rows = exec
            .select(&SelectQuery::new("Book").with_filter(Lookup::exact("shelf", "sf")))
            .unwrap();
        assert_eq!(rows.len(), 3);
        let calls = db.store.calls();
        assert_eq!(calls.query, 2);
        assert_eq!(calls.consistent_reads, 2);

        db.store.reset_calls();
        exec.select(&SelectQuery::new("Book")).unwrap();
        assert_eq!(db.store.calls().scan, 3);
        assert_eq!(db.store.calls().consistent_reads, 0);
    }

    #[test]
    fn test_eventual_reads_by_default() {
        let db = setup_books();
        executor(&db)
            .get(&SelectQuery::new("Book").with_filter(Lookup::exact("pk", "b1")))
            .unwrap();
        assert_eq!(db.store.calls().get_item, 1);
        assert_eq!(db.store.calls().consistent_reads, 0);
    }

    #[test]
    fn test_cache_serves_repeat_point_gets() {
        let db = setup_books();
        let cache = RequestCache::new();
        let exec = executor(&db).with_cache(&cache);
        let query = SelectQuery::new("Book").with_filter(Lookup::exact("pk", "b1"));
        exec.get(&query).unwrap();
        exec.get(&query).unwrap();
        assert_eq!(db.store.calls().get_item, 1);
        assert_eq!(cache.stats().hits(), 1);
    }
}

//! In-memory document store.
//!
//! Tables are ordered maps keyed by hash key, so scans and index queries
//! paginate deterministically. The store also counts calls per operation and
//! can be told to throttle or to return partial batch results, which is how
//! the engine's retry paths are exercised in tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::page::collect_page;
use super::{
    AttributeValue, BatchGetOutput, DocumentStore, Item, Page, PutCondition, QueryRequest,
    ScanRequest, Select, StoreError, TableSpec, WriteRequest, MAX_BATCH_GET_KEYS,
    MAX_BATCH_WRITE_REQUESTS,
};

/// Default maximum number of items evaluated per query or scan page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Number of store calls made, per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// `get_item` calls.
    pub get_item: usize,
    /// `batch_get_item` calls.
    pub batch_get_item: usize,
    /// `query` calls.
    pub query: usize,
    /// `scan` calls.
    pub scan: usize,
    /// `put_item` calls.
    pub put_item: usize,
    /// `delete_item` calls.
    pub delete_item: usize,
    /// `batch_write_item` calls.
    pub batch_write_item: usize,
    /// `set_attribute_if_absent` calls.
    pub conditional_update: usize,
    /// Reads that asked for strong consistency.
    pub consistent_reads: usize,
}

impl CallCounts {
    /// Total calls across all operations. Consistent reads are not calls of
    /// their own and are not included.
    pub fn total(&self) -> usize {
        self.get_item
            + self.batch_get_item
            + self.query
            + self.scan
            + self.put_item
            + self.delete_item
            + self.batch_write_item
            + self.conditional_update
    }
}

#[derive(Debug, Default)]
struct Faults {
    /// Batch calls that will only process half their input.
    partial_batches: usize,
    /// Batch calls that will fail with a throttling error.
    throttles: usize,
}

struct MemoryTable {
    spec: TableSpec,
    items: BTreeMap<String, Item>,
}

/// In-memory [`DocumentStore`].
pub struct MemoryStore {
    tables: RwLock<HashMap<String, MemoryTable>>,
    page_size: usize,
    faults: Mutex<Faults>,
    calls: Mutex<CallCounts>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            page_size: DEFAULT_PAGE_SIZE,
            faults: Mutex::new(Faults::default()),
            calls: Mutex::new(CallCounts::default()),
        }
    }

    /// Cap the number of items evaluated per page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Make the next `rounds` batch calls process only half of their input.
    pub fn inject_partial_batches(&self, rounds: usize) {
        self.faults.lock().partial_batches = rounds;
    }

    /// Make the next `count` batch calls fail with a throttling error.
    pub fn inject_throttles(&self, count: usize) {
        self.faults.lock().throttles = count;
    }

    /// Snapshot of the call counters.
    pub fn calls(&self) -> CallCounts {
        *self.calls.lock()
    }

    /// Reset the call counters.
    pub fn reset_calls(&self) {
        *self.calls.lock() = CallCounts::default();
    }

    /// Number of items in a table.
    pub fn item_count(&self, table: &str) -> usize {
        self.tables
            .read()
            .get(table)
            .map(|t| t.items.len())
            .unwrap_or(0)
    }

    fn record(&self, f: impl FnOnce(&mut CallCounts)) {
        f(&mut self.calls.lock());
    }

    /// Consume one injected fault. Returns how many of `len` inputs to process.
    fn batch_fault(&self, operation: &'static str, len: usize) -> Result<usize, StoreError> {
        let mut faults = self.faults.lock();
        if faults.throttles > 0 {
            faults.throttles -= 1;
            return Err(StoreError::Throttled { operation });
        }
        if faults.partial_batches > 0 {
            faults.partial_batches -= 1;
            return Ok(len / 2);
        }
        Ok(len)
    }

    fn page_limit(&self, requested: Option<usize>) -> usize {
        requested.map_or(self.page_size, |l| l.min(self.page_size)).max(1)
    }
}

fn missing(table: &str) -> StoreError {
    StoreError::TableNotFound(table.to_string())
}

fn after(start: &Option<String>) -> (Bound<String>, Bound<String>) {
    match start {
        Some(key) => (Bound::Excluded(key.clone()), Bound::Unbounded),
        None => (Bound::Unbounded, Bound::Unbounded),
    }
}

impl DocumentStore for MemoryStore {
    fn create_table(&self, spec: TableSpec) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        if !tables.contains_key(&spec.name) {
            debug!(table = %spec.name, "creating in-memory table");
            tables.insert(
                spec.name.clone(),
                MemoryTable {
                    spec,
                    items: BTreeMap::new(),
                },
            );
        }
        Ok(())
    }

    fn get_item(
        &self,
        table: &str,
        key: &str,
        consistent_read: bool,
    ) -> Result<Option<Item>, StoreError> {
        self.record(|c| {
            c.get_item += 1;
            c.consistent_reads += usize::from(consistent_read);
        });
        let tables = self.tables.read();
        let t = tables.get(table).ok_or_else(|| missing(table))?;
        Ok(t.items.get(key).cloned())
    }

    fn batch_get_item(
        &self,
        table: &str,
        keys: &[String],
        consistent_read: bool,
    ) -> Result<BatchGetOutput, StoreError> {
        self.record(|c| {
            c.batch_get_item += 1;
            c.consistent_reads += usize::from(consistent_read);
        });
        if keys.is_empty() || keys.len() > MAX_BATCH_GET_KEYS {
            return Err(StoreError::Validation(format!(
                "batch get requires 1 to {} keys, got {}",
                MAX_BATCH_GET_KEYS,
                keys.len()
            )));
        }
        let distinct: HashSet<&String> = keys.iter().collect();
        if distinct.len() != keys.len() {
            return Err(StoreError::Validation(
                "batch get key list contains duplicates".into(),
            ));
        }

        let processed = self.batch_fault("batch_get_item", keys.len())?;
        let tables = self.tables.read();
        let t = tables.get(table).ok_or_else(|| missing(table))?;

        let items = keys[..processed]
            .iter()
            .filter_map(|k| t.items.get(k).cloned())
            .collect();
        Ok(BatchGetOutput {
            items,
            unprocessed_keys: keys[processed..].to_vec(),
        })
    }

    fn query(&self, table: &str, request: &QueryRequest) -> Result<Page, StoreError> {
        self.record(|c| {
            c.query += 1;
            c.consistent_reads += usize::from(request.consistent_read);
        });
        let tables = self.tables.read();
        let t = tables.get(table).ok_or_else(|| missing(table))?;
        let attribute = t
            .spec
            .index_attribute(&request.index)
            .ok_or_else(|| StoreError::IndexNotFound {
                table: table.to_string(),
                index: request.index.clone(),
            })?;
        if attribute != request.key_attribute {
            return Err(StoreError::Validation(format!(
                "index {} is keyed on {}, not {}",
                request.index, attribute, request.key_attribute
            )));
        }

        let rows = t
            .items
            .range(after(&request.exclusive_start_key))
            .filter(|(_, item)| {
                item.get(attribute)
                    .is_some_and(|v| v.equals(&request.key_value))
            })
            .map(|(k, item)| Ok((k.clone(), item.clone())));

        collect_page(
            rows,
            self.page_limit(request.limit),
            None,
            Select::AllAttributes,
            request.projection.as_deref(),
        )
    }

    fn scan(&self, table: &str, request: &ScanRequest) -> Result<Page, StoreError> {
        self.record(|c| c.scan += 1);
        let tables = self.tables.read();
        let t = tables.get(table).ok_or_else(|| missing(table))?;

        let rows = t
            .items
            .range(after(&request.exclusive_start_key))
            .map(|(k, item)| Ok((k.clone(), item.clone())));

        collect_page(
            rows,
            self.page_limit(request.limit),
            request.filter.as_ref(),
            request.select,
            request.projection.as_deref(),
        )
    }

    fn put_item(
        &self,
        table: &str,
        item: Item,
        condition: PutCondition,
    ) -> Result<(), StoreError> {
        self.record(|c| c.put_item += 1);
        let mut tables = self.tables.write();
        let t = tables.get_mut(table).ok_or_else(|| missing(table))?;
        let key = t.spec.key_of(&item)?;
        if condition == PutCondition::KeyAbsent && t.items.contains_key(&key) {
            return Err(StoreError::ConditionalCheckFailed);
        }
        t.items.insert(key, item);
        Ok(())
    }

    fn delete_item(&self, table: &str, key: &str) -> Result<(), StoreError> {
        self.record(|c| c.delete_item += 1);
        let mut tables = self.tables.write();
        let t = tables.get_mut(table).ok_or_else(|| missing(table))?;
        t.items.remove(key);
        Ok(())
    }

    fn batch_write_item(
        &self,
        table: &str,
        mut requests: Vec<WriteRequest>,
    ) -> Result<Vec<WriteRequest>, StoreError> {
        self.record(|c| c.batch_write_item += 1);
        if requests.is_empty() || requests.len() > MAX_BATCH_WRITE_REQUESTS {
            return Err(StoreError::Validation(format!(
                "batch write requires 1 to {} requests, got {}",
                MAX_BATCH_WRITE_REQUESTS,
                requests.len()
            )));
        }

        let processed = self.batch_fault("batch_write_item", requests.len())?;
        let unprocessed = requests.split_off(processed);

        let mut tables = self.tables.write();
        let t = tables.get_mut(table).ok_or_else(|| missing(table))?;
        for request in requests {
            match request {
                WriteRequest::Put(item) => {
                    let key = t.spec.key_of(&item)?;
                    t.items.insert(key, item);
                }
                WriteRequest::Delete(key) => {
                    t.items.remove(&key);
                }
            }
        }
        Ok(unprocessed)
    }

    fn set_attribute_if_absent(
        &self,
        table: &str,
        key: &str,
        attribute: &str,
        value: AttributeValue,
    ) -> Result<bool, StoreError> {
        self.record(|c| c.conditional_update += 1);
        let mut tables = self.tables.write();
        let t = tables.get_mut(table).ok_or_else(|| missing(table))?;
        match t.items.get_mut(key) {
            Some(item) if !item.contains_key(attribute) => {
                item.insert(attribute.to_string(), value);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

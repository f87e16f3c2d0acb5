//! Persistent document store on sled.
//!
//! Each table is a sled tree of `key -> JSON item`. Every secondary index is
//! a sibling tree whose keys are `encoded attribute value, 0x00, item key`,
//! so an index query is a prefix scan. Table layouts are kept in a catalog
//! tree and reloaded on open.

use std::collections::HashMap;
use std::ops::Bound;
use std::path::Path;

use parking_lot::RwLock;
use tracing::{debug, info};

use super::memory::DEFAULT_PAGE_SIZE;
use super::page::collect_page;
use super::{
    AttributeValue, BatchGetOutput, DocumentStore, Item, Page, PutCondition, QueryRequest,
    ScanRequest, Select, StoreError, TableSpec, WriteRequest, MAX_BATCH_GET_KEYS,
    MAX_BATCH_WRITE_REQUESTS,
};

const TABLES_TREE: &str = "__tables";
const SEPARATOR: u8 = 0;

/// sled-backed [`DocumentStore`].
pub struct SledStore {
    db: sled::Db,
    tables: RwLock<HashMap<String, TableSpec>>,
    page_size: usize,
}

impl SledStore {
    /// Open or create a store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Open a throwaway store that is removed on drop.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        let catalog = db.open_tree(TABLES_TREE)?;
        let mut tables = HashMap::new();
        for entry in catalog.iter() {
            let (_, bytes) = entry?;
            let spec: TableSpec = serde_json::from_slice(&bytes)?;
            tables.insert(spec.name.clone(), spec);
        }
        info!(tables = tables.len(), "opened sled document store");
        Ok(Self {
            db,
            tables: RwLock::new(tables),
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Cap the number of items evaluated per page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    fn spec(&self, table: &str) -> Result<TableSpec, StoreError> {
        self.tables
            .read()
            .get(table)
            .cloned()
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))
    }

    fn tree(&self, table: &str) -> Result<sled::Tree, StoreError> {
        Ok(self.db.open_tree(format!("table:{}", table))?)
    }

    fn index_tree(&self, table: &str, attribute: &str) -> Result<sled::Tree, StoreError> {
        Ok(self.db.open_tree(format!("index:{}:{}", table, attribute))?)
    }

    fn page_limit(&self, requested: Option<usize>) -> usize {
        requested.map_or(self.page_size, |l| l.min(self.page_size)).max(1)
    }

    fn decode(bytes: &[u8]) -> Result<Item, StoreError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Replace index entries of `old` with those of `new`.
    fn reindex(
        &self,
        spec: &TableSpec,
        key: &str,
        old: Option<&Item>,
        new: Option<&Item>,
    ) -> Result<(), StoreError> {
        for attribute in &spec.indexes {
            let before = old.and_then(|item| item.get(attribute));
            let after = new.and_then(|item| item.get(attribute));
            if before == after {
                continue;
            }
            let tree = self.index_tree(&spec.name, attribute)?;
            if let Some(value) = before {
                tree.remove(index_key(value, key)?)?;
            }
            if let Some(value) = after {
                tree.insert(index_key(value, key)?, Vec::<u8>::new())?;
            }
        }
        Ok(())
    }

    fn write(&self, spec: &TableSpec, item: Item) -> Result<(), StoreError> {
        let key = spec.key_of(&item)?;
        let bytes = serde_json::to_vec(&item)?;
        let old = self.tree(&spec.name)?.insert(key.as_bytes(), bytes)?;
        let old = old.map(|b| Self::decode(&b)).transpose()?;
        self.reindex(spec, &key, old.as_ref(), Some(&item))
    }

    fn remove(&self, spec: &TableSpec, key: &str) -> Result<(), StoreError> {
        if let Some(old) = self.tree(&spec.name)?.remove(key.as_bytes())? {
            let old = Self::decode(&old)?;
            self.reindex(spec, key, Some(&old), None)?;
        }
        Ok(())
    }
}

fn index_prefix(value: &AttributeValue) -> Result<Vec<u8>, StoreError> {
    let mut prefix = serde_json::to_vec(value)?;
    prefix.push(SEPARATOR);
    Ok(prefix)
}

fn index_key(value: &AttributeValue, key: &str) -> Result<Vec<u8>, StoreError> {
    let mut bytes = index_prefix(value)?;
    bytes.extend_from_slice(key.as_bytes());
    Ok(bytes)
}

fn utf8_key(bytes: &[u8]) -> Result<String, StoreError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| StoreError::Validation(format!("non-UTF-8 key in store: {}", e)))
}

impl DocumentStore for SledStore {
    fn create_table(&self, spec: TableSpec) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        if tables.contains_key(&spec.name) {
            return Ok(());
        }
        debug!(table = %spec.name, "creating sled table");
        let catalog = self.db.open_tree(TABLES_TREE)?;
        catalog.insert(spec.name.as_bytes(), serde_json::to_vec(&spec)?)?;
        self.db.open_tree(format!("table:{}", spec.name))?;
        tables.insert(spec.name.clone(), spec);
        Ok(())
    }

    fn get_item(
        &self,
        table: &str,
        key: &str,
        _consistent_read: bool,
    ) -> Result<Option<Item>, StoreError> {
        self.spec(table)?;
        self.tree(table)?
            .get(key.as_bytes())?
            .map(|bytes| Self::decode(&bytes))
            .transpose()
    }

    fn batch_get_item(
        &self,
        table: &str,
        keys: &[String],
        consistent_read: bool,
    ) -> Result<BatchGetOutput, StoreError> {
        if keys.is_empty() || keys.len() > MAX_BATCH_GET_KEYS {
            return Err(StoreError::Validation(format!(
                "batch get requires 1 to {} keys, got {}",
                MAX_BATCH_GET_KEYS,
                keys.len()
            )));
        }
        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(item) = self.get_item(table, key, consistent_read)? {
                items.push(item);
            }
        }
        Ok(BatchGetOutput {
            items,
            unprocessed_keys: Vec::new(),
        })
    }

    fn query(&self, table: &str, request: &QueryRequest) -> Result<Page, StoreError> {
        let spec = self.spec(table)?;
        let attribute = spec
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

        let index = self.index_tree(table, attribute)?;
        let items = self.tree(table)?;
        let prefix = index_prefix(&request.key_value)?;
        let start = request.exclusive_start_key.clone();

        let rows = index
            .scan_prefix(&prefix)
            .map(|entry| -> Result<Option<(String, Item)>, StoreError> {
                let (index_key, _) = entry?;
                let key = utf8_key(&index_key[prefix.len()..])?;
                if start.as_ref().is_some_and(|s| key.as_str() <= s.as_str()) {
                    return Ok(None);
                }
                match items.get(key.as_bytes())? {
                    Some(bytes) => Ok(Some((key, Self::decode(&bytes)?))),
                    None => Ok(None),
                }
            })
            .filter_map(Result::transpose);

        collect_page(
            rows,
            self.page_limit(request.limit),
            None,
            Select::AllAttributes,
            request.projection.as_deref(),
        )
    }

    fn scan(&self, table: &str, request: &ScanRequest) -> Result<Page, StoreError> {
        self.spec(table)?;
        let tree = self.tree(table)?;
        let range = match &request.exclusive_start_key {
            Some(key) => tree.range::<&[u8], _>((Bound::Excluded(key.as_bytes()), Bound::Unbounded)),
            None => tree.iter(),
        };
        let rows = range.map(|entry| {
            let (key, bytes) = entry?;
            Ok((utf8_key(&key)?, Self::decode(&bytes)?))
        });

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
        let spec = self.spec(table)?;
        match condition {
            PutCondition::Always => self.write(&spec, item),
            PutCondition::KeyAbsent => {
                let key = spec.key_of(&item)?;
                let bytes = serde_json::to_vec(&item)?;
                self.tree(table)?
                    .compare_and_swap(key.as_bytes(), None as Option<&[u8]>, Some(bytes))?
                    .map_err(|_| StoreError::ConditionalCheckFailed)?;
                self.reindex(&spec, &key, None, Some(&item))
            }
        }
    }

    fn delete_item(&self, table: &str, key: &str) -> Result<(), StoreError> {
        let spec = self.spec(table)?;
        self.remove(&spec, key)
    }

    fn batch_write_item(
        &self,
        table: &str,
        requests: Vec<WriteRequest>,
    ) -> Result<Vec<WriteRequest>, StoreError> {
        if requests.is_empty() || requests.len() > MAX_BATCH_WRITE_REQUESTS {
            return Err(StoreError::Validation(format!(
                "batch write requires 1 to {} requests, got {}",
                MAX_BATCH_WRITE_REQUESTS,
                requests.len()
            )));
        }
        let spec = self.spec(table)?;
        for request in requests {
            match request {
                WriteRequest::Put(item) => self.write(&spec, item)?,
                WriteRequest::Delete(key) => self.remove(&spec, &key)?,
            }
        }
        Ok(Vec::new())
    }

    fn set_attribute_if_absent(
        &self,
        table: &str,
        key: &str,
        attribute: &str,
        value: AttributeValue,
    ) -> Result<bool, StoreError> {
        let spec = self.spec(table)?;
        let tree = self.tree(table)?;
        loop {
            let Some(current) = tree.get(key.as_bytes())? else {
                return Ok(false);
            };
            let mut item = Self::decode(&current)?;
            if item.contains_key(attribute) {
                return Ok(false);
            }
            let old = item.clone();
            item.insert(attribute.to_string(), value.clone());
            let bytes = serde_json::to_vec(&item)?;
            if tree
                .compare_and_swap(key.as_bytes(), Some(current), Some(bytes))?
                .is_ok()
            {
                self.reindex(&spec, key, Some(&old), Some(&item))?;
                return Ok(true);
            }
        }
    }
}

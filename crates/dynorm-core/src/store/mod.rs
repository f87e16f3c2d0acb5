//! Document-store abstraction.
//!
//! The engine talks to the store through [`DocumentStore`], a blocking
//! interface shaped like a hosted key-value document service: one string
//! hash key per table, optional single-attribute secondary indexes, scans
//! with server-side filters, and batch reads/writes that may hand back
//! unprocessed work.
//!
//! Two backends are provided: [`MemoryStore`] for tests and embedded use,
//! and [`SledStore`] for persistent local storage.

mod attribute;
mod error;
mod expression;
mod memory;
mod page;
mod registry;
mod sled_store;

pub use attribute::{AttributeValue, Item};
pub use error::StoreError;
pub use expression::{Comparator, FilterExpression, RenderedExpression};
pub use memory::{CallCounts, MemoryStore, DEFAULT_PAGE_SIZE};
pub use registry::ConnectionRegistry;
pub use sled_store::SledStore;

use serde::{Deserialize, Serialize};

/// Maximum number of keys in one batch read.
pub const MAX_BATCH_GET_KEYS: usize = 100;

/// Maximum number of requests in one batch write.
pub const MAX_BATCH_WRITE_REQUESTS: usize = 25;

/// Name of the secondary index on `attribute`.
pub fn index_name(attribute: &str) -> String {
    format!("{}-index", attribute)
}

/// Physical table layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Table name.
    pub name: String,
    /// Hash key attribute. Its values are always strings.
    pub key_attribute: String,
    /// Attributes carrying a secondary index.
    pub indexes: Vec<String>,
}

impl TableSpec {
    /// Create a table layout without indexes.
    pub fn new(name: impl Into<String>, key_attribute: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_attribute: key_attribute.into(),
            indexes: Vec::new(),
        }
    }

    /// Add a secondary index on `attribute`.
    pub fn with_index(mut self, attribute: impl Into<String>) -> Self {
        self.indexes.push(attribute.into());
        self
    }

    /// Attribute backing the named index.
    pub fn index_attribute(&self, index: &str) -> Option<&str> {
        self.indexes
            .iter()
            .find(|attr| index_name(attr) == index)
            .map(String::as_str)
    }

    /// Extract the hash key of an item.
    pub fn key_of(&self, item: &Item) -> Result<String, StoreError> {
        match item.get(&self.key_attribute) {
            Some(AttributeValue::S(key)) => Ok(key.clone()),
            _ => Err(StoreError::Validation(format!(
                "item is missing string key attribute {} for table {}",
                self.key_attribute, self.name
            ))),
        }
    }
}

/// What a scan returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Select {
    /// Matching items.
    #[default]
    AllAttributes,
    /// Only the number of matching items.
    Count,
}

/// Query against a secondary index.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    /// Index name.
    pub index: String,
    /// Attribute the index is keyed on.
    pub key_attribute: String,
    /// Value the index key must equal.
    pub key_value: AttributeValue,
    /// Maximum number of items evaluated in this page.
    pub limit: Option<usize>,
    /// Resume after this primary key.
    pub exclusive_start_key: Option<String>,
    /// Strongly consistent read.
    pub consistent_read: bool,
    /// Attributes to return. `None` returns whole items.
    pub projection: Option<Vec<String>>,
}

impl QueryRequest {
    /// Create a query on `index` for `key_attribute = key_value`.
    pub fn new(
        index: impl Into<String>,
        key_attribute: impl Into<String>,
        key_value: AttributeValue,
    ) -> Self {
        Self {
            index: index.into(),
            key_attribute: key_attribute.into(),
            key_value,
            limit: None,
            exclusive_start_key: None,
            consistent_read: false,
            projection: None,
        }
    }

    /// Set the per-page item limit.
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Request a strongly consistent read.
    pub fn with_consistent_read(mut self, consistent: bool) -> Self {
        self.consistent_read = consistent;
        self
    }

    /// Restrict the returned attributes.
    pub fn with_projection(mut self, attributes: Vec<String>) -> Self {
        self.projection = Some(attributes);
        self
    }
}

/// Full-table scan.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScanRequest {
    /// Server-side filter.
    pub filter: Option<FilterExpression>,
    /// Maximum number of items evaluated in this page.
    pub limit: Option<usize>,
    /// Resume after this primary key.
    pub exclusive_start_key: Option<String>,
    /// Items or count.
    pub select: Select,
    /// Attributes to return. `None` returns whole items.
    pub projection: Option<Vec<String>>,
}

impl ScanRequest {
    /// Create an unfiltered scan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server-side filter.
    pub fn with_filter(mut self, filter: Option<FilterExpression>) -> Self {
        self.filter = filter;
        self
    }

    /// Set the per-page item limit.
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Only count matching items.
    pub fn count_only(mut self) -> Self {
        self.select = Select::Count;
        self
    }

    /// Restrict the returned attributes.
    pub fn with_projection(mut self, attributes: Vec<String>) -> Self {
        self.projection = Some(attributes);
        self
    }
}

/// One page of query or scan results.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Page {
    /// Matching items. Empty in count mode.
    pub items: Vec<Item>,
    /// Number of matching items in this page.
    pub count: usize,
    /// Pagination token; `None` when the table is exhausted.
    pub last_evaluated_key: Option<String>,
}

/// Result of a batch read.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchGetOutput {
    /// Items found. Missing keys are silently absent.
    pub items: Vec<Item>,
    /// Keys the store did not get to; the caller must resubmit them.
    pub unprocessed_keys: Vec<String>,
}

/// A single request inside a batch write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteRequest {
    /// Create or replace an item.
    Put(Item),
    /// Delete by key.
    Delete(String),
}

/// Condition attached to a single-item write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PutCondition {
    /// Create or replace unconditionally.
    #[default]
    Always,
    /// Fail with [`StoreError::ConditionalCheckFailed`] if the key exists.
    KeyAbsent,
}

/// Blocking document-store interface.
///
/// Implementations must be safe to share between threads; the engine holds
/// them behind `Arc<dyn DocumentStore>`.
pub trait DocumentStore: Send + Sync {
    /// Provision a table if it does not already exist.
    fn create_table(&self, spec: TableSpec) -> Result<(), StoreError>;

    /// Fetch one item by key.
    fn get_item(
        &self,
        table: &str,
        key: &str,
        consistent_read: bool,
    ) -> Result<Option<Item>, StoreError>;

    /// Fetch up to [`MAX_BATCH_GET_KEYS`] distinct keys.
    fn batch_get_item(
        &self,
        table: &str,
        keys: &[String],
        consistent_read: bool,
    ) -> Result<BatchGetOutput, StoreError>;

    /// Read one page from a secondary index.
    fn query(&self, table: &str, request: &QueryRequest) -> Result<Page, StoreError>;

    /// Read one page of a full-table scan.
    fn scan(&self, table: &str, request: &ScanRequest) -> Result<Page, StoreError>;

    /// Create or replace an item.
    fn put_item(&self, table: &str, item: Item, condition: PutCondition)
        -> Result<(), StoreError>;

    /// Delete an item. Deleting a missing key succeeds.
    fn delete_item(&self, table: &str, key: &str) -> Result<(), StoreError>;

    /// Apply up to [`MAX_BATCH_WRITE_REQUESTS`] writes, returning the
    /// requests the store did not get to.
    fn batch_write_item(
        &self,
        table: &str,
        requests: Vec<WriteRequest>,
    ) -> Result<Vec<WriteRequest>, StoreError>;

    /// Set `attribute` on an existing item only if the item lacks it.
    ///
    /// Returns `false` when the item is missing or already has the
    /// attribute.
    fn set_attribute_if_absent(
        &self,
        table: &str,
        key: &str,
        attribute: &str,
        value: AttributeValue,
    ) -> Result<bool, StoreError>;
}

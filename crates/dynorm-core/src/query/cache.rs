//! Per-request item cache.
//!
//! Holds items fetched by primary key during one request, so repeated
//! foreign-key lookups hit memory instead of the store. A cache is created
//! empty for each request and is never shared between requests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use parking_lot::RwLock;

use crate::store::Item;

/// Cache key: physical table and encoded primary key.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct CacheKey {
    table: String,
    key: String,
}

impl CacheKey {
    /// Create a key.
    pub fn new(table: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            key: key.into(),
        }
    }
}

/// Cache statistics.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    /// Get hit count.
    pub fn hits(&self) -> u64 {
        self.hits.load(AtomicOrdering::Relaxed)
    }

    /// Get miss count.
    pub fn misses(&self) -> u64 {
        self.misses.load(AtomicOrdering::Relaxed)
    }
}

/// Items fetched during one request, keyed by `(table, pk)`.
#[derive(Debug, Default)]
pub struct RequestCache {
    items: RwLock<HashMap<CacheKey, Item>>,
    stats: CacheStats,
}

impl RequestCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached item for `key` in `table`.
    pub fn get(&self, table: &str, key: &str) -> Option<Item> {
        let found = self.items.read().get(&CacheKey::new(table, key)).cloned();
        let counter = if found.is_some() {
            &self.stats.hits
        } else {
            &self.stats.misses
        };
        counter.fetch_add(1, AtomicOrdering::Relaxed);
        found
    }

    /// Remember an item.
    pub fn insert(&self, table: &str, key: &str, item: Item) {
        self.items.write().insert(CacheKey::new(table, key), item);
    }

    /// Forget one item.
    pub fn invalidate(&self, table: &str, key: &str) {
        self.items.write().remove(&CacheKey::new(table, key));
    }

    /// Forget every item of `table`.
    pub fn invalidate_table(&self, table: &str) {
        self.items.write().retain(|k, _| k.table != table);
    }

    /// Forget everything.
    pub fn clear(&self) {
        self.items.write().clear();
    }

    /// Get cache statistics.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Number of cached items.
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::AttributeValue;

    fn item(id: &str) -> Item {
        let mut item = Item::new();
        item.insert("id".into(), AttributeValue::s(id));
        item
    }

    #[test]
    fn test_get_and_stats() {
        let cache = RequestCache::new();
        assert!(cache.get("author", "1").is_none());
        cache.insert("author", "1", item("1"));
        assert_eq!(cache.get("author", "1"), Some(item("1")));
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
    }

    #[test]
    fn test_invalidation() {
        let cache = RequestCache::new();
        cache.insert("author", "1", item("1"));
        cache.insert("author", "2", item("2"));
        cache.insert("post", "1", item("1"));

        cache.invalidate("author", "1");
        assert_eq!(cache.len(), 2);

        cache.invalidate_table("author");
        assert_eq!(cache.len(), 1);
        assert!(cache.get("post", "1").is_some());

        cache.clear();
        assert!(cache.is_empty());
    }
}

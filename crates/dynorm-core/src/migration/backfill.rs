//! Backfill for added columns.
//!
//! Existing items do not gain an attribute when a column is added to a
//! model. The backfill scans for items missing the attribute and writes the
//! column default with a conditional "attribute absent" update, so it never
//! overwrites a value written concurrently.

use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use crate::catalog::{Catalog, ColumnDef};
use crate::config::EngineConfig;
use crate::error::Error;
use crate::query::ValueCodec;
use crate::store::{DocumentStore, FilterExpression, ScanRequest};

/// Configuration for backfill execution.
#[derive(Debug, Clone, Default)]
pub struct BackfillConfig {
    /// Items evaluated per scan page. `None` uses the store's page size.
    pub page_size: Option<usize>,
    /// Delay between pages in milliseconds (for yielding to writes).
    pub page_delay_ms: u64,
}

impl BackfillConfig {
    /// Set the scan page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size.max(1));
        self
    }

    /// Set the delay between pages.
    pub fn with_page_delay_ms(mut self, delay_ms: u64) -> Self {
        self.page_delay_ms = delay_ms;
        self
    }
}

/// Progress report for a backfill.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillProgress {
    /// Model being processed.
    pub model: String,
    /// Column being populated.
    pub column: String,
    /// Items found missing the attribute.
    pub scanned: usize,
    /// Items the default was written to.
    pub updated: usize,
    /// Items that gained the attribute (or vanished) before the write.
    pub skipped: usize,
    /// Scan pages read.
    pub pages: usize,
}

impl BackfillProgress {
    /// Create an empty progress report.
    pub fn new(model: &str, column: &str) -> Self {
        Self {
            model: model.to_string(),
            column: column.to_string(),
            ..Self::default()
        }
    }
}

/// Populates the default of a column on existing items.
pub struct Backfill<'a> {
    store: &'a dyn DocumentStore,
    catalog: &'a Catalog,
    engine: &'a EngineConfig,
    config: BackfillConfig,
}

impl<'a> Backfill<'a> {
    /// Create a backfill runner.
    pub fn new(store: &'a dyn DocumentStore, catalog: &'a Catalog, engine: &'a EngineConfig) -> Self {
        Self {
            store,
            catalog,
            engine,
            config: BackfillConfig::default(),
        }
    }

    /// Use a custom backfill configuration.
    pub fn with_config(mut self, config: BackfillConfig) -> Self {
        self.config = config;
        self
    }

    /// Add `column` to `model` in the catalog, then backfill it.
    pub fn add_column(&self, model: &str, column: ColumnDef) -> Result<BackfillProgress, Error> {
        let name = column.name.clone();
        self.catalog.add_column(model, column)?;
        self.run(model, &name)
    }

    /// Write the default of `column` to every item of `model` lacking it.
    ///
    /// The default is evaluated once, so generated defaults such as the
    /// current time are the same on every backfilled item.
    pub fn run(&self, model: &str, column: &str) -> Result<BackfillProgress, Error> {
        let model = self.catalog.model(model)?;
        let column = model.require_column(column)?;
        let mut progress = BackfillProgress::new(&model.name, &column.name);

        let codec = ValueCodec::new(self.catalog, self.engine.use_tz);
        let default = match codec.encode(column, &column.default_value())? {
            Some(value) => value,
            None => {
                debug!(model = %model.name, column = %column.name, "no default to backfill");
                return Ok(progress);
            }
        };

        let spec = model.table_spec(self.engine);
        let table = spec.name.clone();
        let mut request = ScanRequest::new()
            .with_filter(Some(FilterExpression::NotExists(column.name.clone())))
            .with_limit(self.config.page_size)
            .with_projection(vec![spec.key_attribute.clone()]);

        loop {
            let page = self.store.scan(&table, &request)?;
            progress.pages += 1;
            progress.scanned += page.items.len();

            for item in &page.items {
                let key = spec.key_of(item)?;
                if self
                    .store
                    .set_attribute_if_absent(&table, &key, &column.name, default.clone())?
                {
                    progress.updated += 1;
                } else {
                    progress.skipped += 1;
                }
            }

            match page.last_evaluated_key {
                Some(key) => request.exclusive_start_key = Some(key),
                None => break,
            }
            if self.config.page_delay_ms > 0 {
                thread::sleep(Duration::from_millis(self.config.page_delay_ms));
            }
        }

        info!(
            model = %progress.model,
            column = %progress.column,
            updated = progress.updated,
            skipped = progress.skipped,
            pages = progress.pages,
            "backfill complete"
        );
        Ok(progress)
    }
}

//! Model definitions.

use serde::{Deserialize, Serialize};

use super::column::ColumnDef;
use crate::config::EngineConfig;
use crate::error::Error;
use crate::store::TableSpec;

/// Column name that always refers to the primary key.
pub const PK_ALIAS: &str = "pk";

/// A model: a named set of columns stored in one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDef {
    /// Model name.
    pub name: String,
    /// Logical table name, before any configured prefix.
    pub table: String,
    /// Name of the primary-key column.
    pub primary_key: String,
    /// Columns in declaration order.
    pub columns: Vec<ColumnDef>,
}

impl ModelDef {
    /// Create a model whose table is the lowercased model name.
    pub fn new(name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            table: name.to_lowercase(),
            name,
            primary_key: primary_key.into(),
            columns: Vec::new(),
        }
    }

    /// Override the table name.
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Add a column.
    pub fn with_column(mut self, mut column: ColumnDef) -> Self {
        column.primary_key = column.name == self.primary_key;
        if column.primary_key {
            column.nullable = false;
        }
        self.columns.push(column);
        self
    }

    /// Add several columns.
    pub fn with_columns(self, columns: impl IntoIterator<Item = ColumnDef>) -> Self {
        columns.into_iter().fold(self, ModelDef::with_column)
    }

    /// Look up a column. `pk` resolves to the primary key.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        let name = if name == PK_ALIAS {
            self.primary_key.as_str()
        } else {
            name
        };
        self.columns.iter().find(|c| c.name == name)
    }

    /// Look up a column or fail with a validation error.
    pub fn require_column(&self, name: &str) -> Result<&ColumnDef, Error> {
        self.column(name).ok_or_else(|| {
            Error::Validation(format!("{} has no column named {}", self.name, name))
        })
    }

    /// The primary-key column.
    pub fn primary_key_column(&self) -> Result<&ColumnDef, Error> {
        self.columns
            .iter()
            .find(|c| c.primary_key)
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "{} declares primary key {} but has no such column",
                    self.name, self.primary_key
                ))
            })
    }

    /// Whether `name` (or the `pk` alias) is the primary key.
    pub fn is_primary_key(&self, name: &str) -> bool {
        name == PK_ALIAS || name == self.primary_key
    }

    /// Columns that carry a secondary index.
    pub fn indexed_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| c.indexed && !c.primary_key)
    }

    /// Physical table layout under `config`.
    pub fn table_spec(&self, config: &EngineConfig) -> TableSpec {
        self.indexed_columns().fold(
            TableSpec::new(config.table_name(&self.table), &self.primary_key),
            |spec, col| spec.with_index(&col.name),
        )
    }
}

//! Column definitions for models.

use chrono::Utc;
use dynorm_proto::{Timestamp, Value};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::ColumnType;

/// A column definition within a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column (attribute) name.
    pub name: String,
    /// Column type.
    pub column_type: ColumnType,
    /// Whether the column accepts null.
    pub nullable: bool,
    /// Whether the column carries a secondary index named `{name}-index`.
    pub indexed: bool,
    /// Whether this is the model's primary key. Set by [`ModelDef`](super::ModelDef).
    pub primary_key: bool,
    /// Maximum length in characters, for string columns.
    pub max_length: Option<usize>,
    /// Default applied when a value is absent.
    pub default: Option<DefaultValue>,
}

/// Default value for a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DefaultValue {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// String value.
    String(String),
    /// Arbitrary nested value.
    Json(serde_json::Value),
    /// Current timestamp (evaluated when applied).
    CurrentTimestamp,
    /// Current date (evaluated when applied).
    CurrentDate,
    /// Fresh random UUID.
    AutoUuid,
}

impl DefaultValue {
    /// Produce the default as a value.
    pub fn evaluate(&self) -> Value {
        match self {
            DefaultValue::Null => Value::Null,
            DefaultValue::Bool(b) => Value::Bool(*b),
            DefaultValue::Int(i) => Value::Int(*i),
            DefaultValue::Float(f) => Value::Float(*f),
            DefaultValue::String(s) => Value::String(s.clone()),
            DefaultValue::Json(j) => Value::Json(j.clone()),
            DefaultValue::CurrentTimestamp => Value::Timestamp(Timestamp::now()),
            DefaultValue::CurrentDate => Value::Date(Utc::now().date_naive()),
            DefaultValue::AutoUuid => Value::Uuid(Uuid::new_v4()),
        }
    }
}

impl ColumnDef {
    /// Create a non-nullable column.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
            indexed: false,
            primary_key: false,
            max_length: None,
            default: None,
        }
    }

    /// Create a nullable column.
    pub fn optional(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            nullable: true,
            ..Self::new(name, column_type)
        }
    }

    /// Mark the column as carrying a secondary index.
    pub fn with_index(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Set a default value.
    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    /// Set a maximum length.
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// Value used when the column is absent.
    pub fn default_value(&self) -> Value {
        self.default
            .as_ref()
            .map(DefaultValue::evaluate)
            .unwrap_or(Value::Null)
    }

    /// Referenced model, for foreign-key columns.
    pub fn references(&self) -> Option<&str> {
        match &self.column_type {
            ColumnType::ForeignKey { model } => Some(model),
            _ => None,
        }
    }
}

//! Column type definitions.

use serde::{Deserialize, Serialize};

/// Semantic type of a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    /// UTF-8 text.
    String,
    /// 64-bit signed integer.
    Integer,
    /// Integer primary key generated by the engine when absent.
    AutoInteger,
    /// 64-bit floating point.
    Float,
    /// Boolean.
    Boolean,
    /// Point in time.
    Timestamp,
    /// Calendar date.
    Date,
    /// UUID.
    Uuid,
    /// Nested list/map data stored natively.
    Json,
    /// Reference to another model's primary key.
    ForeignKey {
        /// Referenced model name.
        model: String,
    },
}

impl ColumnType {
    /// Create a foreign-key type referencing `model`.
    pub fn foreign_key(model: impl Into<String>) -> Self {
        ColumnType::ForeignKey {
            model: model.into(),
        }
    }

    /// Whether this type can serve as a primary key.
    pub fn is_key_type(&self) -> bool {
        matches!(
            self,
            ColumnType::String | ColumnType::Integer | ColumnType::AutoInteger | ColumnType::Uuid
        )
    }

    /// Whether this is an integer type.
    pub fn is_integer(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::AutoInteger)
    }

    /// Short name used in error messages.
    pub fn name(&self) -> &str {
        match self {
            ColumnType::String => "string",
            ColumnType::Integer => "integer",
            ColumnType::AutoInteger => "auto integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Date => "date",
            ColumnType::Uuid => "uuid",
            ColumnType::Json => "json",
            ColumnType::ForeignKey { .. } => "foreign key",
        }
    }
}

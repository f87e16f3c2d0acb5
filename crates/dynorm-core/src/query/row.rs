//! Decoded result rows.

use dynorm_proto::Value;

/// A decoded row: `(column, value)` pairs in projection order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    /// Column values in projection order.
    pub fields: Vec<(String, Value)>,
}

impl Row {
    /// Create a row from its fields.
    pub fn new(fields: Vec<(String, Value)>) -> Self {
        Self { fields }
    }

    /// Value of `column`, if projected.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Value of `column`, or null when not projected.
    pub fn value(&self, column: &str) -> &Value {
        const NULL: Value = Value::Null;
        self.get(column).unwrap_or(&NULL)
    }

    /// Keep only the named columns, in the given order.
    pub fn project(mut self, columns: &[String]) -> Self {
        let mut fields = Vec::with_capacity(columns.len());
        for column in columns {
            if let Some(pos) = self.fields.iter().position(|(name, _)| name == column) {
                fields.push(self.fields.swap_remove(pos));
            }
        }
        Self { fields }
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the row has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

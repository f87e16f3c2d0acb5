//! Mutation IR types for write operations.

use crate::query::Predicate;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// A write request against one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    /// Insert one item per row.
    Insert {
        /// Model to insert into.
        model: String,
        /// Column values, one list per row.
        rows: Vec<Vec<FieldValue>>,
    },
    /// Replace columns on every matching item.
    Update {
        /// Model to update.
        model: String,
        /// Items to update. `None` updates every item.
        filter: Option<Predicate>,
        /// Column assignments. `Value::Null` removes the attribute.
        data: Vec<FieldValue>,
    },
    /// Delete every matching item.
    Delete {
        /// Model to delete from.
        model: String,
        /// Items to delete. `None` deletes every item.
        filter: Option<Predicate>,
    },
}

/// A field name and value pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    /// Field name.
    pub field: String,
    /// Field value.
    pub value: Value,
}

impl FieldValue {
    /// Create a new field-value pair.
    pub fn new(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

impl Mutation {
    /// Create a single-row insert.
    pub fn insert(model: impl Into<String>, data: Vec<FieldValue>) -> Self {
        Mutation::Insert {
            model: model.into(),
            rows: vec![data],
        }
    }

    /// Create a multi-row insert.
    pub fn insert_many(model: impl Into<String>, rows: Vec<Vec<FieldValue>>) -> Self {
        Mutation::Insert {
            model: model.into(),
            rows,
        }
    }

    /// Create an update.
    pub fn update(
        model: impl Into<String>,
        filter: Option<Predicate>,
        data: Vec<FieldValue>,
    ) -> Self {
        Mutation::Update {
            model: model.into(),
            filter,
            data,
        }
    }

    /// Create a delete.
    pub fn delete(model: impl Into<String>, filter: Option<Predicate>) -> Self {
        Mutation::Delete {
            model: model.into(),
            filter,
        }
    }

    /// Model targeted by this mutation.
    pub fn model(&self) -> &str {
        match self {
            Mutation::Insert { model, .. }
            | Mutation::Update { model, .. }
            | Mutation::Delete { model, .. } => model,
        }
    }
}

/// Outcome of a mutation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MutationResult {
    /// Number of items written or deleted.
    pub affected: usize,
    /// Primary keys of inserted items, in row order.
    pub inserted_keys: Vec<Value>,
}

impl MutationResult {
    /// Create a result for inserted rows.
    pub fn inserted(keys: Vec<Value>) -> Self {
        Self {
            affected: keys.len(),
            inserted_keys: keys,
        }
    }

    /// Create a result for a successful update or delete.
    pub fn affected(count: usize) -> Self {
        Self {
            affected: count,
            inserted_keys: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Lookup;

    #[test]
    fn test_mutation_constructors() {
        let insert = Mutation::insert("Author", vec![FieldValue::new("username", "alice")]);
        assert_eq!(insert.model(), "Author");
        match insert {
            Mutation::Insert { rows, .. } => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0][0].value, Value::String("alice".into()));
            }
            _ => panic!("expected insert"),
        }

        let delete = Mutation::delete("Author", Some(Lookup::exact("pk", 3).into()));
        assert_eq!(delete.model(), "Author");
    }

    #[test]
    fn test_mutation_result() {
        let result = MutationResult::inserted(vec![Value::Int(4), Value::Int(9)]);
        assert_eq!(result.affected, 2);
        assert!(MutationResult::affected(3).inserted_keys.is_empty());
    }
}

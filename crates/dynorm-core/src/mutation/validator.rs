//! Pre-flight validation of written rows.
//!
//! Every row of a write is checked before the first store call, so a bad
//! row never leaves a partially applied batch behind.

use std::collections::HashMap;

use dynorm_proto::{FieldValue, Value};

use crate::catalog::{ColumnDef, ModelDef};
use crate::error::Error;
use crate::query::ValueCodec;
use crate::store::{AttributeValue, Item};

/// A row ready to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRow {
    /// Encoded attributes, without the primary key when it is generated.
    pub item: Item,
    /// Primary-key value supplied by the caller, if any.
    pub key: Option<Value>,
}

/// Checks rows against a model's column definitions.
pub struct RowValidator<'a> {
    model: &'a ModelDef,
    codec: ValueCodec<'a>,
}

impl<'a> RowValidator<'a> {
    /// Create a validator for `model`.
    pub fn new(model: &'a ModelDef, codec: ValueCodec<'a>) -> Self {
        Self { model, codec }
    }

    /// Validate an inserted row and apply column defaults.
    pub fn prepare_insert(&self, data: &[FieldValue]) -> Result<PreparedRow, Error> {
        let mut provided: HashMap<&str, &Value> = HashMap::with_capacity(data.len());
        for fv in data {
            let column = self.model.require_column(&fv.field)?;
            provided.insert(column.name.as_str(), &fv.value);
        }

        let mut item = Item::new();
        let mut key = None;
        for column in &self.model.columns {
            let value = match provided.get(column.name.as_str()) {
                Some(value) if !value.is_null() => (*value).clone(),
                _ => column.default_value(),
            };
            if column.primary_key {
                if !value.is_null() {
                    item.insert(column.name.clone(), self.encode_key(column, &value)?);
                    key = Some(value);
                }
                continue;
            }
            if let Some(attr) = self.check(column, &value)? {
                item.insert(column.name.clone(), attr);
            }
        }
        Ok(PreparedRow { item, key })
    }

    /// Validate update assignments. `None` removes the attribute.
    pub fn prepare_update(
        &self,
        data: &[FieldValue],
    ) -> Result<Vec<(String, Option<AttributeValue>)>, Error> {
        data.iter()
            .map(|fv| {
                let column = self.model.require_column(&fv.field)?;
                if column.primary_key {
                    return Err(Error::Validation(format!(
                        "primary key {}.{} cannot be updated",
                        self.model.name, column.name
                    )));
                }
                Ok((column.name.clone(), self.check(column, &fv.value)?))
            })
            .collect()
    }

    /// Encode a primary-key value as the item key attribute.
    pub fn encode_key(&self, column: &ColumnDef, value: &Value) -> Result<AttributeValue, Error> {
        Ok(AttributeValue::S(self.codec.encode_key(column, value)?))
    }

    fn check(&self, column: &ColumnDef, value: &Value) -> Result<Option<AttributeValue>, Error> {
        if value.is_null() {
            if !column.nullable {
                return Err(Error::Validation(format!(
                    "{}.{} cannot be null",
                    self.model.name, column.name
                )));
            }
            return Ok(None);
        }
        if let (Some(max), Value::String(s)) = (column.max_length, value) {
            let len = s.chars().count();
            if len > max {
                return Err(Error::Validation(format!(
                    "{}.{} is {} characters long, the maximum is {}",
                    self.model.name, column.name, len, max
                )));
            }
        }
        self.codec.encode(column, value)
    }
}

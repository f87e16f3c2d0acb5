//! Value codec for converting between typed values and store attributes.
//!
//! Encoding is strict: a value that does not fit its column is a validation
//! error, raised before anything reaches the store. Decoding is lenient: a
//! stored attribute that cannot be read as the column's type comes back as
//! its raw conversion instead of failing the read.

use chrono::NaiveDate;
use dynorm_proto::{Timestamp, Value};
use uuid::Uuid;

use crate::catalog::{Catalog, ColumnDef, ColumnType, ModelDef};
use crate::error::Error;
use crate::store::{AttributeValue, Item};

use super::row::Row;

/// Converts values for the columns of a catalog.
#[derive(Clone, Copy)]
pub struct ValueCodec<'a> {
    catalog: &'a Catalog,
    assume_utc: bool,
}

impl<'a> ValueCodec<'a> {
    /// Create a codec. With `assume_utc`, naive stored timestamps decode as UTC.
    pub fn new(catalog: &'a Catalog, assume_utc: bool) -> Self {
        Self {
            catalog,
            assume_utc,
        }
    }

    /// Encode a value for `column`. `Ok(None)` means "leave the attribute absent".
    pub fn encode(
        &self,
        column: &ColumnDef,
        value: &Value,
    ) -> Result<Option<AttributeValue>, Error> {
        if is_null(value) {
            return Ok(None);
        }
        if column.primary_key || column.references().is_some() {
            return self.encode_key(column, value).map(|k| Some(AttributeValue::S(k)));
        }

        let attr = match &column.column_type {
            ColumnType::String => AttributeValue::S(text(column, value)?),
            ty if ty.is_integer() => AttributeValue::N(integer(column, value)?.to_string()),
            ColumnType::Float => AttributeValue::N(float(column, value)?.to_string()),
            ColumnType::Boolean => match value {
                Value::Bool(b) => AttributeValue::Bool(*b),
                other => return Err(mismatch(column, other)),
            },
            ColumnType::Timestamp => AttributeValue::S(timestamp(column, value)?.to_iso8601()),
            ColumnType::Date => {
                AttributeValue::S(date(column, value)?.format("%Y-%m-%d").to_string())
            }
            ColumnType::Uuid => AttributeValue::S(uuid(column, value)?.hyphenated().to_string()),
            ColumnType::Json => AttributeValue::from_json(&json(value)),
            _ => AttributeValue::S(self.encode_key(column, value)?),
        };
        Ok(Some(attr))
    }

    /// Encode a value as a string key for a primary-key or foreign-key column.
    pub fn encode_key(&self, column: &ColumnDef, value: &Value) -> Result<String, Error> {
        match &column.column_type {
            ColumnType::Uuid => Ok(uuid(column, value)?.hyphenated().to_string()),
            ty if ty.is_integer() => Ok(integer(column, value)?.to_string()),
            ColumnType::String => text(column, value),
            ColumnType::ForeignKey { .. } => {
                let target = self.key_column(column)?;
                self.encode_key(&target, value)
            }
            _ => Err(Error::Configuration(format!(
                "column {} of type {} cannot be used as a key",
                column.name,
                column.column_type.name()
            ))),
        }
    }

    /// Decode a stored attribute for `column`. Never fails.
    ///
    /// An absent attribute yields the column default, or null.
    pub fn decode(&self, column: &ColumnDef, attr: Option<&AttributeValue>) -> Value {
        let attr = match attr {
            None | Some(AttributeValue::Null) => return column.default_value(),
            Some(attr) => attr,
        };
        match &column.column_type {
            ColumnType::ForeignKey { .. } => match self.key_column(column) {
                Ok(target) => self.decode_as(&target.column_type, attr),
                Err(_) => raw_value(attr),
            },
            other => self.decode_as(other, attr),
        }
    }

    /// Decode the projected columns of an item into a row.
    pub fn decode_item(&self, columns: &[&ColumnDef], item: &Item) -> Row {
        Row::new(
            columns
                .iter()
                .map(|c| (c.name.clone(), self.decode(c, item.get(&c.name))))
                .collect(),
        )
    }

    /// Encode a full row for `model`, dropping absent attributes.
    pub fn encode_row(&self, model: &ModelDef, values: &[(String, Value)]) -> Result<Item, Error> {
        let mut item = Item::new();
        for (name, value) in values {
            let column = model.require_column(name)?;
            if let Some(attr) = self.encode(column, value)? {
                item.insert(column.name.clone(), attr);
            }
        }
        Ok(item)
    }

    fn key_column(&self, column: &ColumnDef) -> Result<ColumnDef, Error> {
        self.catalog.referenced_key(column)?.ok_or_else(|| {
            Error::Configuration(format!("{} does not reference a model", column.name))
        })
    }

    fn decode_as(&self, column_type: &ColumnType, attr: &AttributeValue) -> Value {
        let decoded = match (column_type, attr) {
            (ColumnType::Boolean, AttributeValue::Bool(b)) => Some(Value::Bool(*b)),
            (ty, AttributeValue::N(n)) if ty.is_integer() => parse_integer(n).map(Value::Int),
            (ty, AttributeValue::S(s)) if ty.is_integer() => {
                s.trim().parse::<i64>().ok().map(Value::Int)
            }
            (ColumnType::Float, AttributeValue::N(n)) => n.parse::<f64>().ok().map(Value::Float),
            (ColumnType::String, AttributeValue::S(s)) => Some(Value::String(s.clone())),
            (ColumnType::Uuid, AttributeValue::S(s)) => {
                Uuid::parse_str(s).ok().map(Value::Uuid)
            }
            (ColumnType::Timestamp, AttributeValue::S(s)) => {
                Timestamp::parse_iso8601(s).map(|ts| {
                    if self.assume_utc {
                        Value::Timestamp(ts.assume_utc())
                    } else {
                        Value::Timestamp(ts)
                    }
                })
            }
            (ColumnType::Date, AttributeValue::S(s)) => {
                NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok().map(Value::Date)
            }
            (ColumnType::Json, attr) => Some(Value::Json(attr.to_json())),
            _ => None,
        };
        decoded.unwrap_or_else(|| raw_value(attr))
    }
}

/// Generic conversion of a stored attribute, used when no column rule applies.
pub fn raw_value(attr: &AttributeValue) -> Value {
    match attr {
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::N(n) => {
            if let Ok(i) = n.parse::<i64>() {
                Value::Int(i)
            } else if let Ok(f) = n.parse::<f64>() {
                Value::Float(f)
            } else {
                Value::String(n.clone())
            }
        }
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::Null => Value::Null,
        AttributeValue::L(_) | AttributeValue::M(_) => Value::Json(attr.to_json()),
    }
}

fn is_null(value: &Value) -> bool {
    matches!(value, Value::Null | Value::Json(serde_json::Value::Null))
}

fn mismatch(column: &ColumnDef, value: &Value) -> Error {
    Error::Validation(format!(
        "{} expects a {} value, got {}",
        column.name,
        column.column_type.name(),
        value.type_name()
    ))
}

/// Decimal text to integer, truncating any fractional part.
fn parse_integer(n: &str) -> Option<i64> {
    if let Ok(i) = n.trim().parse::<i64>() {
        return Some(i);
    }
    let f = n.trim().parse::<f64>().ok()?;
    (f.is_finite() && f.abs() < i64::MAX as f64).then(|| f.trunc() as i64)
}

fn text(column: &ColumnDef, value: &Value) -> Result<String, Error> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Uuid(u) => Ok(u.hyphenated().to_string()),
        Value::Int(i) => Ok(i.to_string()),
        other => Err(mismatch(column, other)),
    }
}

fn integer(column: &ColumnDef, value: &Value) -> Result<i64, Error> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::Float(f) if f.is_finite() && f.fract() == 0.0 => Ok(*f as i64),
        Value::String(s) => s.trim().parse::<i64>().map_err(|_| {
            Error::Validation(format!("{} expects an integer, got {:?}", column.name, s))
        }),
        other => Err(mismatch(column, other)),
    }
}

fn float(column: &ColumnDef, value: &Value) -> Result<f64, Error> {
    let f = match value {
        Value::Float(f) => *f,
        Value::Int(i) => *i as f64,
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| {
            Error::Validation(format!("{} expects a float, got {:?}", column.name, s))
        })?,
        other => return Err(mismatch(column, other)),
    };
    if f.is_finite() {
        Ok(f)
    } else {
        Err(Error::Validation(format!(
            "{} cannot store non-finite float {}",
            column.name, f
        )))
    }
}

fn timestamp(column: &ColumnDef, value: &Value) -> Result<Timestamp, Error> {
    match value {
        Value::Timestamp(ts) => Ok(*ts),
        Value::Date(d) => Ok(Timestamp::Naive(d.and_time(chrono::NaiveTime::MIN))),
        Value::String(s) => Timestamp::parse_iso8601(s).ok_or_else(|| {
            Error::Validation(format!("{} expects an ISO-8601 timestamp, got {:?}", column.name, s))
        }),
        other => Err(mismatch(column, other)),
    }
}

fn date(column: &ColumnDef, value: &Value) -> Result<NaiveDate, Error> {
    match value {
        Value::Date(d) => Ok(*d),
        Value::Timestamp(Timestamp::Aware(dt)) => Ok(dt.date_naive()),
        Value::Timestamp(Timestamp::Naive(dt)) => Ok(dt.date()),
        Value::String(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| {
            Error::Validation(format!("{} expects a YYYY-MM-DD date, got {:?}", column.name, s))
        }),
        other => Err(mismatch(column, other)),
    }
}

fn uuid(column: &ColumnDef, value: &Value) -> Result<Uuid, Error> {
    match value {
        Value::Uuid(u) => Ok(*u),
        Value::String(s) => Uuid::parse_str(s.trim()).map_err(|_| {
            Error::Validation(format!("{:?} is not a valid UUID for {}", s, column.name))
        }),
        other => Err(mismatch(column, other)),
    }
}

fn json(value: &Value) -> serde_json::Value {
    match value {
        Value::Json(j) => j.clone(),
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Float(f) => serde_json::Value::from(*f),
        other => serde_json::Value::String(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DefaultValue;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn setup_catalog() -> Catalog {
        let author = ModelDef::new("Author", "id")
            .with_column(ColumnDef::new("id", ColumnType::AutoInteger))
            .with_column(ColumnDef::new("username", ColumnType::String));
        let group = ModelDef::new("Group", "id")
            .with_column(ColumnDef::new("id", ColumnType::Uuid));
        Catalog::new().with_models([author, group]).unwrap()
    }

    fn col(name: &str, column_type: ColumnType) -> ColumnDef {
        ColumnDef::optional(name, column_type)
    }

    fn round_trip(codec: &ValueCodec<'_>, column: &ColumnDef, value: Value) {
        let encoded = codec.encode(column, &value).unwrap();
        assert_eq!(codec.decode(column, encoded.as_ref()), value, "column {}", column.name);
    }

    #[test]
    fn test_round_trip_every_type() {
        let catalog = setup_catalog();
        let codec = ValueCodec::new(&catalog, true);

        round_trip(&codec, &col("s", ColumnType::String), Value::String("héllo".into()));
        round_trip(&codec, &col("i", ColumnType::Integer), Value::Int(-42));
        round_trip(&codec, &col("f", ColumnType::Float), Value::Float(0.1));
        round_trip(&codec, &col("b", ColumnType::Boolean), Value::Bool(false));
        round_trip(&codec, &col("u", ColumnType::Uuid), Value::Uuid(Uuid::new_v4()));
        round_trip(
            &codec,
            &col("t", ColumnType::Timestamp),
            Utc.with_ymd_and_hms(2024, 3, 9, 8, 0, 0).unwrap().into(),
        );
        round_trip(
            &codec,
            &col("d", ColumnType::Date),
            Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()),
        );
        round_trip(
            &codec,
            &col("j", ColumnType::Json),
            Value::Json(json!({"tags": ["x"], "n": 2})),
        );
        round_trip(
            &codec,
            &col("author_id", ColumnType::foreign_key("Author")),
            Value::Int(7),
        );
        round_trip(
            &codec,
            &col("group_id", ColumnType::foreign_key("Group")),
            Value::Uuid(Uuid::new_v4()),
        );

        for ty in [ColumnType::String, ColumnType::Integer, ColumnType::Json] {
            round_trip(&codec, &col("n", ty), Value::Null);
        }
    }

    #[test]
    fn test_null_is_absent_and_default_applies() {
        let catalog = setup_catalog();
        let codec = ValueCodec::new(&catalog, true);
        let column = ColumnDef::new("rank", ColumnType::Integer).with_default(DefaultValue::Int(3));

        assert_eq!(codec.encode(&column, &Value::Null).unwrap(), None);
        assert_eq!(codec.decode(&column, None), Value::Int(3));
    }

    #[test]
    fn test_keys_are_strings() {
        let catalog = setup_catalog();
        let codec = ValueCodec::new(&catalog, true);
        let author = catalog.model("Author").unwrap();
        let pk = author.primary_key_column().unwrap();

        assert_eq!(codec.encode(pk, &Value::Int(12)).unwrap(), Some(AttributeValue::s("12")));
        assert_eq!(codec.decode(pk, Some(&AttributeValue::s("12"))), Value::Int(12));
        assert_eq!(codec.encode_key(pk, &Value::String("12".into())).unwrap(), "12");
    }

    #[test]
    fn test_naive_timestamp_decodes_as_utc() {
        let catalog = setup_catalog();
        let column = col("t", ColumnType::Timestamp);
        let stored = AttributeValue::s("2024-01-01T12:00:00");

        match ValueCodec::new(&catalog, true).decode(&column, Some(&stored)) {
            Value::Timestamp(ts) => assert!(ts.is_aware()),
            other => panic!("expected timestamp, got {:?}", other),
        }
        match ValueCodec::new(&catalog, false).decode(&column, Some(&stored)) {
            Value::Timestamp(ts) => assert!(!ts.is_aware()),
            other => panic!("expected timestamp, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_falls_back_to_raw() {
        let catalog = setup_catalog();
        let codec = ValueCodec::new(&catalog, true);

        assert_eq!(
            codec.decode(&col("u", ColumnType::Uuid), Some(&AttributeValue::s("not-a-uuid"))),
            Value::String("not-a-uuid".into())
        );
        assert_eq!(
            codec.decode(&col("t", ColumnType::Timestamp), Some(&AttributeValue::s("soon"))),
            Value::String("soon".into())
        );
        assert_eq!(
            codec.decode(&col("i", ColumnType::Integer), Some(&AttributeValue::s("x1"))),
            Value::String("x1".into())
        );
        assert_eq!(
            codec.decode(&col("b", ColumnType::Boolean), Some(&AttributeValue::n(1))),
            Value::Int(1)
        );
    }

    #[test]
    fn test_integer_decode_tolerates_strings_and_decimals() {
        let catalog = setup_catalog();
        let codec = ValueCodec::new(&catalog, true);
        let column = col("i", ColumnType::Integer);

        assert_eq!(codec.decode(&column, Some(&AttributeValue::s("-15"))), Value::Int(-15));
        assert_eq!(
            codec.decode(&column, Some(&AttributeValue::N("3.7".into()))),
            Value::Int(3)
        );
    }

    #[test]
    fn test_encode_validation_errors() {
        let catalog = setup_catalog();
        let codec = ValueCodec::new(&catalog, true);

        assert!(matches!(
            codec.encode(&col("b", ColumnType::Boolean), &Value::Int(1)),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            codec.encode(&col("u", ColumnType::Uuid), &Value::String("nope".into())),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            codec.encode(&col("f", ColumnType::Float), &Value::Float(f64::NAN)),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            codec.encode(&col("i", ColumnType::Integer), &Value::Float(1.5)),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_float_keeps_decimal_text() {
        let catalog = setup_catalog();
        let codec = ValueCodec::new(&catalog, true);
        let encoded = codec
            .encode(&col("f", ColumnType::Float), &Value::Float(0.1))
            .unwrap();
        assert_eq!(encoded, Some(AttributeValue::N("0.1".into())));
    }
}

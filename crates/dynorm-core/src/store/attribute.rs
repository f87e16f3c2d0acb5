//! Store-native attribute values.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A stored item: attribute name to value.
pub type Item = BTreeMap<String, AttributeValue>;

/// A store-native attribute value.
///
/// Numbers are carried as decimal strings so that no precision is lost
/// between the caller and the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    /// String.
    S(String),
    /// Number, as a decimal string.
    N(String),
    /// Boolean.
    Bool(bool),
    /// Explicit null.
    Null,
    /// List.
    L(Vec<AttributeValue>),
    /// Map.
    M(BTreeMap<String, AttributeValue>),
}

impl AttributeValue {
    /// Build a string attribute.
    pub fn s(value: impl Into<String>) -> Self {
        AttributeValue::S(value.into())
    }

    /// Build a number attribute from an integer.
    pub fn n(value: i64) -> Self {
        AttributeValue::N(value.to_string())
    }

    /// Try to get as string.
    pub fn as_s(&self) -> Option<&str> {
        match self {
            AttributeValue::S(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get the decimal text of a number.
    pub fn as_n(&self) -> Option<&str> {
        match self {
            AttributeValue::N(n) => Some(n),
            _ => None,
        }
    }

    /// Compare two attributes the way the store orders them.
    ///
    /// Numbers compare numerically and strings lexicographically by UTF-8
    /// bytes. Any other pairing is incomparable.
    pub fn compare(&self, other: &AttributeValue) -> Option<Ordering> {
        match (self, other) {
            (AttributeValue::N(a), AttributeValue::N(b)) => compare_numbers(a, b),
            (AttributeValue::S(a), AttributeValue::S(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
            (AttributeValue::Bool(a), AttributeValue::Bool(b)) if a == b => Some(Ordering::Equal),
            (AttributeValue::Null, AttributeValue::Null) => Some(Ordering::Equal),
            _ => None,
        }
    }

    /// Store equality: numbers compare by value, everything else structurally.
    pub fn equals(&self, other: &AttributeValue) -> bool {
        match (self, other) {
            (AttributeValue::N(_), AttributeValue::N(_)) => {
                self.compare(other) == Some(Ordering::Equal)
            }
            _ => self == other,
        }
    }

    /// Convert JSON into attributes. Numbers keep their textual form.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => AttributeValue::Null,
            serde_json::Value::Bool(b) => AttributeValue::Bool(*b),
            serde_json::Value::Number(n) => AttributeValue::N(n.to_string()),
            serde_json::Value::String(s) => AttributeValue::S(s.clone()),
            serde_json::Value::Array(items) => {
                AttributeValue::L(items.iter().map(AttributeValue::from_json).collect())
            }
            serde_json::Value::Object(map) => AttributeValue::M(
                map.iter()
                    .map(|(k, v)| (k.clone(), AttributeValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert attributes back into JSON.
    ///
    /// Numbers become integers when they parse as one, floats otherwise. A
    /// number JSON cannot represent is kept as its decimal string.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            AttributeValue::S(s) => serde_json::Value::String(s.clone()),
            AttributeValue::N(n) => number_to_json(n),
            AttributeValue::Bool(b) => serde_json::Value::Bool(*b),
            AttributeValue::Null => serde_json::Value::Null,
            AttributeValue::L(items) => {
                serde_json::Value::Array(items.iter().map(AttributeValue::to_json).collect())
            }
            AttributeValue::M(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

fn compare_numbers(a: &str, b: &str) -> Option<Ordering> {
    if let (Ok(x), Ok(y)) = (a.parse::<i128>(), b.parse::<i128>()) {
        return Some(x.cmp(&y));
    }
    let x = a.parse::<f64>().ok()?;
    let y = b.parse::<f64>().ok()?;
    x.partial_cmp(&y)
}

fn number_to_json(n: &str) -> serde_json::Value {
    if let Ok(i) = n.parse::<i64>() {
        return serde_json::Value::from(i);
    }
    n.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(serde_json::Value::Number)
        .unwrap_or_else(|| serde_json::Value::String(n.to_string()))
}

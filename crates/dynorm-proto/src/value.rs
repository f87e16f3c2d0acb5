//! Runtime value types for query parameters and decoded rows.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A typed runtime value.
///
/// Values flow in two directions: callers use them as filter operands and
/// column assignments, and the engine produces them when decoding stored
/// items back into rows. Each variant corresponds to one column type of the
/// catalog; `Json` carries free-form nested data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Null or absent value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit floating point.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// UUID.
    Uuid(Uuid),
    /// Point in time, with or without a UTC offset.
    Timestamp(Timestamp),
    /// Calendar date.
    Date(NaiveDate),
    /// Nested list/map data.
    Json(serde_json::Value),
}

/// A timestamp that may or may not carry an offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timestamp {
    /// Offset-aware timestamp.
    Aware(DateTime<FixedOffset>),
    /// Naive wall-clock timestamp.
    Naive(NaiveDateTime),
}

impl Timestamp {
    /// The current instant in UTC.
    pub fn now() -> Self {
        Timestamp::Aware(Utc::now().into())
    }

    /// Whether an offset is attached.
    pub fn is_aware(&self) -> bool {
        matches!(self, Timestamp::Aware(_))
    }

    /// The instant as a naive UTC wall-clock time.
    ///
    /// Naive timestamps are taken to already be in UTC.
    pub fn naive_utc(&self) -> NaiveDateTime {
        match self {
            Timestamp::Aware(dt) => dt.naive_utc(),
            Timestamp::Naive(dt) => *dt,
        }
    }

    /// Attach UTC to a naive timestamp; aware timestamps are returned as-is.
    pub fn assume_utc(self) -> Self {
        match self {
            Timestamp::Naive(dt) => Timestamp::Aware(dt.and_utc().into()),
            aware => aware,
        }
    }

    /// Render as ISO-8601.
    ///
    /// Aware timestamps carry a `+HH:MM` offset. Fractional seconds are only
    /// written when non-zero.
    pub fn to_iso8601(&self) -> String {
        match self {
            Timestamp::Aware(dt) => dt.to_rfc3339_opts(SecondsFormat::AutoSi, false),
            Timestamp::Naive(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
        }
    }

    /// Parse an ISO-8601 timestamp.
    ///
    /// Accepts a `T` or space separator, optional fractional seconds, and an
    /// optional `Z` or `+HH:MM` offset. A missing offset yields a naive value.
    pub fn parse_iso8601(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(Timestamp::Aware(dt));
        }
        for fmt in ["%Y-%m-%dT%H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%:z"] {
            if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
                return Some(Timestamp::Aware(dt));
            }
        }
        for fmt in [
            "%Y-%m-%dT%H:%M:%S%.f",
            "%Y-%m-%d %H:%M:%S%.f",
            "%Y-%m-%dT%H:%M",
            "%Y-%m-%d %H:%M",
        ] {
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
                return Some(Timestamp::Naive(dt));
            }
        }
        None
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.naive_utc().cmp(&other.naive_utc()))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_iso8601())
    }
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Uuid(_) => "uuid",
            Value::Timestamp(_) => "timestamp",
            Value::Date(_) => "date",
            Value::Json(_) => "json",
        }
    }

    /// Try to get as bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get as i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get as f64. Integers are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get as string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as UUID.
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Value::Uuid(u) => Some(*u),
            _ => None,
        }
    }

    /// Try to get as timestamp.
    pub fn as_timestamp(&self) -> Option<Timestamp> {
        match self {
            Value::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    /// Try to get as date.
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// Total-ish ordering used for in-memory sorting.
    ///
    /// Nulls sort before everything. Integers and floats compare
    /// numerically. Values of unrelated types compare equal so that a
    /// stable sort leaves them in their original order.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Value::Int(a), Value::Float(b)) => {
                (*a as f64).partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (Value::Float(a), Value::Int(b)) => {
                a.partial_cmp(&(*b as f64)).unwrap_or(Ordering::Equal)
            }
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Uuid(a), Value::Uuid(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => {
                a.partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(s) => f.write_str(s),
            Value::Uuid(u) => write!(f, "{}", u.hyphenated()),
            Value::Timestamp(t) => write!(f, "{}", t),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Json(j) => write!(f, "{}", j),
        }
    }
}

// Conversion implementations
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<Timestamp> for Value {
    fn from(v: Timestamp) -> Self {
        Value::Timestamp(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(Timestamp::Aware(v.into()))
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(v: DateTime<FixedOffset>) -> Self {
        Value::Timestamp(Timestamp::Aware(v))
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(Timestamp::Naive(v))
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_value_accessors() {
        assert!(Value::Null.is_null());
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Int(42).as_i64(), Some(42));
        assert_eq!(Value::Int(2).as_f64(), Some(2.0));
        assert_eq!(Value::String("x".into()).as_str(), Some("x"));
        assert_eq!(Value::Int(1).as_str(), None);
    }

    #[test]
    fn test_option_conversion() {
        let none: Option<i64> = None;
        assert_eq!(Value::from(none), Value::Null);
        assert_eq!(Value::from(Some("a")), Value::String("a".into()));
    }

    #[test]
    fn test_sort_cmp_nulls_first() {
        assert_eq!(Value::Null.sort_cmp(&Value::Int(1)), Ordering::Less);
        assert_eq!(Value::Int(1).sort_cmp(&Value::Null), Ordering::Greater);
        assert_eq!(Value::Int(1).sort_cmp(&Value::Float(1.5)), Ordering::Less);
        assert_eq!(
            Value::String("a".into()).sort_cmp(&Value::Int(3)),
            Ordering::Equal
        );
    }

    #[test]
    fn test_timestamp_iso8601() {
        let aware = Timestamp::Aware(Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 0).unwrap().into());
        assert_eq!(aware.to_iso8601(), "2024-05-01T10:30:00+00:00");
        assert_eq!(Timestamp::parse_iso8601(&aware.to_iso8601()), Some(aware));

        let naive = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_micro_opt(10, 30, 0, 250)
            .unwrap();
        let ts = Timestamp::Naive(naive);
        assert_eq!(ts.to_iso8601(), "2024-05-01T10:30:00.000250");
        assert_eq!(Timestamp::parse_iso8601(&ts.to_iso8601()), Some(ts));
    }

    #[test]
    fn test_timestamp_parse_variants() {
        assert!(matches!(
            Timestamp::parse_iso8601("2024-05-01T10:30:00Z"),
            Some(Timestamp::Aware(_))
        ));
        assert!(matches!(
            Timestamp::parse_iso8601("2024-05-01 10:30:00+02:00"),
            Some(Timestamp::Aware(_))
        ));
        assert!(matches!(
            Timestamp::parse_iso8601("2024-05-01 10:30:00"),
            Some(Timestamp::Naive(_))
        ));
        assert_eq!(Timestamp::parse_iso8601("yesterday"), None);
    }

    #[test]
    fn test_assume_utc() {
        let naive = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let ts = Timestamp::Naive(naive).assume_utc();
        assert!(ts.is_aware());
        assert_eq!(ts.naive_utc(), naive);
    }
}

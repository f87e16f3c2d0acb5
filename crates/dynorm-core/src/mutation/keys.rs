//! Primary-key generation for inserted rows.

use dynorm_proto::Value;
use rand::Rng;
use uuid::Uuid;

use crate::catalog::{ColumnDef, ColumnType};
use crate::error::Error;

/// How many generated keys an insert tries before giving up.
pub const MAX_KEY_ATTEMPTS: u32 = 5;

/// Upper bound (exclusive) of generated integer keys: positive 31-bit.
pub const MAX_GENERATED_INT: i64 = 1 << 31;

/// Generate a fresh key for `column`.
///
/// UUID and string keys get a random UUID; auto-integer keys get a random
/// positive 31-bit integer. Plain integer keys must be supplied.
pub fn generate_key(column: &ColumnDef) -> Result<Value, Error> {
    match column.column_type {
        ColumnType::Uuid => Ok(Value::Uuid(Uuid::new_v4())),
        ColumnType::String => Ok(Value::String(Uuid::new_v4().hyphenated().to_string())),
        ColumnType::AutoInteger => Ok(Value::Int(
            rand::thread_rng().gen_range(1..MAX_GENERATED_INT),
        )),
        _ => Err(Error::Validation(format!(
            "{} has no generated default; a value is required",
            column.name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_keys() {
        let auto = ColumnDef::new("id", ColumnType::AutoInteger);
        for _ in 0..100 {
            match generate_key(&auto).unwrap() {
                Value::Int(i) => assert!((1..MAX_GENERATED_INT).contains(&i)),
                other => panic!("expected integer key, got {:?}", other),
            }
        }

        let uuid = ColumnDef::new("id", ColumnType::Uuid);
        assert!(matches!(generate_key(&uuid).unwrap(), Value::Uuid(_)));

        let text = ColumnDef::new("id", ColumnType::String);
        match generate_key(&text).unwrap() {
            Value::String(s) => assert!(Uuid::parse_str(&s).is_ok()),
            other => panic!("expected string key, got {:?}", other),
        }
    }

    #[test]
    fn test_plain_integer_key_is_required() {
        let plain = ColumnDef::new("id", ColumnType::Integer);
        assert!(matches!(generate_key(&plain), Err(Error::Validation(_))));
    }
}

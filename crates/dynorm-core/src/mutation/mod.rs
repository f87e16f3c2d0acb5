//! Write path: inserts, updates and deletes.
//!
//! Writes are validated up front, then applied one item at a time (inserts
//! and updates) or in batches (deletes that match more than one key).

mod executor;
mod keys;
mod validator;

pub use executor::MutationExecutor;
pub use keys::{generate_key, MAX_GENERATED_INT, MAX_KEY_ATTEMPTS};
pub use validator::{PreparedRow, RowValidator};

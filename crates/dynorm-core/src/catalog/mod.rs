//! Model catalog.
//!
//! The catalog describes the relational-style models the engine maps onto
//! store tables: their columns, which column is the primary key, which
//! columns carry a secondary index, and which columns reference other
//! models.

mod catalog;
mod column;
mod model;
mod types;

pub use catalog::Catalog;
pub use column::{ColumnDef, DefaultValue};
pub use model::{ModelDef, PK_ALIAS};
pub use types::ColumnType;

//! dynorm Core - Query planning, execution, and mutation over a document store.
//!
//! This crate maps relational-style models onto a schemaless key-value
//! document store. Reads are planned onto the cheapest available access path
//! (point get, batch get, secondary-index query, association join, or scan)
//! and finished in memory; writes are validated up front and applied with
//! single-item or batched store calls.

pub mod catalog;
pub mod config;
pub mod error;
pub mod migration;
pub mod mutation;
pub mod query;
pub mod retry;
pub mod session;
pub mod store;

pub use catalog::{Catalog, ColumnDef, ColumnType, DefaultValue, ModelDef, PK_ALIAS};
pub use config::{EngineConfig, StoreConfig};
pub use error::Error;
pub use migration::{Backfill, BackfillConfig, BackfillProgress};
pub use mutation::MutationExecutor;
pub use query::{PhysicalPlan, Planner, QueryExecutor, RequestCache, Row, ValueCodec};
pub use retry::RetryPolicy;
pub use session::Session;
pub use store::{
    AttributeValue, ConnectionRegistry, DocumentStore, FilterExpression, Item, MemoryStore,
    SledStore, StoreError, TableSpec,
};

/// Re-export protocol types.
pub use dynorm_proto as proto;

//! dynorm query types.
//!
//! This crate defines the caller-facing vocabulary of the dynorm adapter:
//! typed runtime values, predicate trees over model columns, and the read
//! and write requests an object mapper submits to the engine.
//!
//! # Modules
//!
//! - [`value`] - Runtime value types for query parameters and decoded rows
//! - [`query`] - Predicate trees, ordering, pagination and select requests
//! - [`mutation`] - Insert, update and delete requests
//!
//! Nothing in this crate performs I/O. Planning and execution live in
//! `dynorm-core`.

pub mod mutation;
pub mod query;
pub mod value;

pub use mutation::{FieldValue, Mutation, MutationResult};
pub use query::{
    Connector, JoinSpec, Lookup, Operand, Operator, OrderDirection, OrderSpec, Pagination,
    Predicate, SelectQuery, WhereNode,
};
pub use value::{Timestamp, Value};

//! Query translation and execution.
//!
//! A [`SelectQuery`](dynorm_proto::SelectQuery) is extracted into
//! conditions, planned onto one physical access path, executed against the
//! store, and finished in memory.

mod cache;
mod executor;
mod extract;
mod filter;
mod planner;
mod relation;
mod row;
mod value_codec;

pub use cache::{CacheKey, CacheStats, RequestCache};
pub use executor::QueryExecutor;
pub use extract::{extract, flatten, Condition, Extraction};
pub use filter::compile;
pub use planner::{PhysicalPlan, Planner};
pub use row::Row;
pub use value_codec::{raw_value, ValueCodec};

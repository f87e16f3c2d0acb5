//! Schema evolution for registered models.
//!
//! Tables carry no column schema, so the only data migration needed is
//! populating defaults for newly added columns.

mod backfill;

pub use backfill::{Backfill, BackfillConfig, BackfillProgress};

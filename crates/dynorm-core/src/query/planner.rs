//! Access-path planning.
//!
//! Picks exactly one physical plan per read, by fixed priority: point get,
//! batch get, relation join, secondary-index query, full scan. The first
//! applicable path wins; there is no cost model.

use std::fmt;

use dynorm_proto::{JoinSpec, Operand, Predicate};
use tracing::debug;

use crate::catalog::{Catalog, ModelDef};
use crate::config::EngineConfig;
use crate::error::Error;
use crate::store::{index_name, AttributeValue};

use super::extract::{extract, flatten, Condition};
use super::value_codec::ValueCodec;

/// The physical access path chosen for a read.
#[derive(Debug, Clone, PartialEq)]
pub enum PhysicalPlan {
    /// Nothing can match; no store call is made.
    Empty,
    /// Fetch one item by primary key.
    PointGet {
        /// Encoded primary key.
        key: String,
    },
    /// Fetch many items by primary key.
    BatchGet {
        /// Encoded primary keys.
        keys: Vec<String>,
    },
    /// Query a secondary index for a single value.
    IndexedQuery {
        /// Index name, `{column}-index`.
        index: String,
        /// Indexed column.
        key_column: String,
        /// Encoded value the column must equal.
        key_value: AttributeValue,
    },
    /// Resolve rows through an association model.
    RelationJoin {
        /// Association model name.
        through_model: String,
        /// Equality filter on the association model.
        filter: Condition,
        /// Association column that references the target model.
        target_fk: String,
        /// Conditions on the target model, checked after the fetch.
        residual: Vec<Condition>,
    },
    /// Full-table scan with the given conditions.
    Scan {
        /// Conditions compiled into the scan's server-side filter.
        conditions: Vec<Condition>,
    },
}

impl PhysicalPlan {
    /// Short plan name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PhysicalPlan::Empty => "empty",
            PhysicalPlan::PointGet { .. } => "point_get",
            PhysicalPlan::BatchGet { .. } => "batch_get",
            PhysicalPlan::IndexedQuery { .. } => "indexed_query",
            PhysicalPlan::RelationJoin { .. } => "relation_join",
            PhysicalPlan::Scan { .. } => "scan",
        }
    }
}

impl fmt::Display for PhysicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhysicalPlan::Empty => write!(f, "Empty"),
            PhysicalPlan::PointGet { key } => write!(f, "PointGet({})", key),
            PhysicalPlan::BatchGet { keys } => write!(f, "BatchGet({} keys)", keys.len()),
            PhysicalPlan::IndexedQuery { index, .. } => write!(f, "IndexedQuery({})", index),
            PhysicalPlan::RelationJoin {
                through_model,
                target_fk,
                ..
            } => write!(f, "RelationJoin({}.{})", through_model, target_fk),
            PhysicalPlan::Scan { conditions } => {
                write!(f, "Scan({} conditions)", conditions.len())
            }
        }
    }
}

/// Chooses physical plans for reads.
pub struct Planner<'a> {
    catalog: &'a Catalog,
    config: &'a EngineConfig,
    codec: ValueCodec<'a>,
}

impl<'a> Planner<'a> {
    /// Create a planner.
    pub fn new(catalog: &'a Catalog, config: &'a EngineConfig) -> Self {
        Self {
            catalog,
            config,
            codec: ValueCodec::new(catalog, config.use_tz),
        }
    }

    /// Plan a read of `model`.
    pub fn plan(
        &self,
        model: &ModelDef,
        filter: Option<&Predicate>,
        join: Option<&JoinSpec>,
    ) -> Result<PhysicalPlan, Error> {
        let extraction = extract(&self.codec, model, filter)?;

        let plan = if let Some(key) = extraction.point_key {
            PhysicalPlan::PointGet { key }
        } else if let Some(keys) = extraction.key_list {
            if keys.is_empty() {
                PhysicalPlan::Empty
            } else {
                PhysicalPlan::BatchGet { keys }
            }
        } else if extraction.conditions.iter().any(Condition::is_empty_membership) {
            PhysicalPlan::Empty
        } else if let Some(join) = join {
            self.plan_join(model, join, extraction.conditions)?
        } else if let Some(plan) = self.index_plan(model, &extraction.conditions)? {
            plan
        } else {
            self.scan_plan(model, extraction.conditions)?
        };

        debug!(model = %model.name, plan = %plan, "planned read");
        Ok(plan)
    }

    /// Index query for a lone equality on an indexed non-key column.
    fn index_plan(
        &self,
        model: &ModelDef,
        conditions: &[Condition],
    ) -> Result<Option<PhysicalPlan>, Error> {
        let condition = match conditions {
            [condition] if condition.is_plain_equality() => condition,
            _ => return Ok(None),
        };
        let column = model.require_column(&condition.column)?;
        if !column.indexed || column.primary_key {
            return Ok(None);
        }
        let value = match &condition.operand {
            Operand::Value(value) => value,
            _ => return Ok(None),
        };
        let key_value = match self.codec.encode(column, value)? {
            Some(attr) => attr,
            None => return Ok(None),
        };
        Ok(Some(PhysicalPlan::IndexedQuery {
            index: index_name(&column.name),
            key_column: column.name.clone(),
            key_value,
        }))
    }

    fn scan_plan(
        &self,
        model: &ModelDef,
        conditions: Vec<Condition>,
    ) -> Result<PhysicalPlan, Error> {
        if !conditions.is_empty() && !self.config.scan_on_filter {
            return Err(Error::Configuration(format!(
                "filtering {} on {} requires a scan, and scans on filters are disabled",
                model.name,
                describe(&conditions)
            )));
        }
        Ok(PhysicalPlan::Scan { conditions })
    }

    fn plan_join(
        &self,
        model: &ModelDef,
        join: &JoinSpec,
        residual: Vec<Condition>,
    ) -> Result<PhysicalPlan, Error> {
        let through = self.catalog.model(&join.through)?;
        let mut conditions = flatten(&through, &join.filter)?;

        let filter = match conditions.as_slice() {
            [only] if only.is_plain_equality() => conditions.remove(0),
            _ => {
                return Err(Error::Configuration(format!(
                    "join through {} needs exactly one equality filter",
                    through.name
                )))
            }
        };

        let target_fk = self
            .catalog
            .foreign_key_to(&through.name, &model.name, &[filter.column.as_str()])?
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "{} has no foreign key to {} besides {}",
                    through.name, model.name, filter.column
                ))
            })?;

        let filter_column = through.require_column(&filter.column)?;
        if !filter_column.indexed && !filter_column.primary_key && !self.config.scan_on_filter {
            return Err(Error::Configuration(format!(
                "joining through {} on {} requires a scan, and scans on filters are disabled",
                through.name, filter.column
            )));
        }

        Ok(PhysicalPlan::RelationJoin {
            through_model: through.name.clone(),
            filter,
            target_fk,
            residual,
        })
    }
}

fn describe(conditions: &[Condition]) -> String {
    conditions
        .iter()
        .map(|c| format!("{}__{}", c.column, c.operator.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

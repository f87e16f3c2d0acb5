//! Query IR: predicate trees and select requests.
//!
//! A predicate is a tree of [`WhereNode`]s whose leaves are column
//! [`Lookup`]s, mirroring the `filter()`/`exclude()` trees an object mapper
//! builds. The engine flattens the tree, picks an access path and evaluates
//! whatever the store cannot.

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Lookup operator applied to a single column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    /// Equality.
    Exact,
    /// Case-insensitive equality.
    IExact,
    /// Substring containment.
    Contains,
    /// Case-insensitive substring containment.
    IContains,
    /// Prefix match.
    StartsWith,
    /// Case-insensitive prefix match.
    IStartsWith,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
    /// Inclusive range between two bounds.
    Range,
    /// Membership in a set.
    In,
    /// Null check.
    IsNull,
}

impl Operator {
    /// Whether this is an equality operator (case-sensitive or not).
    pub fn is_equality(self) -> bool {
        matches!(self, Operator::Exact | Operator::IExact)
    }

    /// Lookup name as written in mapper keyword syntax.
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Exact => "exact",
            Operator::IExact => "iexact",
            Operator::Contains => "contains",
            Operator::IContains => "icontains",
            Operator::StartsWith => "startswith",
            Operator::IStartsWith => "istartswith",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::Range => "range",
            Operator::In => "in",
            Operator::IsNull => "isnull",
        }
    }
}

/// Right-hand side of a lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    /// A single value.
    Value(Value),
    /// Lower and upper bound, both inclusive.
    Range(Value, Value),
    /// A set of candidate values.
    Set(Vec<Value>),
    /// Boolean flag (null checks).
    Flag(bool),
}

/// A single column lookup, e.g. `author_id__exact = 7`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lookup {
    /// Column name. `pk` refers to the model's primary key.
    pub column: String,
    /// Operator.
    pub operator: Operator,
    /// Operand.
    pub operand: Operand,
}

impl Lookup {
    /// Create a lookup from its parts.
    pub fn new(column: impl Into<String>, operator: Operator, operand: Operand) -> Self {
        Self {
            column: column.into(),
            operator,
            operand,
        }
    }

    fn single(column: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self::new(column, operator, Operand::Value(value.into()))
    }

    /// `column = value`
    pub fn exact(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::single(column, Operator::Exact, value)
    }

    /// Case-insensitive `column = value`
    pub fn iexact(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::single(column, Operator::IExact, value)
    }

    /// `value` is a substring of `column`
    pub fn contains(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::single(column, Operator::Contains, value)
    }

    /// Case-insensitive substring match.
    pub fn icontains(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::single(column, Operator::IContains, value)
    }

    /// `column` starts with `value`
    pub fn starts_with(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::single(column, Operator::StartsWith, value)
    }

    /// Case-insensitive prefix match.
    pub fn istarts_with(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::single(column, Operator::IStartsWith, value)
    }

    /// `column > value`
    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::single(column, Operator::Gt, value)
    }

    /// `column >= value`
    pub fn gte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::single(column, Operator::Gte, value)
    }

    /// `column < value`
    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::single(column, Operator::Lt, value)
    }

    /// `column <= value`
    pub fn lte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::single(column, Operator::Lte, value)
    }

    /// `low <= column <= high`
    pub fn range(
        column: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        Self::new(column, Operator::Range, Operand::Range(low.into(), high.into()))
    }

    /// `column IN (values)`
    pub fn in_values(column: impl Into<String>, values: Vec<Value>) -> Self {
        Self::new(column, Operator::In, Operand::Set(values))
    }

    /// `column IS NULL` when `is_null`, otherwise `column IS NOT NULL`.
    pub fn is_null(column: impl Into<String>, is_null: bool) -> Self {
        Self::new(column, Operator::IsNull, Operand::Flag(is_null))
    }
}

/// How the children of a [`WhereNode`] are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connector {
    /// All children must match.
    And,
    /// Any child may match.
    Or,
}

/// An interior node of a predicate tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhereNode {
    /// Connector between children.
    pub connector: Connector,
    /// Whether the whole node is negated.
    pub negated: bool,
    /// Child predicates.
    pub children: Vec<Predicate>,
}

/// A predicate tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    /// Leaf lookup.
    Lookup(Lookup),
    /// Interior node.
    Node(WhereNode),
}

impl Predicate {
    /// Conjunction of `children`.
    pub fn and(children: Vec<Predicate>) -> Self {
        Predicate::Node(WhereNode {
            connector: Connector::And,
            negated: false,
            children,
        })
    }

    /// Disjunction of `children`.
    pub fn or(children: Vec<Predicate>) -> Self {
        Predicate::Node(WhereNode {
            connector: Connector::Or,
            negated: false,
            children,
        })
    }

    /// Negate this predicate, the way `exclude()` wraps its arguments.
    pub fn negate(self) -> Self {
        Predicate::Node(WhereNode {
            connector: Connector::And,
            negated: true,
            children: vec![self],
        })
    }

    /// Whether the tree contains no lookups at all.
    pub fn is_empty(&self) -> bool {
        match self {
            Predicate::Lookup(_) => false,
            Predicate::Node(node) => node.children.iter().all(Predicate::is_empty),
        }
    }
}

impl From<Lookup> for Predicate {
    fn from(lookup: Lookup) -> Self {
        Predicate::Lookup(lookup)
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderDirection {
    /// Ascending order.
    Asc,
    /// Descending order.
    Desc,
}

/// One sort key of a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSpec {
    /// Column to order by.
    pub field: String,
    /// Sort direction.
    pub direction: OrderDirection,
}

impl OrderSpec {
    /// Create an ascending order spec.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Asc,
        }
    }

    /// Create a descending order spec.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Desc,
        }
    }
}

/// Offset/limit slice applied after filtering and sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of rows to return.
    pub limit: Option<usize>,
    /// Number of rows to skip.
    pub offset: usize,
}

impl Pagination {
    /// Create pagination with limit and offset.
    pub fn new(limit: usize, offset: usize) -> Self {
        Self {
            limit: Some(limit),
            offset,
        }
    }

    /// Create pagination with just a limit.
    pub fn limit(limit: usize) -> Self {
        Self::new(limit, 0)
    }

    /// Create pagination that only skips rows.
    pub fn offset(offset: usize) -> Self {
        Self {
            limit: None,
            offset,
        }
    }

    /// Exclusive upper bound of the slice, if a limit is set.
    pub fn high_mark(&self) -> Option<usize> {
        self.limit.map(|limit| self.offset + limit)
    }
}

/// A join through an association model.
///
/// Selecting model `A` with `JoinSpec { through: "B", filter }` returns the
/// rows of `A` referenced by the rows of `B` that match `filter`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinSpec {
    /// Association model name.
    pub through: String,
    /// Predicate over the association model's columns.
    pub filter: Predicate,
}

impl JoinSpec {
    /// Create a join spec.
    pub fn new(through: impl Into<String>, filter: impl Into<Predicate>) -> Self {
        Self {
            through: through.into(),
            filter: filter.into(),
        }
    }
}

/// A read request against one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectQuery {
    /// Model to read.
    pub model: String,
    /// Projected columns. Empty means every declared column.
    pub fields: Vec<String>,
    /// Optional predicate.
    pub filter: Option<Predicate>,
    /// Ordering, applied in memory.
    pub order_by: Vec<OrderSpec>,
    /// Offset/limit slice.
    pub pagination: Option<Pagination>,
    /// Optional association-table join.
    pub join: Option<JoinSpec>,
}

impl SelectQuery {
    /// Create a query that selects every row of `model`.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            fields: Vec::new(),
            filter: None,
            order_by: Vec::new(),
            pagination: None,
            join: None,
        }
    }

    /// Restrict the projection.
    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = fields;
        self
    }

    /// Set the predicate.
    pub fn with_filter(mut self, filter: impl Into<Predicate>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Append an ordering.
    pub fn with_order(mut self, order: OrderSpec) -> Self {
        self.order_by.push(order);
        self
    }

    /// Set offset/limit.
    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }

    /// Join through an association model.
    pub fn with_join(mut self, join: JoinSpec) -> Self {
        self.join = Some(join);
        self
    }
}

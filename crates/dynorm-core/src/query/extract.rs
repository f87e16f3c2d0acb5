//! Predicate extraction.
//!
//! Normalizes a predicate tree into either a direct key access (a single
//! primary-key equality or membership) or a flat list of conditions.
//! Negation is carried down the tree as an XOR accumulator, so
//! `exclude(exclude(x))` is plain `x` again.

use dynorm_proto::{Connector, Lookup, Operand, Operator, Predicate, Value};

use crate::catalog::ModelDef;
use crate::error::Error;

use super::value_codec::ValueCodec;

/// A single normalized condition on a model column.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Physical column name (the `pk` alias is resolved).
    pub column: String,
    /// Operator.
    pub operator: Operator,
    /// Operand, checked against the operator's arity.
    pub operand: Operand,
    /// Whether the condition is negated.
    pub negated: bool,
}

impl Condition {
    /// Whether this is a non-negated membership test against no values.
    pub fn is_empty_membership(&self) -> bool {
        !self.negated
            && self.operator == Operator::In
            && matches!(&self.operand, Operand::Set(values) if values.is_empty())
    }

    /// Whether this is a non-negated equality against a single value.
    pub fn is_plain_equality(&self) -> bool {
        !self.negated
            && self.operator.is_equality()
            && matches!(&self.operand, Operand::Value(v) if !v.is_null())
    }
}

/// Result of extracting a predicate.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Extraction {
    /// Encoded primary key of a single-item lookup.
    pub point_key: Option<String>,
    /// Encoded primary keys of a membership lookup.
    pub key_list: Option<Vec<String>>,
    /// Flattened conditions, when neither key form applies.
    pub conditions: Vec<Condition>,
}

impl Extraction {
    /// Whether the predicate constrains nothing.
    pub fn is_unconditional(&self) -> bool {
        self.point_key.is_none() && self.key_list.is_none() && self.conditions.is_empty()
    }
}

/// Extract `predicate` against `model`.
pub fn extract(
    codec: &ValueCodec<'_>,
    model: &ModelDef,
    predicate: Option<&Predicate>,
) -> Result<Extraction, Error> {
    let predicate = match predicate {
        Some(p) if !p.is_empty() => p,
        _ => return Ok(Extraction::default()),
    };

    if let Some(lookup) = single_lookup(predicate) {
        if model.is_primary_key(&lookup.column) {
            let pk = model.primary_key_column()?;
            match (lookup.operator, &lookup.operand) {
                (Operator::Exact, Operand::Value(value)) if !value.is_null() => {
                    return Ok(Extraction {
                        point_key: Some(codec.encode_key(pk, value)?),
                        ..Extraction::default()
                    });
                }
                (Operator::In, Operand::Set(values)) => {
                    let keys = values
                        .iter()
                        .filter(|v| !v.is_null())
                        .map(|v| codec.encode_key(pk, v))
                        .collect::<Result<Vec<_>, _>>()?;
                    return Ok(Extraction {
                        key_list: Some(keys),
                        ..Extraction::default()
                    });
                }
                _ => {}
            }
        }
    }

    Ok(Extraction {
        conditions: flatten(model, predicate)?,
        ..Extraction::default()
    })
}

/// Flatten `predicate` into conditions without the primary-key shortcuts.
pub fn flatten(model: &ModelDef, predicate: &Predicate) -> Result<Vec<Condition>, Error> {
    let mut out = Vec::new();
    collect(model, predicate, false, &mut out)?;
    Ok(out)
}

/// The lone lookup of a tree that reduces to exactly one non-negated lookup.
fn single_lookup(predicate: &Predicate) -> Option<&Lookup> {
    match lone_lookup(predicate, false)? {
        (lookup, false) => Some(lookup),
        (_, true) => None,
    }
}

/// Descend through nodes with one non-empty child, folding negation.
fn lone_lookup(predicate: &Predicate, negated: bool) -> Option<(&Lookup, bool)> {
    match predicate {
        Predicate::Lookup(lookup) => Some((lookup, negated)),
        Predicate::Node(node) => {
            let mut live = node.children.iter().filter(|c| !c.is_empty());
            match (live.next(), live.next()) {
                (Some(only), None) => lone_lookup(only, negated ^ node.negated),
                _ => None,
            }
        }
    }
}

fn collect(
    model: &ModelDef,
    predicate: &Predicate,
    negated: bool,
    out: &mut Vec<Condition>,
) -> Result<(), Error> {
    match predicate {
        Predicate::Lookup(lookup) => out.push(condition(model, lookup, negated)?),
        Predicate::Node(node) => {
            let live = node.children.iter().filter(|c| !c.is_empty()).count();
            if node.connector == Connector::Or && live > 1 {
                return Err(Error::Configuration(format!(
                    "OR filters on {} cannot be translated to a store condition",
                    model.name
                )));
            }
            let effective = negated ^ node.negated;
            for child in &node.children {
                collect(model, child, effective, out)?;
            }
        }
    }
    Ok(())
}

fn condition(model: &ModelDef, lookup: &Lookup, negated: bool) -> Result<Condition, Error> {
    let column = model.require_column(&lookup.column)?.name.clone();
    let invalid = || {
        Error::Validation(format!(
            "lookup {}__{} has an operand of the wrong shape",
            lookup.column,
            lookup.operator.as_str()
        ))
    };

    let (operator, operand) = match (lookup.operator, &lookup.operand) {
        (Operator::Exact, Operand::Value(Value::Null)) => (Operator::IsNull, Operand::Flag(true)),
        (Operator::IsNull, Operand::Flag(flag)) => (Operator::IsNull, Operand::Flag(*flag)),
        (Operator::IsNull, Operand::Value(Value::Bool(flag))) => {
            (Operator::IsNull, Operand::Flag(*flag))
        }
        (Operator::IsNull, _) => return Err(invalid()),
        (Operator::Range, Operand::Range(..)) | (Operator::In, Operand::Set(_)) => {
            (lookup.operator, lookup.operand.clone())
        }
        (Operator::Range, _) | (Operator::In, _) => return Err(invalid()),
        (op, Operand::Value(_)) => (op, lookup.operand.clone()),
        _ => return Err(invalid()),
    };

    Ok(Condition {
        column,
        operator,
        operand,
        negated,
    })
}

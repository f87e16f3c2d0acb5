//! Compilation of residual conditions into store filter expressions.

use dynorm_proto::{Operand, Operator, Value};
use tracing::debug;

use crate::catalog::ModelDef;
use crate::error::Error;
use crate::store::{AttributeValue, Comparator, FilterExpression};

use super::extract::Condition;
use super::value_codec::ValueCodec;

/// Compile `conditions` into one conjunctive filter expression.
///
/// Returns `None` when nothing constrains the read. Case-insensitive
/// operators compile to their case-sensitive forms.
pub fn compile(
    codec: &ValueCodec<'_>,
    model: &ModelDef,
    conditions: &[Condition],
) -> Result<Option<FilterExpression>, Error> {
    let mut parts = Vec::with_capacity(conditions.len());
    for condition in conditions {
        if let Some(expr) = compile_condition(codec, model, condition)? {
            parts.push(expr);
        }
    }
    if parts.is_empty() {
        return Ok(None);
    }

    let expr = FilterExpression::all(parts);
    let rendered = expr.render();
    debug!(
        model = %model.name,
        expression = %rendered.expression,
        values = rendered.values.len(),
        "compiled filter expression"
    );
    Ok(Some(expr))
}

fn compile_condition(
    codec: &ValueCodec<'_>,
    model: &ModelDef,
    condition: &Condition,
) -> Result<Option<FilterExpression>, Error> {
    let column = model.require_column(&condition.column)?;
    let attribute = column.name.clone();
    let encode = |value: &Value| -> Result<AttributeValue, Error> {
        Ok(codec.encode(column, value)?.unwrap_or(AttributeValue::Null))
    };
    let compare = |op: Comparator, value: &Value| -> Result<FilterExpression, Error> {
        Ok(FilterExpression::Compare {
            attribute: attribute.clone(),
            op,
            value: encode(value)?,
        })
    };

    let expr = match (condition.operator, &condition.operand) {
        (Operator::Exact | Operator::IExact, Operand::Value(v)) => compare(Comparator::Eq, v)?,
        (Operator::Gt, Operand::Value(v)) => compare(Comparator::Gt, v)?,
        (Operator::Gte, Operand::Value(v)) => compare(Comparator::Ge, v)?,
        (Operator::Lt, Operand::Value(v)) => compare(Comparator::Lt, v)?,
        (Operator::Lte, Operand::Value(v)) => compare(Comparator::Le, v)?,
        (Operator::Contains | Operator::IContains, Operand::Value(v)) => {
            FilterExpression::Contains {
                attribute,
                value: substring(v, encode(v)?),
            }
        }
        (Operator::StartsWith | Operator::IStartsWith, Operand::Value(v)) => {
            FilterExpression::BeginsWith {
                attribute,
                value: substring(v, encode(v)?),
            }
        }
        (Operator::Range, Operand::Range(low, high)) => FilterExpression::Between {
            attribute,
            low: encode(low)?,
            high: encode(high)?,
        },
        (Operator::In, Operand::Set(values)) => {
            if values.is_empty() && condition.negated {
                return Ok(None);
            }
            let eqs = values
                .iter()
                .map(|v| Ok(FilterExpression::eq(attribute.clone(), encode(v)?)))
                .collect::<Result<Vec<_>, Error>>()?;
            FilterExpression::any(eqs)
        }
        (Operator::IsNull, Operand::Flag(true)) => FilterExpression::NotExists(attribute),
        (Operator::IsNull, Operand::Flag(false)) => FilterExpression::Exists(attribute),
        _ => {
            return Err(Error::Validation(format!(
                "cannot compile {}__{}",
                condition.column,
                condition.operator.as_str()
            )))
        }
    };

    Ok(Some(if condition.negated {
        FilterExpression::Not(Box::new(expr))
    } else {
        expr
    }))
}

/// Substring operands are matched as text even on non-string columns.
fn substring(value: &Value, encoded: AttributeValue) -> AttributeValue {
    match (value, encoded) {
        (Value::String(s), AttributeValue::N(_)) => AttributeValue::S(s.clone()),
        (_, encoded) => encoded,
    }
}

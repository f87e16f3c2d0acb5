//! Store-native filter expressions.
//!
//! A [`FilterExpression`] is what the store evaluates server-side during a
//! scan. It can be evaluated directly against an [`Item`] (used by the
//! in-process backends) or rendered into the placeholder syntax a remote
//! document store expects.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::Write;

use super::attribute::{AttributeValue, Item};

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    /// `=`
    Eq,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl Comparator {
    fn symbol(self) -> &'static str {
        match self {
            Comparator::Eq => "=",
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
        }
    }

    fn matches(self, ord: Ordering) -> bool {
        match self {
            Comparator::Eq => ord == Ordering::Equal,
            Comparator::Lt => ord == Ordering::Less,
            Comparator::Le => ord != Ordering::Greater,
            Comparator::Gt => ord == Ordering::Greater,
            Comparator::Ge => ord != Ordering::Less,
        }
    }
}

/// A filter the store evaluates against each item.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpression {
    /// `attribute <op> value`
    Compare {
        /// Attribute name.
        attribute: String,
        /// Comparator.
        op: Comparator,
        /// Right-hand side.
        value: AttributeValue,
    },
    /// `attribute BETWEEN low AND high`
    Between {
        /// Attribute name.
        attribute: String,
        /// Inclusive lower bound.
        low: AttributeValue,
        /// Inclusive upper bound.
        high: AttributeValue,
    },
    /// `contains(attribute, value)`
    Contains {
        /// Attribute name.
        attribute: String,
        /// Substring or list member.
        value: AttributeValue,
    },
    /// `begins_with(attribute, value)`
    BeginsWith {
        /// Attribute name.
        attribute: String,
        /// Prefix.
        value: AttributeValue,
    },
    /// `attribute_exists(attribute)`
    Exists(String),
    /// `attribute_not_exists(attribute)`
    NotExists(String),
    /// Conjunction.
    And(Vec<FilterExpression>),
    /// Disjunction.
    Or(Vec<FilterExpression>),
    /// Negation.
    Not(Box<FilterExpression>),
}

/// A filter rendered into expression syntax with substitution maps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderedExpression {
    /// Expression text, e.g. `#n0 = :v0`.
    pub expression: String,
    /// `#name` placeholders to attribute names.
    pub names: BTreeMap<String, String>,
    /// `:value` placeholders to attribute values.
    pub values: BTreeMap<String, AttributeValue>,
}

impl FilterExpression {
    /// Shorthand for an equality comparison.
    pub fn eq(attribute: impl Into<String>, value: AttributeValue) -> Self {
        FilterExpression::Compare {
            attribute: attribute.into(),
            op: Comparator::Eq,
            value,
        }
    }

    /// Conjunction that collapses single-element lists.
    pub fn all(mut parts: Vec<FilterExpression>) -> Self {
        if parts.len() == 1 {
            parts.remove(0)
        } else {
            FilterExpression::And(parts)
        }
    }

    /// Disjunction that collapses single-element lists.
    pub fn any(mut parts: Vec<FilterExpression>) -> Self {
        if parts.len() == 1 {
            parts.remove(0)
        } else {
            FilterExpression::Or(parts)
        }
    }

    /// Evaluate against an item.
    ///
    /// Comparisons against a missing attribute, or between values of
    /// different store types, are false.
    pub fn evaluate(&self, item: &Item) -> bool {
        match self {
            FilterExpression::Compare {
                attribute,
                op,
                value,
            } => match item.get(attribute) {
                Some(actual) if *op == Comparator::Eq => actual.equals(value),
                Some(actual) => actual.compare(value).is_some_and(|ord| op.matches(ord)),
                None => false,
            },
            FilterExpression::Between {
                attribute,
                low,
                high,
            } => item.get(attribute).is_some_and(|actual| {
                actual.compare(low).is_some_and(|o| o != Ordering::Less)
                    && actual.compare(high).is_some_and(|o| o != Ordering::Greater)
            }),
            FilterExpression::Contains { attribute, value } => {
                match (item.get(attribute), value) {
                    (Some(AttributeValue::S(s)), AttributeValue::S(needle)) => {
                        s.contains(needle.as_str())
                    }
                    (Some(AttributeValue::L(items)), needle) => {
                        items.iter().any(|v| v.equals(needle))
                    }
                    _ => false,
                }
            }
            FilterExpression::BeginsWith { attribute, value } => {
                match (item.get(attribute), value) {
                    (Some(AttributeValue::S(s)), AttributeValue::S(prefix)) => {
                        s.starts_with(prefix.as_str())
                    }
                    _ => false,
                }
            }
            FilterExpression::Exists(attribute) => item.contains_key(attribute),
            FilterExpression::NotExists(attribute) => !item.contains_key(attribute),
            FilterExpression::And(parts) => parts.iter().all(|p| p.evaluate(item)),
            FilterExpression::Or(parts) => parts.iter().any(|p| p.evaluate(item)),
            FilterExpression::Not(inner) => !inner.evaluate(item),
        }
    }

    /// Render into placeholder syntax.
    pub fn render(&self) -> RenderedExpression {
        let mut out = RenderedExpression::default();
        let mut expression = String::new();
        self.render_into(&mut expression, &mut out);
        out.expression = expression;
        out
    }

    fn render_into(&self, buf: &mut String, out: &mut RenderedExpression) {
        match self {
            FilterExpression::Compare {
                attribute,
                op,
                value,
            } => {
                let name = out.name(attribute);
                let value = out.value(value);
                let _ = write!(buf, "{} {} {}", name, op.symbol(), value);
            }
            FilterExpression::Between {
                attribute,
                low,
                high,
            } => {
                let name = out.name(attribute);
                let low = out.value(low);
                let high = out.value(high);
                let _ = write!(buf, "{} BETWEEN {} AND {}", name, low, high);
            }
            FilterExpression::Contains { attribute, value } => {
                let name = out.name(attribute);
                let value = out.value(value);
                let _ = write!(buf, "contains({}, {})", name, value);
            }
            FilterExpression::BeginsWith { attribute, value } => {
                let name = out.name(attribute);
                let value = out.value(value);
                let _ = write!(buf, "begins_with({}, {})", name, value);
            }
            FilterExpression::Exists(attribute) => {
                let name = out.name(attribute);
                let _ = write!(buf, "attribute_exists({})", name);
            }
            FilterExpression::NotExists(attribute) => {
                let name = out.name(attribute);
                let _ = write!(buf, "attribute_not_exists({})", name);
            }
            FilterExpression::And(parts) => render_joined(parts, " AND ", buf, out),
            FilterExpression::Or(parts) => render_joined(parts, " OR ", buf, out),
            FilterExpression::Not(inner) => {
                buf.push_str("NOT (");
                inner.render_into(buf, out);
                buf.push(')');
            }
        }
    }
}

fn render_joined(
    parts: &[FilterExpression],
    separator: &str,
    buf: &mut String,
    out: &mut RenderedExpression,
) {
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            buf.push_str(separator);
        }
        let nested = matches!(part, FilterExpression::And(_) | FilterExpression::Or(_));
        if nested {
            buf.push('(');
        }
        part.render_into(buf, out);
        if nested {
            buf.push(')');
        }
    }
}

impl RenderedExpression {
    fn name(&mut self, attribute: &str) -> String {
        if let Some((placeholder, _)) = self.names.iter().find(|(_, v)| v.as_str() == attribute) {
            return placeholder.clone();
        }
        let placeholder = format!("#n{}", self.names.len());
        self.names.insert(placeholder.clone(), attribute.to_string());
        placeholder
    }

    fn value(&mut self, value: &AttributeValue) -> String {
        let placeholder = format!(":v{}", self.values.len());
        self.values.insert(placeholder.clone(), value.clone());
        placeholder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(pairs: &[(&str, AttributeValue)]) -> Item {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_evaluate_comparisons() {
        let row = item(&[("age", AttributeValue::n(30)), ("name", AttributeValue::s("alice"))]);

        let gt = FilterExpression::Compare {
            attribute: "age".into(),
            op: Comparator::Gt,
            value: AttributeValue::n(25),
        };
        assert!(gt.evaluate(&row));

        let between = FilterExpression::Between {
            attribute: "age".into(),
            low: AttributeValue::n(30),
            high: AttributeValue::n(40),
        };
        assert!(between.evaluate(&row));

        let prefix = FilterExpression::BeginsWith {
            attribute: "name".into(),
            value: AttributeValue::s("al"),
        };
        assert!(prefix.evaluate(&row));

        let missing = FilterExpression::eq("email", AttributeValue::s("x"));
        assert!(!missing.evaluate(&row));
        assert!(FilterExpression::Not(Box::new(missing)).evaluate(&row));
    }

    #[test]
    fn test_evaluate_existence_and_contains() {
        let row = item(&[(
            "tags",
            AttributeValue::L(vec![AttributeValue::s("rust"), AttributeValue::s("db")]),
        )]);
        assert!(FilterExpression::Exists("tags".into()).evaluate(&row));
        assert!(FilterExpression::NotExists("title".into()).evaluate(&row));
        assert!(FilterExpression::Contains {
            attribute: "tags".into(),
            value: AttributeValue::s("db"),
        }
        .evaluate(&row));
    }

    #[test]
    fn test_render_reuses_name_placeholders() {
        let expr = FilterExpression::And(vec![
            FilterExpression::Compare {
                attribute: "age".into(),
                op: Comparator::Ge,
                value: AttributeValue::n(18),
            },
            FilterExpression::Not(Box::new(FilterExpression::Or(vec![
                FilterExpression::eq("age", AttributeValue::n(21)),
                FilterExpression::NotExists("email".into()),
            ]))),
        ]);

        let rendered = expr.render();
        assert_eq!(
            rendered.expression,
            "#n0 >= :v0 AND NOT (#n0 = :v1 OR attribute_not_exists(#n1))"
        );
        assert_eq!(rendered.names.len(), 2);
        assert_eq!(rendered.values.len(), 2);
    }
}

//! Predicates
//!
//! Boolean expressions over entity attributes, written in a small
//! NSPredicate-like language:
//!
//! ```text
//! name BEGINSWITH 'A' AND (age >= 18 OR guardian != nil)
//! status IN {'open', 'blocked'} && NOT archived == true
//! ```
//!
//! A [`Predicate`] is parsed without a schema. [`Predicate::bind`] checks it
//! against one entity and coerces literals to the attribute types, yielding a
//! [`BoundPredicate`] whose evaluation cannot fail.

pub mod lexer;
pub mod parser;

use crate::date_format::DateFormat;
use crate::error::QueryError;
use crate::schema::{setters, AttributeType, EntityDescription};
use crate::value::{Attributes, Value};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
    BeginsWith,
    EndsWith,
}

impl Comparison {
    fn is_ordering(self) -> bool {
        matches!(self, Comparison::Lt | Comparison::Le | Comparison::Gt | Comparison::Ge)
    }

    fn is_textual(self) -> bool {
        matches!(
            self,
            Comparison::Contains | Comparison::BeginsWith | Comparison::EndsWith
        )
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Comparison::Eq => "==",
            Comparison::Ne => "!=",
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Contains => "CONTAINS",
            Comparison::BeginsWith => "BEGINSWITH",
            Comparison::EndsWith => "ENDSWITH",
        };
        f.write_str(symbol)
    }
}

/// Unbound predicate expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    True,
    False,
    Compare {
        key: String,
        op: Comparison,
        value: Value,
    },
    In {
        key: String,
        values: Vec<Value>,
        negated: bool,
    },
    Not(Box<Predicate>),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
}

impl Predicate {
    /// Parse predicate text.
    pub fn parse(source: &str) -> Result<Self, QueryError> {
        parser::Parser::new(source)?.parse()
    }

    pub fn compare(key: impl Into<String>, op: Comparison, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            key: key.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(key, Comparison::Eq, value)
    }

    /// `key IN values`, or `key NOT IN values` when `include` is false.
    pub fn one_of(key: impl Into<String>, values: Vec<Value>, include: bool) -> Self {
        Predicate::In {
            key: key.into(),
            values,
            negated: !include,
        }
    }

    pub fn and(self, other: Predicate) -> Self {
        Predicate::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Predicate) -> Self {
        Predicate::Or(Box::new(self), Box::new(other))
    }

    pub fn negate(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Resolve attribute names against `entity` and coerce literals to the
    /// declared attribute types.
    pub fn bind(
        &self,
        entity: &EntityDescription,
        date_format: &DateFormat,
    ) -> Result<BoundPredicate, QueryError> {
        Ok(BoundPredicate {
            root: bind_node(self, entity, date_format)?,
        })
    }
}

impl FromStr for Predicate {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Predicate::parse(s)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::True => f.write_str("TRUEPREDICATE"),
            Predicate::False => f.write_str("FALSEPREDICATE"),
            Predicate::Compare { key, op, value } => write!(f, "{} {} {}", key, op, value),
            Predicate::In {
                key,
                values,
                negated,
            } => {
                let list: Vec<String> = values.iter().map(Value::to_string).collect();
                let op = if *negated { "NOT IN" } else { "IN" };
                write!(f, "{} {} {{{}}}", key, op, list.join(", "))
            }
            Predicate::Not(inner) => write!(f, "NOT ({})", inner),
            Predicate::And(lhs, rhs) => write!(f, "({}) AND ({})", lhs, rhs),
            Predicate::Or(lhs, rhs) => write!(f, "({}) OR ({})", lhs, rhs),
        }
    }
}

/// Predicate checked against one entity. Evaluation is infallible.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundPredicate {
    root: Node,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Const(bool),
    Compare {
        key: String,
        op: Comparison,
        value: Value,
    },
    In {
        key: String,
        values: Vec<Value>,
        negated: bool,
    },
    Not(Box<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
}

impl BoundPredicate {
    /// Predicate that matches everything.
    pub fn always() -> Self {
        Self {
            root: Node::Const(true),
        }
    }

    pub fn matches(&self, attributes: &Attributes) -> bool {
        evaluate(&self.root, attributes)
    }
}

fn bind_node(
    predicate: &Predicate,
    entity: &EntityDescription,
    date_format: &DateFormat,
) -> Result<Node, QueryError> {
    Ok(match predicate {
        Predicate::True => Node::Const(true),
        Predicate::False => Node::Const(false),
        Predicate::Not(inner) => Node::Not(Box::new(bind_node(inner, entity, date_format)?)),
        Predicate::And(lhs, rhs) => Node::And(
            Box::new(bind_node(lhs, entity, date_format)?),
            Box::new(bind_node(rhs, entity, date_format)?),
        ),
        Predicate::Or(lhs, rhs) => Node::Or(
            Box::new(bind_node(lhs, entity, date_format)?),
            Box::new(bind_node(rhs, entity, date_format)?),
        ),
        Predicate::Compare { key, op, value } => {
            let kind = attribute_kind(entity, key)?;
            if op.is_textual() && kind != AttributeType::String {
                return Err(QueryError::UnsupportedOperator {
                    attribute: key.clone(),
                    operator: op.to_string(),
                    kind,
                });
            }
            if op.is_ordering() && kind == AttributeType::Boolean {
                return Err(QueryError::UnsupportedOperator {
                    attribute: key.clone(),
                    operator: op.to_string(),
                    kind,
                });
            }
            let value = coerce_literal(key, kind, value, date_format)?;
            if (op.is_ordering() || op.is_textual()) && value.is_null() {
                return Err(QueryError::IncompatibleLiteral {
                    attribute: key.clone(),
                    literal: value.to_string(),
                    message: format!("nil cannot be used with {}", op),
                });
            }
            Node::Compare {
                key: key.clone(),
                op: *op,
                value,
            }
        }
        Predicate::In {
            key,
            values,
            negated,
        } => {
            let kind = attribute_kind(entity, key)?;
            let values = values
                .iter()
                .map(|v| coerce_literal(key, kind, v, date_format))
                .collect::<Result<Vec<_>, _>>()?;
            Node::In {
                key: key.clone(),
                values,
                negated: *negated,
            }
        }
    })
}

fn attribute_kind(entity: &EntityDescription, key: &str) -> Result<AttributeType, QueryError> {
    entity
        .attribute(key)
        .map(|a| a.kind)
        .ok_or_else(|| QueryError::UnknownAttribute {
            entity: entity.name().to_string(),
            attribute: key.to_string(),
        })
}

/// Literals already of a compatible kind pass through (integers and doubles
/// are interchangeable); anything else goes through attribute coercion, so
/// `createdAt > '2020-01-01'` compares dates.
fn coerce_literal(
    key: &str,
    kind: AttributeType,
    literal: &Value,
    date_format: &DateFormat,
) -> Result<Value, QueryError> {
    let compatible = matches!(
        (kind, literal),
        (_, Value::Null)
            | (AttributeType::Boolean, Value::Bool(_))
            | (AttributeType::Integer | AttributeType::Double, Value::Integer(_) | Value::Double(_))
            | (AttributeType::String, Value::Text(_))
            | (AttributeType::Date, Value::Date(_))
    );
    if compatible {
        return Ok(literal.clone());
    }
    setters::coerce(kind, key, &literal.to_json(date_format), date_format).map_err(|e| {
        QueryError::IncompatibleLiteral {
            attribute: key.to_string(),
            literal: literal.to_string(),
            message: e.to_string(),
        }
    })
}

fn evaluate(node: &Node, attributes: &Attributes) -> bool {
    match node {
        Node::Const(b) => *b,
        Node::Not(inner) => !evaluate(inner, attributes),
        Node::And(lhs, rhs) => evaluate(lhs, attributes) && evaluate(rhs, attributes),
        Node::Or(lhs, rhs) => evaluate(lhs, attributes) || evaluate(rhs, attributes),
        Node::Compare { key, op, value } => {
            let actual = attributes.get(key).unwrap_or(&Value::Null);
            compare(actual, *op, value)
        }
        Node::In {
            key,
            values,
            negated,
        } => {
            let actual = attributes.get(key).unwrap_or(&Value::Null);
            values.iter().any(|v| actual.loosely_equals(v)) != *negated
        }
    }
}

fn compare(actual: &Value, op: Comparison, expected: &Value) -> bool {
    match op {
        Comparison::Eq => actual.loosely_equals(expected),
        Comparison::Ne => !actual.loosely_equals(expected),
        Comparison::Lt | Comparison::Le | Comparison::Gt | Comparison::Ge => {
            if actual.is_null() {
                return false;
            }
            let ordering = actual.compare(expected);
            match op {
                Comparison::Lt => ordering.is_lt(),
                Comparison::Le => ordering.is_le(),
                Comparison::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }
        }
        Comparison::Contains | Comparison::BeginsWith | Comparison::EndsWith => {
            let (Some(actual), Some(expected)) = (actual.as_str(), expected.as_str()) else {
                return false;
            };
            match op {
                Comparison::Contains => actual.contains(expected),
                Comparison::BeginsWith => actual.starts_with(expected),
                _ => actual.ends_with(expected),
            }
        }
    }
}

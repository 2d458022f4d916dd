//! Typed field-setter table.
//!
//! Each entity resolves, at schema-load time, a map from record key (attribute
//! name or alias) to a setter carrying a coercion function chosen by the
//! attribute's declared type. Applying an untyped record walks its keys,
//! ignores the unknown ones and coerces the rest.

use super::{AttributeDefinition, AttributeType};
use crate::date_format::DateFormat;
use crate::error::{CoercionError, SchemaError};
use crate::value::{Attributes, Value};
use serde_json::Value as Json;
use std::collections::HashMap;

/// Coercion from an untyped record value into a typed attribute value.
pub type CoerceFn = fn(&str, &Json, &DateFormat) -> Result<Value, CoercionError>;

#[derive(Debug, Clone)]
pub struct AttributeSetter {
    attribute: String,
    kind: AttributeType,
    coerce: CoerceFn,
}

impl AttributeSetter {
    fn new(attribute: &AttributeDefinition) -> Self {
        Self {
            attribute: attribute.name.clone(),
            kind: attribute.kind,
            coerce: coerce_fn(attribute.kind),
        }
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    pub fn kind(&self) -> AttributeType {
        self.kind
    }

    pub fn coerce(&self, raw: &Json, date_format: &DateFormat) -> Result<Value, CoercionError> {
        (self.coerce)(&self.attribute, raw, date_format)
    }

    /// Coerce `raw` and store it; returns true when the stored value changed.
    pub fn apply(
        &self,
        target: &mut Attributes,
        raw: &Json,
        date_format: &DateFormat,
    ) -> Result<bool, CoercionError> {
        let value = self.coerce(raw, date_format)?;
        let changed = target.get(&self.attribute) != Some(&value);
        if changed {
            target.insert(self.attribute.clone(), value);
        }
        Ok(changed)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SetterTable {
    by_key: HashMap<String, AttributeSetter>,
}

impl SetterTable {
    pub fn build(entity: &str, attributes: &[AttributeDefinition]) -> Result<Self, SchemaError> {
        let mut by_key = HashMap::new();
        for attribute in attributes {
            let setter = AttributeSetter::new(attribute);
            let keys = std::iter::once(&attribute.name).chain(attribute.aliases.iter());
            for key in keys {
                if by_key.insert(key.clone(), setter.clone()).is_some() {
                    return Err(SchemaError::DuplicateAttribute {
                        entity: entity.to_string(),
                        key: key.clone(),
                    });
                }
            }
        }
        Ok(Self { by_key })
    }

    pub fn get(&self, key: &str) -> Option<&AttributeSetter> {
        self.by_key.get(key)
    }

    /// Apply every known key of `record` to `target`. Unknown keys are
    /// ignored. Returns the names of attributes whose value changed.
    ///
    /// All values are coerced before any is stored, so a failing record
    /// leaves `target` untouched.
    pub fn apply_record(
        &self,
        target: &mut Attributes,
        record: &serde_json::Map<String, Json>,
        date_format: &DateFormat,
    ) -> Result<Vec<String>, CoercionError> {
        let mut coerced = Vec::with_capacity(record.len());
        for (key, raw) in record {
            if let Some(setter) = self.by_key.get(key) {
                coerced.push((setter.attribute.clone(), setter.coerce(raw, date_format)?));
            }
        }

        let mut changed = Vec::new();
        for (attribute, value) in coerced {
            if target.get(&attribute) != Some(&value) {
                target.insert(attribute.clone(), value);
                changed.push(attribute);
            }
        }
        Ok(changed)
    }
}

pub fn coerce_fn(kind: AttributeType) -> CoerceFn {
    match kind {
        AttributeType::Boolean => coerce_boolean,
        AttributeType::Integer => coerce_integer,
        AttributeType::Double => coerce_double,
        AttributeType::String => coerce_string,
        AttributeType::Date => coerce_date,
    }
}

/// Coerce a single raw value into `kind`.
pub fn coerce(
    kind: AttributeType,
    attribute: &str,
    raw: &Json,
    date_format: &DateFormat,
) -> Result<Value, CoercionError> {
    coerce_fn(kind)(attribute, raw, date_format)
}

fn invalid(attribute: &str, expected: AttributeType, raw: &Json) -> CoercionError {
    CoercionError::Invalid {
        attribute: attribute.to_string(),
        expected,
        value: raw.to_string(),
    }
}

fn coerce_boolean(attribute: &str, raw: &Json, _: &DateFormat) -> Result<Value, CoercionError> {
    match raw {
        Json::Null => Ok(Value::Null),
        Json::Bool(b) => Ok(Value::Bool(*b)),
        Json::Number(n) => Ok(Value::Bool(n.as_f64().map_or(false, |f| f != 0.0))),
        Json::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(Value::Bool(true)),
            "false" | "no" | "0" => Ok(Value::Bool(false)),
            "" => Ok(Value::Null),
            _ => Err(invalid(attribute, AttributeType::Boolean, raw)),
        },
        _ => Err(invalid(attribute, AttributeType::Boolean, raw)),
    }
}

fn coerce_integer(attribute: &str, raw: &Json, _: &DateFormat) -> Result<Value, CoercionError> {
    match raw {
        Json::Null => Ok(Value::Null),
        Json::Bool(b) => Ok(Value::Integer(i64::from(*b))),
        Json::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().and_then(truncate_to_i64))
            .map(Value::Integer)
            .ok_or_else(|| invalid(attribute, AttributeType::Integer, raw)),
        Json::String(s) if s.trim().is_empty() => Ok(Value::Null),
        Json::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| invalid(attribute, AttributeType::Integer, raw)),
        _ => Err(invalid(attribute, AttributeType::Integer, raw)),
    }
}

// `i64::MAX as f64` rounds up to 2^63, hence the exclusive upper bound.
fn truncate_to_i64(f: f64) -> Option<i64> {
    let f = f.trunc();
    (f >= i64::MIN as f64 && f < i64::MAX as f64).then_some(f as i64)
}

fn coerce_double(attribute: &str, raw: &Json, _: &DateFormat) -> Result<Value, CoercionError> {
    match raw {
        Json::Null => Ok(Value::Null),
        Json::Number(n) => n
            .as_f64()
            .map(Value::Double)
            .ok_or_else(|| invalid(attribute, AttributeType::Double, raw)),
        Json::String(s) if s.trim().is_empty() => Ok(Value::Null),
        Json::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Double)
            .map_err(|_| invalid(attribute, AttributeType::Double, raw)),
        _ => Err(invalid(attribute, AttributeType::Double, raw)),
    }
}

fn coerce_string(attribute: &str, raw: &Json, _: &DateFormat) -> Result<Value, CoercionError> {
    match raw {
        Json::Null => Ok(Value::Null),
        Json::String(s) => Ok(Value::Text(s.clone())),
        Json::Number(n) => Ok(Value::Text(n.to_string())),
        Json::Bool(b) => Ok(Value::Text(b.to_string())),
        _ => Err(invalid(attribute, AttributeType::String, raw)),
    }
}

fn coerce_date(attribute: &str, raw: &Json, date_format: &DateFormat) -> Result<Value, CoercionError> {
    match raw {
        Json::Null => Ok(Value::Null),
        Json::String(s) if s.trim().is_empty() => Ok(Value::Null),
        Json::String(s) => date_format
            .parse(s)
            .map(Value::Date)
            .ok_or_else(|| invalid(attribute, AttributeType::Date, raw)),
        // Numbers are seconds since the Unix epoch.
        Json::Number(n) => n
            .as_i64()
            .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
            .map(Value::Date)
            .ok_or_else(|| invalid(attribute, AttributeType::Date, raw)),
        _ => Err(invalid(attribute, AttributeType::Date, raw)),
    }
}

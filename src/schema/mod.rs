//! Schema
//!
//! Immutable description of entity types and their attributes. Loaded once
//! (usually from a TOML file) and shared read-only between every context and
//! the store coordinator.
//!
//! ```toml
//! [[entities]]
//! name = "Person"
//!
//! [[entities.attributes]]
//! name = "name"
//! type = "string"
//! required = true
//!
//! [[entities.attributes]]
//! name = "createdAt"
//! type = "date"
//! aliases = ["created_at"]
//! ```

pub mod setters;

pub use setters::{AttributeSetter, SetterTable};

use crate::date_format::DateFormat;
use crate::error::SchemaError;
use crate::value::{Attributes, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Declared type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    Boolean,
    Integer,
    Double,
    String,
    Date,
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttributeType::Boolean => "boolean",
            AttributeType::Integer => "integer",
            AttributeType::Double => "double",
            AttributeType::String => "string",
            AttributeType::Date => "date",
        };
        f.write_str(name)
    }
}

/// Attribute as declared in a schema file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: AttributeType,
    #[serde(default)]
    pub required: bool,
    /// Default applied on create, coerced like any record value.
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    /// Additional record keys that map onto this attribute.
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Entity as declared in a schema file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<AttributeDefinition>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SchemaFile {
    #[serde(default)]
    entities: Vec<EntityDefinition>,
}

/// Resolved entity: declared attributes plus the setter table built for them.
#[derive(Debug)]
pub struct EntityDescription {
    name: String,
    attributes: Vec<AttributeDefinition>,
    defaults: Attributes,
    setters: SetterTable,
}

impl EntityDescription {
    fn resolve(definition: EntityDefinition, date_format: &DateFormat) -> Result<Self, SchemaError> {
        let valid_name = !definition.name.is_empty()
            && definition
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_name {
            return Err(SchemaError::InvalidEntityName(definition.name));
        }

        let setters = SetterTable::build(&definition.name, &definition.attributes)?;

        let mut defaults = Attributes::new();
        for attribute in &definition.attributes {
            let Some(raw) = &attribute.default else {
                continue;
            };
            let value = setters::coerce(attribute.kind, &attribute.name, raw, date_format)
                .map_err(|e| SchemaError::InvalidDefault {
                    entity: definition.name.clone(),
                    attribute: attribute.name.clone(),
                    message: e.to_string(),
                })?;
            defaults.insert(attribute.name.clone(), value);
        }

        Ok(Self {
            name: definition.name,
            attributes: definition.attributes,
            defaults,
            setters,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &[AttributeDefinition] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDefinition> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn setters(&self) -> &SetterTable {
        &self.setters
    }

    /// Initial values for a newly created object: every attribute present,
    /// declared defaults applied, everything else null.
    pub fn initial_values(&self) -> Attributes {
        self.attributes
            .iter()
            .map(|a| {
                let value = self.defaults.get(&a.name).cloned().unwrap_or(Value::Null);
                (a.name.clone(), value)
            })
            .collect()
    }
}

/// The full, immutable schema.
#[derive(Debug, Default)]
pub struct Schema {
    entities: BTreeMap<String, Arc<EntityDescription>>,
}

impl Schema {
    /// Build a schema from definitions. Defaults are coerced with `date_format`.
    pub fn new(
        definitions: Vec<EntityDefinition>,
        date_format: &DateFormat,
    ) -> Result<Self, SchemaError> {
        let mut entities = BTreeMap::new();
        for definition in definitions {
            let name = definition.name.clone();
            let description = EntityDescription::resolve(definition, date_format)?;
            if entities.insert(name.clone(), Arc::new(description)).is_some() {
                return Err(SchemaError::DuplicateEntity(name));
            }
        }
        Ok(Self { entities })
    }

    pub fn from_toml_str(source: &str, date_format: &DateFormat) -> Result<Self, SchemaError> {
        let file: SchemaFile =
            toml::from_str(source).map_err(|e| SchemaError::Parse(e.to_string()))?;
        Self::new(file.entities, date_format)
    }

    pub fn load(path: &Path, date_format: &DateFormat) -> Result<Self, SchemaError> {
        let source = std::fs::read_to_string(path).map_err(|e| SchemaError::Unreadable {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&source, date_format)
    }

    pub fn entity(&self, name: &str) -> Result<&Arc<EntityDescription>, SchemaError> {
        self.entities
            .get(name)
            .ok_or_else(|| SchemaError::UnknownEntity(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"
[[entities]]
name = "Person"

[[entities.attributes]]
name = "name"
type = "string"
required = true

[[entities.attributes]]
name = "age"
type = "integer"
default = 18

[[entities.attributes]]
name = "createdAt"
type = "date"
aliases = ["created_at"]
"#;

    #[test]
    fn test_load_from_toml() {
        let schema = Schema::from_toml_str(SCHEMA, &DateFormat::default()).unwrap();
        let person = schema.entity("Person").unwrap();
        assert_eq!(person.attributes().len(), 3);
        assert!(person.attribute("name").unwrap().required);
        assert_eq!(person.attribute("createdAt").unwrap().kind, AttributeType::Date);
        assert!(schema.contains("Person"));
        assert!(!schema.contains("Pet"));
    }

    #[test]
    fn test_initial_values_apply_defaults() {
        let schema = Schema::from_toml_str(SCHEMA, &DateFormat::default()).unwrap();
        let values = schema.entity("Person").unwrap().initial_values();
        assert_eq!(values.get("age"), Some(&Value::Integer(18)));
        assert_eq!(values.get("name"), Some(&Value::Null));
    }

    #[test]
    fn test_unknown_entity() {
        let schema = Schema::from_toml_str(SCHEMA, &DateFormat::default()).unwrap();
        assert!(matches!(
            schema.entity("Pet"),
            Err(SchemaError::UnknownEntity(name)) if name == "Pet"
        ));
    }

    #[test]
    fn test_duplicate_entity_rejected() {
        let source = format!("{}\n{}", SCHEMA, "[[entities]]\nname = \"Person\"\n");
        let err = Schema::from_toml_str(&source, &DateFormat::default()).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateEntity(_)));
    }

    #[test]
    fn test_invalid_entity_name_rejected() {
        let source = "[[entities]]\nname = \"bad name\"\n";
        let err = Schema::from_toml_str(source, &DateFormat::default()).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidEntityName(_)));
    }

    #[test]
    fn test_invalid_default_rejected() {
        let source = r#"
[[entities]]
name = "Task"

[[entities.attributes]]
name = "priority"
type = "integer"
default = "high"
"#;
        let err = Schema::from_toml_str(source, &DateFormat::default()).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidDefault { .. }));
    }
}

//! Error types for the stratum persistence layer.

use crate::schema::AttributeType;
use crate::types::ObjectId;
use std::fmt;
use thiserror::Error;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Record codec error: {0}")]
    Codec(String),

    #[error("Record not found: {entity}/{id}")]
    RecordNotFound { entity: String, id: ObjectId },

    #[error("Corrupt store key: {0}")]
    CorruptKey(String),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Schema loading and lookup errors
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Failed to read schema file {path}: {message}")]
    Unreadable { path: String, message: String },

    #[error("Failed to parse schema: {0}")]
    Parse(String),

    #[error("Duplicate entity: {0}")]
    DuplicateEntity(String),

    #[error("Entity '{entity}' declares '{key}' more than once")]
    DuplicateAttribute { entity: String, key: String },

    #[error("Invalid entity name: {0:?}")]
    InvalidEntityName(String),

    #[error("Invalid default for {entity}.{attribute}: {message}")]
    InvalidDefault {
        entity: String,
        attribute: String,
        message: String,
    },

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),
}

/// Attribute coercion errors raised while applying untyped records
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CoercionError {
    #[error("Cannot coerce {value} into {expected} for attribute '{attribute}'")]
    Invalid {
        attribute: String,
        expected: AttributeType,
        value: String,
    },

    #[error("Unknown attribute '{attribute}' on entity '{entity}'")]
    UnknownAttribute { entity: String, attribute: String },
}

/// Query and predicate errors. Always returned, never raised as a panic.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum QueryError {
    #[error("Malformed predicate at offset {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("Unknown attribute '{attribute}' on entity '{entity}'")]
    UnknownAttribute { entity: String, attribute: String },

    #[error("Operator {operator} cannot be applied to attribute '{attribute}' of type {kind}")]
    UnsupportedOperator {
        attribute: String,
        operator: String,
        kind: AttributeType,
    },

    #[error("Literal {literal} is not comparable with attribute '{attribute}': {message}")]
    IncompatibleLiteral {
        attribute: String,
        literal: String,
        message: String,
    },
}

/// Errors raised by persistence contexts
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Validation failed: {entity}.{attribute} is required ({object})")]
    Validation {
        entity: String,
        object: ObjectId,
        attribute: String,
    },

    #[error("Contract violation: {0}")]
    ContractViolation(String),

    #[error("Confinement queue closed for context {context}")]
    QueueClosed { context: String },

    #[error("Object {0} is not registered in this context")]
    UnknownObject(ObjectId),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Coercion error: {0}")]
    Coercion(#[from] CoercionError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),
}

impl ContextError {
    /// True for programmer errors (wrong queue, foreign objects, foreign contexts).
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, ContextError::ContractViolation(_))
    }
}

/// Stage of the save-propagation chain at which a save ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStage {
    /// Leaf commit into the main context.
    Local,
    /// Main commit into the writer context.
    Main,
    /// Writer commit into the backing store.
    Writer,
}

impl fmt::Display for SaveStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SaveStage::Local => "local",
            SaveStage::Main => "main",
            SaveStage::Writer => "writer",
        };
        f.write_str(name)
    }
}

/// Outcome delivered to a save completion when propagation fails.
///
/// `Local` failures abort before anything reached a parent. `Main` and
/// `Writer` failures happen after the leaf's pending changes were already
/// pushed and cleared; those are not rolled back.
#[derive(Debug, Error)]
#[error("Save failed at {stage} stage: {source}")]
pub struct SaveError {
    pub stage: SaveStage,
    #[source]
    pub source: ContextError,
}

impl SaveError {
    pub fn new(stage: SaveStage, source: ContextError) -> Self {
        Self { stage, source }
    }

    /// True when the failure happened after the leaf commit succeeded.
    pub fn is_propagation_failure(&self) -> bool {
        self.stage != SaveStage::Local
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Load(String),

    #[error("Configuration validation failed:\n{}", .0.join("\n"))]
    Invalid(Vec<String>),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Load(err.to_string())
    }
}

/// Errors surfaced by the `stratum` command line.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Save(#[from] SaveError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("Invalid input {path}: {message}")]
    Input { path: String, message: String },

    #[error("Invalid arguments: {0}")]
    Usage(String),

    #[error("Runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}

//! Configuration System
//!
//! Layered configuration: built-in defaults, then the global file, then
//! workspace files, then `STRATUM__`-prefixed environment variables
//! (`STRATUM__STORE__PATH=/tmp/store`).

use crate::context::MergePolicy;
use crate::date_format::{DateFormat, DEFAULT_DATE_PATTERN};
use crate::error::ConfigError;
use crate::logging::LoggingConfig;
use config::{Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

mod merge {
    pub mod layering;
}
mod sources {
    pub mod global_file;
    pub mod workspace_file;
}

pub use merge::layering::default_store_path;
pub use sources::global_file::global_config_path;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StratumConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backing store location and schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    #[serde(default = "default_schema_path")]
    pub schema_path: PathBuf,

    /// Flush the store on this period in addition to shutdown.
    #[serde(default)]
    pub flush_every_ms: Option<u64>,
}

fn default_schema_path() -> PathBuf {
    PathBuf::from("schema.toml")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            schema_path: default_schema_path(),
            flush_every_ms: None,
        }
    }
}

/// Context hierarchy settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default)]
    pub merge_policy: MergePolicy,

    /// chrono pattern used to parse and format dates in records.
    #[serde(default = "default_date_format")]
    pub date_format: String,

    /// Prefix for queue labels: `{prefix}.writer`, `{prefix}.main`, ...
    #[serde(default = "default_queue_label_prefix")]
    pub queue_label_prefix: String,
}

fn default_date_format() -> String {
    DEFAULT_DATE_PATTERN.to_string()
}

fn default_queue_label_prefix() -> String {
    "stratum".to_string()
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            merge_policy: MergePolicy::default(),
            date_format: default_date_format(),
            queue_label_prefix: default_queue_label_prefix(),
        }
    }
}

impl StratumConfig {
    /// Validate the entire configuration, reporting every problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.store.path.as_os_str().is_empty() {
            errors.push("store.path cannot be empty".to_string());
        }
        if self.store.schema_path.as_os_str().is_empty() {
            errors.push("store.schema_path cannot be empty".to_string());
        }
        if self.store.flush_every_ms == Some(0) {
            errors.push("store.flush_every_ms must be greater than zero".to_string());
        }
        if let Err(e) = DateFormat::new(self.context.date_format.clone()).validate() {
            errors.push(format!("context.date_format: {}", e));
        }
        if self.context.queue_label_prefix.trim().is_empty() {
            errors.push("context.queue_label_prefix cannot be empty".to_string());
        }
        if let Err(e) = self.logging.validate() {
            errors.push(format!("logging: {}", e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }
}

/// Loads [`StratumConfig`] from its layered sources.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for the workspace at `workspace_root`.
    pub fn load(workspace_root: &Path) -> Result<StratumConfig, ConfigError> {
        let builder = merge::layering::builder_with_defaults()?;
        let builder = sources::global_file::add_to_builder(builder)?;
        let builder = sources::workspace_file::add_to_builder(builder, workspace_root)?;
        let config: StratumConfig = builder
            .add_source(
                Environment::with_prefix("STRATUM")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        debug!(store = %config.store.path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Load configuration from a single file over the defaults.
    pub fn load_from_file(path: &Path) -> Result<StratumConfig, ConfigError> {
        let config: StratumConfig = merge::layering::builder_with_defaults()?
            .add_source(File::from(path))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

//! Layer defaults: values every source may override.

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError};
use directories::ProjectDirs;
use std::path::PathBuf;

/// Store location used when no source names one: the platform data
/// directory, or `.stratum/store` when none can be determined.
pub fn default_store_path() -> PathBuf {
    ProjectDirs::from("", "", "stratum")
        .map(|dirs| dirs.data_dir().join("store"))
        .unwrap_or_else(|| PathBuf::from(".stratum/store"))
}

/// Create a Config builder with defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("store.path", default_store_path().to_string_lossy().into_owned())?
        .set_default("store.schema_path", "schema.toml")?
        .set_default("context.merge_policy", "external-trump")?
        .set_default("context.queue_label_prefix", "stratum")
}

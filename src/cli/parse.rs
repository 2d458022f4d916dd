//! CLI parse: clap types for stratum. No behavior; definitions only.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Stratum CLI - inspect and load a tiered object store
#[derive(Parser, Debug)]
#[command(name = "stratum")]
#[command(about = "Queue-confined persistence contexts over a disk-backed object store")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory (searched for config/config.toml)
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Store directory (overrides store.path)
    #[arg(long)]
    pub store: Option<PathBuf>,

    /// Schema file (overrides store.schema_path)
    #[arg(long)]
    pub schema: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Count objects of an entity
    Count {
        entity: String,
        /// Predicate, e.g. "age > 30 AND name BEGINSWITH 'a'"
        #[arg(long = "where")]
        filter: Option<String>,
    },
    /// Fetch objects of an entity
    Fetch {
        entity: String,
        /// Attribute to match against --value
        #[arg(long, requires = "value")]
        key: Option<String>,
        #[arg(long, requires = "key")]
        value: Option<String>,
        /// Predicate, combined with --key/--value by AND
        #[arg(long = "where")]
        filter: Option<String>,
        /// Attribute to sort by
        #[arg(long)]
        sort: Option<String>,
        /// Sort descending
        #[arg(long, requires = "sort")]
        desc: bool,
        /// Maximum number of objects (0 for no limit)
        #[arg(long, default_value = "0")]
        limit: usize,
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Import a JSON array of records and save them to the store
    Import {
        entity: String,
        file: PathBuf,
    },
    /// Delete every object of an entity
    Truncate { entity: String },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

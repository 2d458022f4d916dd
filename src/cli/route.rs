//! CLI route: single route table and run context.

use crate::actions::{FetchRequest, Record};
use crate::cli::output::render_objects;
use crate::cli::parse::{Cli, Commands};
use crate::config::{ConfigLoader, StratumConfig};
use crate::context::ContextManager;
use crate::error::{CliError, ContextError};
use crate::query::Predicate;
use crate::value::Value;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::runtime::Runtime;
use tracing::{debug, info};

/// Runtime context for CLI execution: resolved configuration, the tokio
/// runtime the context queues run on, and the manager over the store.
pub struct RunContext {
    config: StratumConfig,
    manager: ContextManager,
    runtime: Runtime,
}

impl RunContext {
    /// Load configuration for `cli`, apply its overrides and open the store.
    pub fn new(cli: &Cli) -> Result<Self, CliError> {
        Self::with_config(Self::resolve_config(cli)?)
    }

    /// Configuration for `cli` without opening anything.
    pub fn resolve_config(cli: &Cli) -> Result<StratumConfig, CliError> {
        let mut config = match &cli.config {
            Some(path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load(&cli.workspace)?,
        };
        config.store.path = resolve(&cli.workspace, cli.store.as_ref(), &config.store.path);
        config.store.schema_path = resolve(&cli.workspace, cli.schema.as_ref(), &config.store.schema_path);
        if let Some(level) = &cli.log_level {
            config.logging.level = level.clone();
        }
        if let Some(format) = &cli.log_format {
            config.logging.format = format.clone();
        }
        config.validate()?;
        Ok(config)
    }

    /// Open the store named by an already resolved configuration.
    pub fn with_config(config: StratumConfig) -> Result<Self, CliError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("stratum-cli")
            .build()?;
        let manager = {
            let _entered = runtime.enter();
            ContextManager::open(&config)?
        };
        Ok(Self {
            config,
            manager,
            runtime,
        })
    }

    pub fn config(&self) -> &StratumConfig {
        &self.config
    }

    pub fn manager(&self) -> &ContextManager {
        &self.manager
    }

    /// Execute a CLI command via the single route table, then flush the store.
    pub fn execute(&self, command: &Commands) -> Result<String, CliError> {
        let started = Instant::now();
        let output = self.runtime.block_on(async {
            let output = route(&self.manager, command).await?;
            self.manager.flush().await?;
            Ok::<_, CliError>(output)
        });
        debug!(elapsed_ms = started.elapsed().as_millis() as u64, ok = output.is_ok(), "Command finished");
        output
    }

    /// Drain the context queues and flush the store.
    pub fn shutdown(self) -> Result<(), CliError> {
        let Self { manager, runtime, .. } = self;
        runtime.block_on(manager.shutdown())?;
        Ok(())
    }
}

// Flags are taken as given; configured relative paths hang off the workspace.
fn resolve(workspace: &Path, flag: Option<&PathBuf>, configured: &Path) -> PathBuf {
    match flag {
        Some(path) => path.clone(),
        None if configured.is_relative() => workspace.join(configured),
        None => configured.to_path_buf(),
    }
}

async fn route(manager: &ContextManager, command: &Commands) -> Result<String, CliError> {
    match command {
        Commands::Count { entity, filter } => {
            let entity = entity.clone();
            let predicate = filter.as_deref().map(Predicate::parse).transpose()?;
            let count = manager
                .main_context()
                .perform(move |cx| match &predicate {
                    Some(predicate) => cx.count_with_predicate(&entity, predicate),
                    None => cx.count(&entity),
                })
                .await??;
            Ok(count.to_string())
        }
        Commands::Fetch {
            entity,
            key,
            value,
            filter,
            sort,
            desc,
            limit,
            format,
        } => {
            let description = std::sync::Arc::clone(manager.schema().entity(entity).map_err(ContextError::from)?);
            let mut request = FetchRequest::new(entity.as_str()).limit(*limit);
            let by_key = match (key, value) {
                (Some(key), Some(value)) => Some(Predicate::eq(key.as_str(), Value::from(value.as_str()))),
                (None, None) => None,
                _ => return Err(CliError::Usage("--key and --value must be given together".into())),
            };
            let parsed = filter.as_deref().map(Predicate::parse).transpose()?;
            let predicate = match (by_key, parsed) {
                (Some(a), Some(b)) => Some(a.and(b)),
                (a, b) => a.or(b),
            };
            if let Some(predicate) = predicate {
                request = request.with_predicate(predicate);
            }
            if let Some(sort) = sort {
                request = request.sorted_by(sort.as_str(), !desc);
            }
            let objects = manager
                .main_context()
                .perform(move |cx| cx.fetch(&request))
                .await??;
            render_objects(&description, &objects, manager.date_format(), *format)
        }
        Commands::Import { entity, file } => {
            let records = read_records(file)?;
            let total = records.len();
            let leaf = manager.temporary_context();
            let entity_name = entity.clone();
            leaf.perform(move |cx| {
                for record in &records {
                    cx.create_with_record(&entity_name, record)?;
                }
                Ok::<_, ContextError>(())
            })
            .await??;
            let report = manager.save_temporary_context(&leaf).await?;
            info!(entity = %entity, inserted = report.durable.inserted, "Imported records");
            Ok(format!("Imported {} {} record(s)", total, entity))
        }
        Commands::Truncate { entity } => {
            let leaf = manager.temporary_context();
            let entity_name = entity.clone();
            let removed = leaf.perform(move |cx| cx.truncate_all(&entity_name, false)).await??;
            manager.save_temporary_context(&leaf).await?;
            Ok(format!("Deleted {} {} object(s)", removed, entity))
        }
    }
}

fn read_records(path: &Path) -> Result<Vec<Record>, CliError> {
    let input_error = |message: String| CliError::Input {
        path: path.display().to_string(),
        message,
    };
    let text = std::fs::read_to_string(path).map_err(|e| input_error(e.to_string()))?;
    serde_json::from_str(&text).map_err(|e| input_error(e.to_string()))
}

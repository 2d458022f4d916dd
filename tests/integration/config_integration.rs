//! Opening a manager from configuration

use super::test_utils::{record, SCHEMA};
use serde_json::json;
use std::path::PathBuf;
use stratum::config::{ConfigLoader, StratumConfig};
use stratum::{ContextManager, MergePolicy};
use tempfile::TempDir;

fn write_config(dir: &TempDir, body: &str) -> PathBuf {
    std::fs::write(dir.path().join("schema.toml"), SCHEMA).unwrap();
    let path = dir.path().join("stratum.toml");
    std::fs::write(&path, body).unwrap();
    path
}

#[tokio::test(flavor = "multi_thread")]
async fn test_open_from_config_file() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        &format!(
            "[store]\npath = {:?}\nschema_path = {:?}\nflush_every_ms = 10\n\n[context]\nmerge_policy = \"in-memory-trump\"\nqueue_label_prefix = \"app\"\n",
            dir.path().join("store").display().to_string(),
            dir.path().join("schema.toml").display().to_string(),
        ),
    );

    let config = ConfigLoader::load_from_file(&path).unwrap();
    assert_eq!(config.context.merge_policy, MergePolicy::InMemoryTrump);

    let manager = ContextManager::open(&config).unwrap();
    assert_eq!(manager.main_context().label(), "app.main");
    let leaf = manager.temporary_context();
    assert!(leaf.label().starts_with("app.temporary."));
    let policy = leaf.perform(|cx| cx.merge_policy()).await.unwrap();
    assert_eq!(policy, MergePolicy::InMemoryTrump);

    leaf.perform(|cx| cx.create_with_record("Person", &record(json!({ "name": "ada" }))))
        .await
        .unwrap()
        .unwrap();
    manager.save_temporary_context(&leaf).await.unwrap();
    drop(leaf);
    manager.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_schema_file_fails_to_open() {
    let dir = TempDir::new().unwrap();
    let mut config = StratumConfig::default();
    config.store.path = dir.path().join("store");
    config.store.schema_path = dir.path().join("missing.toml");
    assert!(ContextManager::open(&config).is_err());
}

#[test]
fn test_invalid_date_pattern_fails_validation() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[context]\ndate_format = \"%Y-%Q\"\n");
    assert!(ConfigLoader::load_from_file(&path).is_err());
}

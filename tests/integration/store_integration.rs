//! Durability of the sled-backed store across manager lifetimes

use super::test_utils::{record, schema};
use serde_json::json;
use stratum::config::ContextConfig;
use stratum::{ContextError, ContextManager, StoreCoordinator};
use tempfile::TempDir;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn open(dir: &TempDir) -> ContextManager {
    let coordinator = StoreCoordinator::open(&dir.path().join("store"), schema()).unwrap();
    ContextManager::initialize(coordinator, &ContextConfig::default()).unwrap()
}

#[test]
fn test_records_and_ids_survive_reopen() {
    let dir = TempDir::new().unwrap();

    // Dropping the runtime releases the queue tasks and with them the store.
    let first_id = {
        let rt = runtime();
        let id = rt.block_on(async {
            let manager = open(&dir);
            let leaf = manager.temporary_context();
            let ada = leaf
                .perform(|cx| cx.create_with_record("Person", &record(json!({ "name": "ada", "age": 36 }))))
                .await
                .unwrap()
                .unwrap();
            manager.save_temporary_context(&leaf).await.unwrap();
            drop(leaf);
            manager.shutdown().await.unwrap();
            ada.id()
        });
        drop(rt);
        id
    };

    let rt = runtime();
    rt.block_on(async {
        let manager = open(&dir);
        let leaf = manager.temporary_context();
        let (ada, bob) = leaf
            .perform(move |cx| {
                let ada = cx.fetch_object("Person", first_id)?;
                let bob = cx.create_with_record("Person", &record(json!({ "name": "bob" })))?;
                Ok::<_, ContextError>((ada, bob))
            })
            .await
            .unwrap()
            .unwrap();
        let ada = ada.unwrap();
        assert_eq!(ada.get_str("name"), Some("ada"));
        assert_eq!(ada.get_i64("age"), Some(36));
        assert!(bob.id() > first_id);
        manager.save_temporary_context(&leaf).await.unwrap();
        assert_eq!(manager.coordinator().scan("Person").unwrap().len(), 2);
        drop(leaf);
        manager.shutdown().await.unwrap();
    });
}

#[test]
fn test_coordinator_binds_one_writer() {
    let rt = runtime();
    rt.block_on(async {
        let manager = super::test_utils::manager();
        let err = manager
            .coordinator()
            .bind_writer(manager.main_context().queue_id())
            .unwrap_err();
        assert!(err.is_contract_violation());
    });
}

#[test]
fn test_scan_of_unknown_entity_fails() {
    let rt = runtime();
    rt.block_on(async {
        let manager = super::test_utils::manager();
        assert!(matches!(
            manager.coordinator().scan("Planet"),
            Err(ContextError::Schema(_))
        ));
    });
}

//! Save propagation from temporary contexts through main and writer

use super::test_utils::{manager, manager_over, record, FailingStore};
use chrono::{TimeZone, Utc};
use serde_json::json;
use std::sync::mpsc;
use std::time::Duration;
use stratum::{ContextError, SaveStage};

#[tokio::test(flavor = "multi_thread")]
async fn test_create_in_temporary_reaches_store() {
    let manager = manager();
    let leaf = manager.temporary_context();
    leaf.perform(|cx| {
        cx.create_with_record(
            "Person",
            &record(json!({ "name": "ada", "age": 36, "createdAt": "2020-01-01" })),
        )
    })
    .await
    .unwrap()
    .unwrap();

    let report = manager.save_temporary_context(&leaf).await.unwrap();
    assert_eq!(report.leaf.inserted, 1);
    assert_eq!(report.durable.inserted, 1);

    let stored = manager
        .writer_context()
        .perform(|cx| cx.fetch_first_by_key("Person", "name", "ada"))
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(stored.get_i64("age"), Some(36));
    assert_eq!(
        stored.get_date("createdAt"),
        Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap())
    );
    assert_eq!(manager.coordinator().scan("Person").unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_validation_failure_is_local_and_nothing_is_stored() {
    let manager = manager();
    let leaf = manager.temporary_context();
    leaf.perform(|cx| cx.create_with_record("Person", &record(json!({ "age": 3 }))))
        .await
        .unwrap()
        .unwrap();

    let err = manager.save_temporary_context(&leaf).await.unwrap_err();
    assert_eq!(err.stage, SaveStage::Local);
    assert!(!err.is_propagation_failure());
    assert!(matches!(err.source, ContextError::Validation { .. }));

    let still_pending = leaf.perform(|cx| cx.has_changes()).await.unwrap();
    assert!(still_pending);
    let in_main = manager
        .main_context()
        .perform(|cx| cx.count("Person"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(in_main, 0);
    assert!(manager.coordinator().scan("Person").unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sequential_saves_complete_in_order() {
    let manager = manager();
    let leaf = manager.temporary_context();
    let (tx, rx) = mpsc::channel();

    for i in 0..5i64 {
        leaf.perform(move |cx| {
            cx.create_with_record("Person", &record(json!({ "name": format!("p{}", i), "age": i })))
        })
        .await
        .unwrap()
        .unwrap();
        let tx = tx.clone();
        manager.save_temporary_context_with(&leaf, move |error| {
            let _ = tx.send((i, error.is_none()));
        });
    }
    drop(tx);

    let completions: Vec<(i64, bool)> = tokio::task::spawn_blocking(move || rx.iter().collect())
        .await
        .unwrap();
    assert_eq!(
        completions,
        (0..5).map(|i| (i, true)).collect::<Vec<_>>()
    );
    assert_eq!(manager.coordinator().scan("Person").unwrap().len(), 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_writer_stage_failure_is_reported_and_retried_later() {
    let store = FailingStore::new();
    let manager = manager_over(store.clone());
    store.set_failing(true);

    let leaf = manager.temporary_context();
    leaf.perform(|cx| cx.create_with_record("Person", &record(json!({ "name": "ada" }))))
        .await
        .unwrap()
        .unwrap();
    let err = manager.save_temporary_context(&leaf).await.unwrap_err();
    assert_eq!(err.stage, SaveStage::Writer);
    assert!(err.is_propagation_failure());
    assert!(matches!(err.source, ContextError::Storage(_)));

    // The leaf and main commits are not rolled back.
    let leaf_pending = leaf.perform(|cx| cx.has_changes()).await.unwrap();
    assert!(!leaf_pending);
    let in_main = manager
        .main_context()
        .perform(|cx| cx.count("Person"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(in_main, 1);
    assert!(manager.coordinator().scan("Person").unwrap().is_empty());

    store.set_failing(false);
    let next = manager.temporary_context();
    next.perform(|cx| cx.create_with_record("Person", &record(json!({ "name": "bob" }))))
        .await
        .unwrap()
        .unwrap();
    let report = manager.save_temporary_context(&next).await.unwrap();
    assert_eq!(report.durable.inserted, 2);
    assert_eq!(manager.coordinator().scan("Person").unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_callback_receives_error_once() {
    let store = FailingStore::new();
    let manager = manager_over(store.clone());
    store.set_failing(true);

    let leaf = manager.temporary_context();
    leaf.perform(|cx| cx.create_with_record("Person", &record(json!({ "name": "ada" }))))
        .await
        .unwrap()
        .unwrap();

    let (tx, rx) = mpsc::channel();
    manager.save_temporary_context_with(&leaf, move |error| {
        let _ = tx.send(error.map(|e| e.stage));
    });
    let received: Vec<_> = tokio::task::spawn_blocking(move || rx.iter().collect::<Vec<_>>())
        .await
        .unwrap();
    assert_eq!(received, vec![Some(SaveStage::Writer)]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_save_handle_can_be_waited_on_from_plain_thread() {
    let manager = manager();
    let leaf = manager.temporary_context();
    leaf.perform(|cx| cx.create_with_record("Person", &record(json!({ "name": "ada" }))))
        .await
        .unwrap()
        .unwrap();
    let handle = manager.save_temporary_context(&leaf);
    let report = tokio::task::spawn_blocking(move || handle.wait())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.durable.inserted, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_save_of_dropped_hierarchy_still_completes() {
    let manager = manager();
    let leaf = manager.temporary_context();
    leaf.perform(|cx| cx.create_with_record("Person", &record(json!({ "name": "ada" }))))
        .await
        .unwrap()
        .unwrap();
    let handle = manager.save_temporary_context(&leaf);
    drop(manager);
    let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("completion delivered");
    if let Err(err) = outcome {
        assert!(matches!(err.source, ContextError::QueueClosed { .. }));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_updates_and_deletes_propagate() {
    let manager = manager();
    let leaf = manager.temporary_context();
    leaf.perform(|cx| {
        cx.create_with_record("Person", &record(json!({ "name": "ada", "age": 36 })))?;
        cx.create_with_record("Person", &record(json!({ "name": "bob", "age": 40 })))
    })
    .await
    .unwrap()
    .unwrap();
    manager.save_temporary_context(&leaf).await.unwrap();

    let editor = manager.temporary_context();
    editor
        .perform(|cx| {
            let ada = cx
                .fetch_first_by_key("Person", "name", "ada")?
                .ok_or(ContextError::ContractViolation("ada missing".into()))?;
            cx.set_value(&ada, "age", 37)?;
            let bob = cx
                .fetch_first_by_key("Person", "name", "bob")?
                .ok_or(ContextError::ContractViolation("bob missing".into()))?;
            cx.delete(&bob, false)?;
            Ok::<_, ContextError>(())
        })
        .await
        .unwrap()
        .unwrap();
    let report = manager.save_temporary_context(&editor).await.unwrap();
    assert_eq!(report.leaf.updated, 1);
    assert_eq!(report.leaf.deleted, 1);

    let stored = manager.coordinator().scan("Person").unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].attributes.get("age").and_then(|v| v.as_i64()), Some(37));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_successful_save_is_flushed_before_completion() {
    let store = FailingStore::new();
    let manager = manager_over(store.clone());

    let leaf = manager.temporary_context();
    leaf.perform(|cx| cx.create_with_record("Person", &record(json!({ "name": "ada" }))))
        .await
        .unwrap()
        .unwrap();
    manager.save_temporary_context(&leaf).await.unwrap();

    assert_eq!(store.writes(), 1);
    assert_eq!(store.flushes(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_flush_failure_is_a_writer_stage_error() {
    let store = FailingStore::new();
    let manager = manager_over(store.clone());
    store.set_flush_failing(true);

    let leaf = manager.temporary_context();
    leaf.perform(|cx| cx.create_with_record("Person", &record(json!({ "name": "ada" }))))
        .await
        .unwrap()
        .unwrap();
    let err = manager.save_temporary_context(&leaf).await.unwrap_err();
    assert_eq!(err.stage, SaveStage::Writer);
    assert!(matches!(err.source, ContextError::Storage(_)));

    // The writer keeps its changes and commits them again once flushing works.
    store.set_flush_failing(false);
    let next = manager.temporary_context();
    next.perform(|cx| cx.create_with_record("Person", &record(json!({ "name": "bob" }))))
        .await
        .unwrap()
        .unwrap();
    manager.save_temporary_context(&next).await.unwrap();
    assert_eq!(manager.coordinator().scan("Person").unwrap().len(), 2);
    assert_eq!(store.flushes(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_main_stage_failure_keeps_leaf_cleared_and_store_empty() {
    let manager = manager();
    manager
        .main_context()
        .perform(|cx| cx.create_with_record("Person", &record(json!({ "age": 3 }))))
        .await
        .unwrap()
        .unwrap();

    let leaf = manager.temporary_context();
    leaf.perform(|cx| cx.create_with_record("Person", &record(json!({ "name": "ada" }))))
        .await
        .unwrap()
        .unwrap();
    let err = manager.save_temporary_context(&leaf).await.unwrap_err();
    assert_eq!(err.stage, SaveStage::Main);
    assert!(err.is_propagation_failure());
    assert!(matches!(err.source, ContextError::Validation { .. }));

    let leaf_pending = leaf.perform(|cx| cx.has_changes()).await.unwrap();
    assert!(!leaf_pending);
    assert!(manager.coordinator().scan("Person").unwrap().is_empty());
}

//! Queue confinement and single-writer checks

use super::test_utils::{manager, record};
use serde_json::json;
use stratum::store::ChangeSet;
use stratum::ContextError;

#[tokio::test(flavor = "multi_thread")]
async fn test_store_commit_outside_writer_queue_is_rejected() {
    let manager = manager();
    let err = manager.coordinator().commit(&ChangeSet::default()).unwrap_err();
    assert!(err.is_contract_violation());

    let coordinator = manager.coordinator().clone();
    let from_main = manager
        .main_context()
        .perform(move |_| coordinator.commit(&ChangeSet::default()))
        .await
        .unwrap();
    assert!(from_main.unwrap_err().is_contract_violation());

    let coordinator = manager.coordinator().clone();
    let from_writer = manager
        .writer_context()
        .perform(move |_| coordinator.commit(&ChangeSet::default()))
        .await
        .unwrap();
    assert!(from_writer.is_ok());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_flush_outside_writer_queue_is_rejected() {
    let manager = manager();
    assert!(manager.coordinator().flush().unwrap_err().is_contract_violation());
    manager.flush().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_blocking_wait_on_own_queue_is_refused() {
    let manager = manager();
    let main = manager.main_context().clone();
    let inner = main.clone();
    let outcome = main
        .perform(move |_| inner.perform_and_wait(|cx| cx.registered_count()))
        .await
        .unwrap();
    assert!(outcome.unwrap_err().is_contract_violation());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_blocking_wait_from_plain_thread() {
    let manager = manager();
    let main = manager.main_context().clone();
    let count = tokio::task::spawn_blocking(move || main.perform_and_wait(|cx| cx.count("Person")))
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_object_from_other_context_is_rejected() {
    let manager = manager();
    let first = manager.temporary_context();
    let second = manager.temporary_context();
    let object = first
        .perform(|cx| cx.create_with_record("Person", &record(json!({ "name": "ada" }))))
        .await
        .unwrap()
        .unwrap();

    let foreign = object.clone();
    let err = second
        .perform(move |cx| cx.set_value(&foreign, "age", 3))
        .await
        .unwrap()
        .unwrap_err();
    assert!(err.is_contract_violation());

    let err = second
        .perform(move |cx| cx.delete(&object, false))
        .await
        .unwrap()
        .unwrap_err();
    assert!(err.is_contract_violation());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_entity_is_schema_error() {
    let manager = manager();
    let err = manager
        .main_context()
        .perform(|cx| cx.count("Planet"))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, ContextError::Schema(_)));
}

//! Context hierarchy shape and temporary context lifecycle

use super::test_utils::{manager, record};
use serde_json::json;
use stratum::types::ContextRole;
use stratum::ContextError;

#[tokio::test(flavor = "multi_thread")]
async fn test_temporaries_are_children_of_main() {
    let manager = manager();
    let main = manager.main_context().clone();
    let writer = manager.writer_context().clone();

    let leaves: Vec<_> = (0..8).map(|_| manager.temporary_context()).collect();
    assert_eq!(manager.live_temporaries(), 8);
    for leaf in &leaves {
        assert_eq!(leaf.role(), ContextRole::Temporary);
        assert_eq!(leaf.parent_id(), Some(main.id()));
        assert_ne!(leaf.queue_id(), main.queue_id());
        assert_ne!(leaf.queue_id(), writer.queue_id());
    }

    let mut ids: Vec<_> = leaves.iter().map(|leaf| leaf.id()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 8);

    drop(leaves);
    assert_eq!(manager.live_temporaries(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_writer_and_main_labels_use_prefix() {
    let manager = manager();
    assert_eq!(manager.writer_context().label(), "stratum.writer");
    assert_eq!(manager.main_context().label(), "stratum.main");
    assert_eq!(manager.main_context().parent_id(), Some(manager.writer_context().id()));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_siblings_do_not_see_unsaved_changes() {
    let manager = manager();
    let first = manager.temporary_context();
    let second = manager.temporary_context();

    first
        .perform(|cx| cx.create_with_record("Person", &record(json!({ "name": "ada" }))))
        .await
        .unwrap()
        .unwrap();

    let seen_by_second = second.perform(|cx| cx.count("Person")).await.unwrap().unwrap();
    let seen_by_main = manager
        .main_context()
        .perform(|cx| cx.count("Person"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seen_by_second, 0);
    assert_eq!(seen_by_main, 0);

    manager.save_temporary_context(&first).await.unwrap();

    let seen_by_second = second.perform(|cx| cx.count("Person")).await.unwrap().unwrap();
    assert_eq!(seen_by_second, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_objects_keep_identity_across_contexts() {
    let manager = manager();
    let leaf = manager.temporary_context();
    let created = leaf
        .perform(|cx| cx.create_with_record("Person", &record(json!({ "name": "ada" }))))
        .await
        .unwrap()
        .unwrap();
    manager.save_temporary_context(&leaf).await.unwrap();

    let other = manager.temporary_context();
    let fetched = other
        .perform(|cx| cx.fetch_first_by_key("Person", "name", "ada"))
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(fetched.id(), created.id());
    assert_ne!(fetched.context(), created.context());
    assert_eq!(fetched.context(), other.id());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reset_discards_pending_work() {
    let manager = manager();
    let leaf = manager.temporary_context();
    let pending = leaf
        .perform(|cx| {
            cx.create_with_record("Person", &record(json!({ "name": "ada" })))?;
            cx.reset();
            Ok::<_, ContextError>((cx.has_changes(), cx.registered_count()))
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pending, (false, 0));
}

//! Entity actions across the hierarchy

use super::test_utils::{manager, record};
use serde_json::json;
use stratum::{ContextError, ContextManager, MergePolicy, Predicate, Value};

async fn seed(manager: &ContextManager) {
    let leaf = manager.temporary_context();
    leaf.perform(|cx| {
        for (name, age) in [("carol", 30), ("bob", 25), ("alice", 41), ("dave", 25)] {
            cx.create_with_record("Person", &record(json!({ "name": name, "age": age })))?;
        }
        Ok::<_, ContextError>(())
    })
    .await
    .unwrap()
    .unwrap();
    manager.save_temporary_context(&leaf).await.unwrap();
}

fn names(objects: &[stratum::ManagedObject]) -> Vec<String> {
    objects
        .iter()
        .filter_map(|o| o.get_str("name").map(str::to_string))
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sorted_and_limited_fetches() {
    let manager = manager();
    seed(&manager).await;

    let (sorted, limited, by_age, oldest, youngest) = manager
        .main_context()
        .perform(|cx| {
            Ok::<_, ContextError>((
                cx.fetch_all_sorted("Person", "name", true, 0)?,
                cx.fetch_all_sorted("Person", "age", false, 2)?,
                cx.fetch_by_sorted("Person", "age", 25, "name", true, 0)?,
                cx.fetch_last_sorted("Person", "age")?,
                cx.fetch_first_sorted("Person", "age")?,
            ))
        })
        .await
        .unwrap()
        .unwrap();

    assert_eq!(names(&sorted), vec!["alice", "bob", "carol", "dave"]);
    assert_eq!(names(&limited), vec!["alice", "carol"]);
    assert_eq!(names(&by_age), vec!["bob", "dave"]);
    assert_eq!(oldest.and_then(|o| o.get_i64("age")), Some(41));
    assert_eq!(youngest.and_then(|o| o.get_i64("age")), Some(25));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_predicate_fetches() {
    let manager = manager();
    seed(&manager).await;

    let (matched, excluded, text) = manager
        .main_context()
        .perform(|cx| {
            let predicate = Predicate::parse("age >= 30 OR name BEGINSWITH 'b'")?;
            Ok::<_, ContextError>((
                cx.fetch_by_predicate_sorted("Person", &predicate, "name", true)?,
                cx.objects_for_key(
                    "Person",
                    "name",
                    "age",
                    vec![Value::from("bob"), Value::from("carol")],
                    false,
                )?,
                cx.fetch_by_predicate("Person", &Predicate::parse("name CONTAINS 'ar'")?)?,
            ))
        })
        .await
        .unwrap()
        .unwrap();

    assert_eq!(names(&matched), vec!["alice", "bob", "carol"]);
    assert_eq!(names(&excluded), vec!["dave", "alice"]);
    assert_eq!(names(&text), vec!["carol"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_aliases_map_record_keys() {
    let manager = manager();
    let leaf = manager.temporary_context();
    let note = leaf
        .perform(|cx| cx.create_with_record("Note", &record(json!({ "id": "42", "body": "hello" }))))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(note.get_i64("remoteId"), Some(42));
    assert_eq!(note.get_str("body"), Some("hello"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_truncate_through_propagation_is_idempotent() {
    let manager = manager();
    seed(&manager).await;

    for expected in [4usize, 0] {
        let leaf = manager.temporary_context();
        let removed = leaf
            .perform(|cx| cx.truncate_all("Person", false))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(removed, expected);
        manager.save_temporary_context(&leaf).await.unwrap();
        assert!(manager.coordinator().scan("Person").unwrap().is_empty());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_refresh_applies_merge_policy() {
    let manager = manager();
    seed(&manager).await;

    let reader = manager.temporary_context();
    let carol = reader
        .perform(|cx| {
            let carol = cx
                .fetch_first_by_key("Person", "name", "carol")?
                .ok_or(ContextError::ContractViolation("carol missing".into()))?;
            cx.set_value(&carol, "age", 31)
        })
        .await
        .unwrap()
        .unwrap();

    let editor = manager.temporary_context();
    editor
        .perform(|cx| {
            let carol = cx
                .fetch_first_by_key("Person", "name", "carol")?
                .ok_or(ContextError::ContractViolation("carol missing".into()))?;
            cx.set_value(&carol, "age", 50)
        })
        .await
        .unwrap()
        .unwrap();
    manager.save_temporary_context(&editor).await.unwrap();

    let (external, local) = reader
        .perform(move |cx| {
            let external = cx.refresh_object(&carol, true)?;
            cx.set_merge_policy(MergePolicy::InMemoryTrump);
            let local = cx.set_value(&carol, "age", 32)?;
            let local = cx.refresh_object(&local, true)?;
            Ok::<_, ContextError>((external, local))
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(external.and_then(|o| o.get_i64("age")), Some(50));
    assert_eq!(local.and_then(|o| o.get_i64("age")), Some(32));
}

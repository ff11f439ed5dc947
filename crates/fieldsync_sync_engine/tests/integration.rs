//! Integration tests for the sync engine against the in-memory stores.

use fieldsync_codec::{Attachment, FieldType, TaggedValue, Value};
use fieldsync_core::{DataRef, Entity, EntitySchema, CREATED_AT_KEY, UPDATED_AT_KEY};
use fieldsync_sync_engine::{
    MemoryAttachmentStore, MemoryStore, RemoteStore, SyncConfig, SyncEngine, SyncError,
    WriteRecord,
};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Harness {
    remote: Arc<MemoryStore>,
    attachments: Arc<MemoryAttachmentStore>,
    engine: SyncEngine,
}

fn harness() -> Harness {
    harness_with(SyncConfig::default())
}

fn harness_with(config: SyncConfig) -> Harness {
    init_tracing();
    let remote = Arc::new(MemoryStore::new());
    let attachments = Arc::new(MemoryAttachmentStore::new());
    let engine = SyncEngine::new(config, remote.clone(), attachments.clone()).unwrap();
    Harness {
        remote,
        attachments,
        engine,
    }
}

fn user_schema() -> Arc<EntitySchema> {
    EntitySchema::builder("user")
        .field("name", FieldType::String)
        .field("age", FieldType::Integer)
        .field("tags", FieldType::StringArray)
        .field("friends", FieldType::Relation)
        .field("avatar", FieldType::Attachment)
        .excluded_field("draft", FieldType::String)
        .build()
        .unwrap()
}

fn album_schema() -> Arc<EntitySchema> {
    EntitySchema::builder("album")
        .field("title", FieldType::String)
        .field("photo1", FieldType::Attachment)
        .field("photo2", FieldType::Attachment)
        .field("photo3", FieldType::Attachment)
        .build()
        .unwrap()
}

fn members(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

fn sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names
}

/// Lets spawned cleanup tasks run to completion. Needs a paused clock.
async fn run_background() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test]
async fn save_assigns_generated_key_and_binds() {
    let h = harness();
    let user = Arc::new(Entity::new(user_schema()));
    let temporary = user.id();
    user.set("name", "Alice").unwrap();
    user.set("draft", "never synced").unwrap();

    let reference = h.engine.save(&user).await.unwrap();

    assert_eq!(reference.parent(), Some(DataRef::new("v1/user")));
    assert_ne!(reference.key(), temporary);
    assert_eq!(user.id(), reference.key());
    assert!(user.is_bound());

    let doc = h.remote.value_at(&reference).unwrap();
    assert_eq!(doc.get("name"), Some(&Value::from("Alice")));
    assert!(doc.get("draft").is_none());
    assert!(matches!(doc.get(CREATED_AT_KEY), Some(Value::Integer(_))));
    assert!(matches!(doc.get(UPDATED_AT_KEY), Some(Value::Integer(_))));

    let created = doc.get(CREATED_AT_KEY).and_then(Value::as_integer).unwrap();
    assert_eq!(user.created_at().timestamp_millis(), created);
}

#[tokio::test]
async fn save_uses_caller_key() {
    let h = harness();
    let user = Arc::new(Entity::with_id(user_schema(), "alice"));
    user.set("age", 30i64).unwrap();

    let reference = h.engine.save(&user).await.unwrap();
    assert_eq!(reference, DataRef::new("v1/user/alice"));
    assert_eq!(user.id(), "alice");
}

#[tokio::test]
async fn second_save_fails_without_remote_write() {
    let h = harness();
    let user = Arc::new(Entity::with_id(user_schema(), "alice"));
    h.engine.save(&user).await.unwrap();
    let writes = h.remote.writes().len();

    let err = h.engine.save(&user).await.unwrap_err();
    assert!(err.reference.is_none());
    assert!(matches!(err.source, SyncError::InvalidId { ref id } if id == "alice"));
    assert_eq!(h.remote.writes().len(), writes);
}

#[tokio::test]
async fn save_while_offline_reports_target_and_stays_unbound() {
    let h = harness();
    h.remote.set_connected(false);
    let user = Arc::new(Entity::with_id(user_schema(), "alice"));

    let err = h.engine.save(&user).await.unwrap_err();
    assert_eq!(err.reference, Some(DataRef::new("v1/user/alice")));
    assert!(matches!(err.source, SyncError::NotConnected));
    assert!(!user.is_bound());

    // The precondition still holds, so a retry succeeds.
    h.remote.set_connected(true);
    h.engine.save(&user).await.unwrap();
    assert!(user.is_bound());
}

#[tokio::test]
async fn relation_change_emits_one_patch_per_changed_member() {
    let h = harness();
    let user = Arc::new(Entity::with_id(user_schema(), "alice"));
    user.set("friends", members(&["a", "b"])).unwrap();
    h.engine.save(&user).await.unwrap();
    h.remote.clear_writes();

    user.set("friends", members(&["b", "c"])).unwrap();
    h.engine.flush().await;

    let updates = h.remote.updates();
    assert_eq!(updates.len(), 2);

    let added: Vec<_> = updates
        .iter()
        .filter(|(_, p)| p.get("friends/c") == Some(&Value::Bool(true)))
        .collect();
    let removed: Vec<_> = updates
        .iter()
        .filter(|(_, p)| p.get("friends/a") == Some(&Value::Null))
        .collect();
    assert_eq!(added.len(), 1);
    assert_eq!(removed.len(), 1);
    for (_, patch) in &updates {
        assert!(patch.iter().all(|(path, _)| !path.contains("/b")));
        assert_eq!(patch.get(UPDATED_AT_KEY), Some(&Value::ServerTimestamp));
    }

    let friends = h
        .remote
        .value_at(&DataRef::new("v1/user/alice/friends"))
        .unwrap();
    assert_eq!(friends, Value::from(json!({ "b": true, "c": true })));
}

#[tokio::test]
async fn reapplied_snapshots_do_not_duplicate_patches() {
    let h = harness();
    let user = Arc::new(Entity::with_id(user_schema(), "alice"));
    user.set("name", "Alice").unwrap();
    let reference = h.engine.save(&user).await.unwrap();
    let observed = user.observed_field_count();

    for _ in 0..3 {
        let snapshot = h.remote.observe_once(&reference).await.unwrap();
        let report = h.engine.apply_remote(&user, &snapshot);
        assert!(!report.newly_bound);
    }
    assert_eq!(user.observed_field_count(), observed);
    h.remote.clear_writes();

    user.set("name", "Alicia").unwrap();
    h.engine.flush().await;

    let updates = h.remote.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].1.get("name"), Some(&Value::from("Alicia")));
}

#[tokio::test]
async fn remote_snapshot_refreshes_fields_silently() {
    let h = harness();
    let user = Arc::new(Entity::with_id(user_schema(), "alice"));
    let reference = h.engine.save(&user).await.unwrap();
    h.remote.clear_writes();

    h.remote.seed(
        &reference,
        Value::from(json!({ "name": "From elsewhere", "tags": ["x", "y"], "_updatedAt": 5_000 })),
    );
    let snapshot = h.remote.observe_once(&reference).await.unwrap();
    h.engine.apply_remote(&user, &snapshot);
    h.engine.flush().await;

    assert_eq!(user.get_string("name").as_deref(), Some("From elsewhere"));
    assert_eq!(user.get_string_array("tags"), ["x", "y"]);
    assert_eq!(user.updated_at().timestamp_millis(), 5_000);
    assert!(h.remote.writes().is_empty());
}

#[tokio::test]
async fn load_binds_stored_entity() {
    let h = harness();
    h.remote.seed(
        &DataRef::new("v1/user/bob"),
        Value::from(json!({
            "name": "Bob",
            "age": 41,
            "friends": { "alice": true },
            "avatar": "bob.png",
            "_createdAt": 1_000,
            "_updatedAt": 2_000,
        })),
    );

    let bob = h.engine.load(&user_schema(), "bob").await.unwrap().unwrap();
    assert!(bob.is_bound());
    assert_eq!(bob.id(), "bob");
    assert_eq!(bob.get_integer("age"), Some(41));
    assert_eq!(bob.get_relation("friends"), members(&["alice"]));
    assert_eq!(bob.get_attachment("avatar").unwrap().name(), "bob.png");
    assert_eq!(bob.created_at().timestamp_millis(), 1_000);

    bob.set("age", 42i64).unwrap();
    h.engine.flush().await;
    let doc = h.remote.value_at(&DataRef::new("v1/user/bob")).unwrap();
    assert_eq!(doc.get("age"), Some(&Value::Integer(42)));

    // Saving a loaded entity is rejected.
    let err = h.engine.save(&bob).await.unwrap_err();
    assert!(matches!(err.source, SyncError::InvalidId { .. }));
}

#[tokio::test]
async fn remove_deletes_document() {
    let h = harness();
    let user = Arc::new(Entity::with_id(user_schema(), "alice"));
    user.set("name", "Alice").unwrap();
    let reference = h.engine.save(&user).await.unwrap();

    h.engine.remove(&user).await.unwrap();
    assert!(h.remote.value_at(&reference).is_none());
    assert!(matches!(
        h.remote.writes().last(),
        Some(WriteRecord::Remove { reference: removed }) if *removed == reference
    ));
}

#[tokio::test]
async fn completion_reports_offline_patch_failure() {
    let h = harness();
    let user = Arc::new(Entity::with_id(user_schema(), "alice"));
    h.engine.save(&user).await.unwrap();
    h.remote.set_connected(false);

    let (tx, rx) = oneshot::channel();
    h.engine
        .set_with_completion(&user, "name", "Offline", move |reference, result| {
            let _ = tx.send((reference, result));
        })
        .unwrap();

    let (reference, result) = rx.await.unwrap();
    assert_eq!(reference, DataRef::new("v1/user/alice"));
    assert!(matches!(result, Err(SyncError::NotConnected)));
    assert_eq!(user.get_string("name").as_deref(), Some("Offline"));
}

#[tokio::test]
async fn completion_reports_successful_patch() {
    let h = harness();
    let user = Arc::new(Entity::with_id(user_schema(), "alice"));
    h.engine.save(&user).await.unwrap();

    let (tx, rx) = oneshot::channel();
    h.engine
        .set_with_completion(&user, "age", 31i64, move |_, result| {
            let _ = tx.send(result.is_ok());
        })
        .unwrap();
    assert!(rx.await.unwrap());

    let doc = h.remote.value_at(&DataRef::new("v1/user/alice")).unwrap();
    assert_eq!(doc.get("age"), Some(&Value::Integer(31)));
}

#[tokio::test]
async fn save_uploads_attachments_and_writes_names() {
    let h = harness();
    let user = Arc::new(Entity::with_id(user_schema(), "alice"));
    user.set("avatar", Attachment::with_payload("alice.png", vec![0x89u8, 0x50]))
        .unwrap();

    h.engine.save(&user).await.unwrap();

    assert_eq!(h.attachments.completed(), ["alice.png"]);
    let doc = h.remote.value_at(&DataRef::new("v1/user/alice")).unwrap();
    assert_eq!(doc.get("avatar"), Some(&Value::from("alice.png")));

    let avatar = user.get_attachment("avatar").unwrap();
    let binding = avatar.binding().unwrap();
    assert_eq!((binding.entity_id.as_str(), binding.field.as_str()), ("alice", "avatar"));
}

#[tokio::test(start_paused = true)]
async fn failed_upload_cancels_siblings() {
    let h = harness();
    h.attachments.set_delay("one.jpg", Duration::from_millis(300));
    h.attachments.set_delay("two.jpg", Duration::from_millis(50));
    h.attachments.fail("two.jpg", "storage quota exceeded");
    h.attachments.set_delay("three.jpg", Duration::from_millis(300));

    let album = Arc::new(Entity::with_id(album_schema(), "trip"));
    album.set("title", "Trip").unwrap();
    album.set("photo1", Attachment::with_payload("one.jpg", vec![1u8])).unwrap();
    album.set("photo2", Attachment::with_payload("two.jpg", vec![2u8])).unwrap();
    album.set("photo3", Attachment::with_payload("three.jpg", vec![3u8])).unwrap();

    let err = h.engine.save(&album).await.unwrap_err();

    assert_eq!(err.reference, Some(DataRef::new("v1/album/trip")));
    assert!(matches!(err.source, SyncError::Upload { ref name, .. } if name == "two.jpg"));
    assert_eq!(sorted(h.attachments.started()), ["one.jpg", "three.jpg", "two.jpg"]);
    assert_eq!(sorted(h.attachments.cancelled()), ["one.jpg", "three.jpg"]);
    assert!(h.attachments.completed().is_empty());

    // Committed fields are not rolled back.
    assert!(album.is_bound());
    let doc = h.remote.value_at(&DataRef::new("v1/album/trip")).unwrap();
    assert_eq!(doc.get("title"), Some(&Value::from("Trip")));
}

#[tokio::test(start_paused = true)]
async fn upload_deadline_cancels_every_task() {
    let h = harness();
    h.attachments.set_default_delay(Duration::from_secs(10));

    let album = Arc::new(Entity::with_id(album_schema(), "slow"));
    album.set("photo1", Attachment::with_payload("one.jpg", vec![1u8])).unwrap();
    album.set("photo2", Attachment::with_payload("two.jpg", vec![2u8])).unwrap();
    album.set("photo3", Attachment::with_payload("three.jpg", vec![3u8])).unwrap();

    let started = tokio::time::Instant::now();
    let err = h.engine.save(&album).await.unwrap_err();

    assert!(matches!(err.source, SyncError::Timeout));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(4) && elapsed < Duration::from_secs(5));
    assert_eq!(sorted(h.attachments.cancelled()), ["one.jpg", "three.jpg", "two.jpg"]);
    assert!(h.attachments.completed().is_empty());
}

#[tokio::test(start_paused = true)]
async fn upload_deadline_is_configurable() {
    let h = harness_with(SyncConfig::new().with_upload_timeout(Duration::from_secs(30)));
    h.attachments.set_default_delay(Duration::from_secs(10));

    let album = Arc::new(Entity::with_id(album_schema(), "patient"));
    album.set("photo1", Attachment::with_payload("one.jpg", vec![1u8])).unwrap();

    h.engine.save(&album).await.unwrap();
    assert_eq!(h.attachments.completed(), ["one.jpg"]);
}

#[tokio::test]
async fn attachment_without_payload_is_invalid_file() {
    let h = harness();
    let user = Arc::new(Entity::with_id(user_schema(), "alice"));
    user.set("avatar", Attachment::new("missing.png")).unwrap();

    let err = h.engine.save(&user).await.unwrap_err();
    assert!(matches!(err.source, SyncError::InvalidFile { ref name } if name == "missing.png"));
}

#[tokio::test(start_paused = true)]
async fn replacing_attachment_removes_previous() {
    let h = harness();
    let user = Arc::new(Entity::with_id(user_schema(), "alice"));
    user.set("avatar", Attachment::with_payload("v1.png", vec![1u8])).unwrap();
    h.engine.save(&user).await.unwrap();

    let (tx, rx) = oneshot::channel();
    h.engine
        .set_with_completion(
            &user,
            "avatar",
            Attachment::with_payload("v2.png", vec![2u8]),
            move |_, result| {
                let _ = tx.send(result.is_ok());
            },
        )
        .unwrap();
    assert!(rx.await.unwrap());
    run_background().await;

    assert!(h.attachments.contains("v2.png"));
    assert!(!h.attachments.contains("v1.png"));
    assert_eq!(h.attachments.removed(), ["v1.png"]);
    let doc = h.remote.value_at(&DataRef::new("v1/user/alice")).unwrap();
    assert_eq!(doc.get("avatar"), Some(&Value::from("v2.png")));
}

#[tokio::test]
async fn last_scalar_write_wins() {
    let h = harness();
    let user = Arc::new(Entity::with_id(user_schema(), "alice"));
    h.engine.save(&user).await.unwrap();
    h.remote.clear_writes();

    user.set("name", "Bob").unwrap();
    user.set("name", "Carol").unwrap();
    h.engine.flush().await;

    let names: Vec<_> = h
        .remote
        .updates()
        .into_iter()
        .filter_map(|(_, patch)| patch.get("name").cloned())
        .collect();
    assert_eq!(names, [Value::from("Bob"), Value::from("Carol")]);
    let doc = h.remote.value_at(&DataRef::new("v1/user/alice")).unwrap();
    assert_eq!(doc.get("name"), Some(&Value::from("Carol")));
}

#[tokio::test(start_paused = true)]
async fn last_attachment_replacement_wins() {
    let h = harness();
    let user = Arc::new(Entity::with_id(user_schema(), "alice"));
    user.set("avatar", Attachment::with_payload("v1.png", vec![1u8])).unwrap();
    h.engine.save(&user).await.unwrap();
    h.remote.clear_writes();

    h.attachments.set_delay("slow.png", Duration::from_secs(2));
    user.set("avatar", Attachment::with_payload("slow.png", vec![2u8])).unwrap();
    user.set("avatar", Attachment::with_payload("fast.png", vec![3u8])).unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    h.engine.flush().await;
    run_background().await;

    let doc = h.remote.value_at(&DataRef::new("v1/user/alice")).unwrap();
    assert_eq!(doc.get("avatar"), Some(&Value::from("fast.png")));
    assert_eq!(user.get_attachment("avatar").unwrap().name(), "fast.png");

    assert!(h.attachments.contains("fast.png"));
    assert!(!h.attachments.contains("slow.png"));
    assert!(!h.attachments.contains("v1.png"));
    assert_eq!(sorted(h.attachments.removed()), ["slow.png", "v1.png"]);

    let written: Vec<_> = h
        .remote
        .updates()
        .into_iter()
        .filter_map(|(_, patch)| patch.get("avatar").cloned())
        .collect();
    assert_eq!(written, [Value::from("fast.png")]);
}

#[tokio::test(start_paused = true)]
async fn clearing_attachment_removes_stored_payload() {
    let h = harness();
    let user = Arc::new(Entity::with_id(user_schema(), "alice"));
    user.set("avatar", Attachment::with_payload("v1.png", vec![1u8])).unwrap();
    h.engine.save(&user).await.unwrap();

    user.set("avatar", TaggedValue::Null).unwrap();
    h.engine.flush().await;
    run_background().await;

    let doc = h.remote.value_at(&DataRef::new("v1/user/alice")).unwrap();
    assert!(doc.get("avatar").is_none());
    assert!(!h.attachments.contains("v1.png"));
    assert_eq!(h.attachments.removed(), ["v1.png"]);
}

#[tokio::test]
async fn save_rejects_nested_caller_key() {
    let h = harness();
    let user = Arc::new(Entity::with_id(user_schema(), "team/alice"));
    user.set("name", "Alice").unwrap();

    let err = h.engine.save(&user).await.unwrap_err();
    assert!(matches!(err.source, SyncError::InvalidId { .. }));
    assert!(err.reference.is_none());
    assert!(h.remote.writes().is_empty());
    assert!(!user.is_bound());
}

#[tokio::test]
async fn teardown_stops_propagation() {
    let h = harness();
    let user = Arc::new(Entity::with_id(user_schema(), "alice"));
    h.engine.save(&user).await.unwrap();
    h.remote.clear_writes();

    assert!(user.teardown());
    assert!(!user.teardown());
    assert_eq!(user.observed_field_count(), 0);

    user.set("name", TaggedValue::from("unsynced")).unwrap();
    h.engine.flush().await;
    assert!(h.remote.writes().is_empty());
}

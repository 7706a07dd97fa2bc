//! Durable store integration tests
//!
//! Covers id assignment and preservation, duplicate-key rejection, the
//! permissive upsert on update, the atomic full-replace commit, and the
//! settings document round-trip.

mod common;

use common::{sample_activity, TestContext};
use dailylog_lib::db::{
    ActivityPatch, ActivityType, Person, SettingsDocument, StoreError,
};

#[tokio::test]
async fn test_add_assigns_id_and_get_preserves_record() {
    let tc = TestContext::new();

    let record = sample_activity("", "Teacher", "Chanting");
    let id = {
        let record = record.clone();
        tc.ctx
            .store
            .run(move |db| db.add_activity(&record))
            .await
            .unwrap()
    };
    assert!(!id.is_empty());

    let fetch_id = id.clone();
    let fetched = tc
        .ctx
        .store
        .run(move |db| db.get_activity(&fetch_id))
        .await
        .unwrap()
        .expect("record present");

    assert_eq!(fetched.id, id);
    assert_eq!(fetched.person, record.person);
    assert_eq!(fetched.activity_name, record.activity_name);
    assert_eq!(fetched.details, record.details);
}

#[tokio::test]
async fn test_add_keeps_caller_id() {
    let tc = TestContext::new();

    let id = tc
        .ctx
        .store
        .run(|db| db.add_activity(&common::sample_activity("fixed-id", "A", "X")))
        .await
        .unwrap();
    assert_eq!(id, "fixed-id");
}

#[tokio::test]
async fn test_add_rejects_duplicate_id() {
    let tc = TestContext::new();

    tc.ctx
        .store
        .run(|db| db.add_activity(&common::sample_activity("dup", "A", "X")))
        .await
        .unwrap();

    let err = tc
        .ctx
        .store
        .run(|db| db.add_activity(&common::sample_activity("dup", "B", "Y")))
        .await
        .unwrap_err();

    assert!(
        matches!(
            err,
            dailylog_lib::db::DbExecutorError::Store(StoreError::DuplicateKey(ref id)) if id == "dup"
        ),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn test_update_merges_patch_and_preserves_id() {
    let tc = TestContext::new();

    tc.ctx
        .store
        .run(|db| db.add_activity(&common::sample_activity("1", "A", "Chanting")))
        .await
        .unwrap();

    let patch = ActivityPatch {
        details: Some("edited".into()),
        ..Default::default()
    };
    tc.ctx
        .store
        .run(move |db| db.update_activity("1", &patch))
        .await
        .unwrap();

    let updated = tc
        .ctx
        .store
        .run(|db| db.get_activity("1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.id, "1");
    assert_eq!(updated.details, "edited");
    // untouched fields survive the patch
    assert_eq!(updated.person, "A");
    assert_eq!(updated.activity_name, "Chanting");
}

#[tokio::test]
async fn test_update_missing_record_upserts() {
    let tc = TestContext::new();

    let patch = ActivityPatch {
        person: Some("Ghost".into()),
        ..Default::default()
    };
    tc.ctx
        .store
        .run(move |db| db.update_activity("missing", &patch))
        .await
        .unwrap();

    let record = tc
        .ctx
        .store
        .run(|db| db.get_activity("missing"))
        .await
        .unwrap()
        .expect("upserted");
    assert_eq!(record.id, "missing");
    assert_eq!(record.person, "Ghost");
}

#[tokio::test]
async fn test_delete_is_noop_when_absent() {
    let tc = TestContext::new();

    tc.ctx
        .store
        .run(|db| db.delete_activity("nothing-here"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_replace_activities_swaps_whole_collection() {
    let tc = TestContext::new();

    for i in 0..3 {
        let record = sample_activity(&format!("old-{i}"), "A", "X");
        tc.ctx
            .store
            .run(move |db| db.add_activity(&record))
            .await
            .unwrap();
    }

    let replacement = vec![
        sample_activity("new-1", "B", "Y"),
        sample_activity("new-2", "B", "Y"),
    ];
    tc.ctx
        .store
        .run(move |db| db.replace_activities(&replacement))
        .await
        .unwrap();

    let all = tc.ctx.store.run(|db| db.list_activities()).await.unwrap();
    let mut ids: Vec<String> = all.iter().map(|r| r.id.clone()).collect();
    ids.sort();
    assert_eq!(ids, vec!["new-1", "new-2"]);
}

#[tokio::test]
async fn test_config_roundtrip_and_default() {
    let tc = TestContext::new();

    let initial = tc.ctx.store.run(|db| db.load_config()).await.unwrap();
    assert_eq!(initial, SettingsDocument::default());

    let config = SettingsDocument {
        persons: vec![Person { name: "A".into() }],
        activity_types: vec![ActivityType { name: "X".into() }],
        backup_password: Some("secret".into()),
    };
    let saved = config.clone();
    tc.ctx
        .store
        .run(move |db| db.save_config(&saved))
        .await
        .unwrap();

    let loaded = tc.ctx.store.run(|db| db.load_config()).await.unwrap();
    assert_eq!(loaded, config);
}

#[tokio::test]
async fn test_open_is_idempotent() {
    let tc = TestContext::new();
    tc.ctx
        .store
        .run(|db| db.add_activity(&common::sample_activity("persisted", "A", "X")))
        .await
        .unwrap();
    let path = tc.temp_dir.path().to_path_buf();
    drop(tc.ctx);

    // Reopen over the same directory; schema setup must not disturb data.
    let ctx = dailylog_lib::AppContext::open(&path).unwrap();
    let all = ctx.store.run(|db| db.list_activities()).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, "persisted");
}

#[tokio::test]
async fn test_delete_activities_by_date() {
    let tc = TestContext::new();

    let mut a = sample_activity("1", "A", "X");
    a.date = "2026-01-01".into();
    let mut b = sample_activity("2", "A", "X");
    b.date = "2026-01-02".into();
    for record in [a, b] {
        tc.ctx
            .store
            .run(move |db| db.add_activity(&record))
            .await
            .unwrap();
    }

    let removed = tc
        .ctx
        .store
        .run(|db| db.delete_activities_by_date("2026-01-01"))
        .await
        .unwrap();
    assert_eq!(removed, 1);

    let all = tc.ctx.store.run(|db| db.list_activities()).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].date, "2026-01-02");
}

#[tokio::test]
async fn test_cleanup_duplicate_activities() {
    let tc = TestContext::new();

    // two identical sessions under different ids plus one distinct record
    for (id, start) in [("1", "07:00"), ("2", "07:00"), ("3", "09:00")] {
        let mut record = sample_activity(id, "A", "X");
        record.start_time = start.into();
        tc.ctx
            .store
            .run(move |db| db.add_activity(&record))
            .await
            .unwrap();
    }

    let removed = tc
        .ctx
        .store
        .run(|db| db.cleanup_duplicate_activities())
        .await
        .unwrap();
    assert_eq!(removed, 1);

    let all = tc.ctx.store.run(|db| db.list_activities()).await.unwrap();
    assert_eq!(all.len(), 2);
}

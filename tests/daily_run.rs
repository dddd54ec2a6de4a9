use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

use expiry_countdown::error::Error;
use expiry_countdown::notifications::notification_id;
use expiry_countdown::prelude::*;
use expiry_countdown::push::REGISTRATION_TOKEN_NOT_REGISTERED;
use expiry_countdown::store::ItemRecord;

/// 2024-03-01 09:00 in Bangkok
fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 2, 0, 0).unwrap()
}

fn typed_item(path: &str, family_id: &str, quantity: f64, expiry: DateTime<Utc>) -> ItemRecord {
    ItemRecord {
        path: path.to_string(),
        family_id: Some(family_id.to_string()),
        name: Some("Milk".to_string()),
        quantity: Some(quantity),
        expiry_ts: Some(expiry),
        created_at: Some(now() - Duration::days(5)),
        ..ItemRecord::default()
    }
}

fn legacy_item(path: &str, family_id: &str, quantity: f64, expiry: &str) -> ItemRecord {
    ItemRecord {
        path: path.to_string(),
        family_id: Some(family_id.to_string()),
        name: Some("Eggs".to_string()),
        quantity: Some(quantity),
        expiry_date: Some(expiry.to_string()),
        created_at: Some(now() - Duration::hours(1)),
        ..ItemRecord::default()
    }
}

async fn household(backend: &MemoryBackend, family_id: &str, members: &[&str]) {
    for uid in members {
        backend.add_member(family_id, uid).await;
        backend.add_collection_token(uid, &format!("{}-phone", uid)).await;
    }
}

fn runner(backend: &Arc<MemoryBackend>) -> DailyRunner {
    DailyRunner::new(&Backend::from_shared(backend.clone()), &ServiceConfig::default())
}

#[tokio::test]
async fn two_day_item_notifies_every_member_once() {
    let backend = Arc::new(MemoryBackend::new());
    household(&backend, "fam-h", &["u1", "u2"]).await;
    let path = "users/u1/raw_materials/x";
    backend
        .add_item(typed_item(path, "fam-h", 5.0, now() + Duration::days(2)))
        .await;

    let summary = runner(&backend).run_once(now()).await.unwrap();

    assert_eq!(summary.candidates, 1);
    assert_eq!(summary.eligible, 1);
    assert_eq!(summary.notified, 2);
    assert_eq!(summary.created, 2);
    assert_eq!(summary.failed, 0);

    let records = backend.notifications().await;
    assert_eq!(records.len(), 2);
    for record in &records {
        assert_eq!(record.days_left, 2);
        assert_eq!(record.level, "in_2");
        assert_eq!(record.kind, "expiry_countdown");
        assert_eq!(record.ref_path, path);
        assert_eq!(record.read, Some(false));
        assert_eq!(record.id, notification_id(&record.to_uid, path, 2));
    }
    assert_eq!(backend.sent_messages().await.len(), 2);
}

#[tokio::test]
async fn summary_is_stamped_with_completion_time() {
    let backend = Arc::new(MemoryBackend::new());
    let started = Utc::now();

    let summary = runner(&backend).run_once(now()).await.unwrap();

    let finished_at = summary.finished_at.unwrap();
    assert!(finished_at >= started);
    assert!(finished_at <= Utc::now());
}

#[tokio::test]
async fn rerun_on_the_same_day_only_refreshes() {
    let backend = Arc::new(MemoryBackend::new());
    household(&backend, "fam-h", &["u1", "u2"]).await;
    backend
        .add_item(typed_item("users/u1/raw_materials/x", "fam-h", 5.0, now() + Duration::days(2)))
        .await;
    let runner = runner(&backend);

    runner.run_once(now()).await.unwrap();
    let first = backend.notifications().await;
    let opened = &first[0];
    backend.mark_read(&opened.family_id, &opened.id).await;

    let later = now() + Duration::hours(4);
    let summary = runner.run_once(later).await.unwrap();
    assert_eq!(summary.created, 0);
    assert_eq!(summary.refreshed, 2);

    let second = backend.notifications().await;
    assert_eq!(second.len(), 2);
    for (before, after) in first.iter().zip(&second) {
        assert_eq!(before.id, after.id);
        assert_eq!(before.created_at, after.created_at);
        assert_eq!(before.title, after.title);
        assert_eq!(before.body, after.body);
        assert_eq!(after.updated_at, later);
    }
    let reopened = backend.notification(&opened.family_id, &opened.id).await.unwrap();
    assert_eq!(reopened.read, Some(true));
}

#[tokio::test]
async fn legacy_string_item_is_found_by_fallback() {
    let backend = Arc::new(MemoryBackend::new());
    household(&backend, "fam-y", &["u3", "u4"]).await;
    backend
        .add_item(legacy_item("users/u3/raw_materials/y", "fam-y", 3.0, "2024-03-02"))
        .await;

    let summary = runner(&backend).run_once(now()).await.unwrap();

    assert_eq!(summary.from_range, 0);
    assert_eq!(summary.from_fallback, 1);
    assert_eq!(summary.notified, 2);
    let records = backend.notifications().await;
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.days_left == 1 && r.level == "in_1"));
}

#[tokio::test]
async fn ineligible_items_are_skipped_not_failed() {
    let backend = Arc::new(MemoryBackend::new());
    household(&backend, "fam-h", &["u1"]).await;
    backend
        .add_item(typed_item("users/u1/raw_materials/empty", "fam-h", 0.0, now() + Duration::days(1)))
        .await;
    backend
        .add_item(typed_item("users/u1/raw_materials/today", "fam-h", 1.0, now() + Duration::hours(2)))
        .await;
    backend
        .add_item(legacy_item("users/u1/raw_materials/garbled", "fam-h", 1.0, "someday"))
        .await;

    let summary = runner(&backend).run_once(now()).await.unwrap();

    assert_eq!(summary.candidates, 3);
    assert_eq!(summary.eligible, 0);
    assert_eq!(summary.skipped, 3);
    assert_eq!(summary.failed, 0);
    assert_eq!(backend.notification_count().await, 0);
}

#[tokio::test]
async fn household_members_are_looked_up_once_per_run() {
    let backend = Arc::new(MemoryBackend::new());
    household(&backend, "fam-h", &["u1", "u2"]).await;
    for name in ["a", "b", "c"] {
        backend
            .add_item(typed_item(
                &format!("users/u1/raw_materials/{}", name),
                "fam-h",
                1.0,
                now() + Duration::days(1),
            ))
            .await;
    }
    // Sequential, so concurrent first lookups cannot race
    let config = ServiceConfig::default().with_max_concurrency(1);
    let runner = DailyRunner::new(&Backend::from_shared(backend.clone()), &config);

    let summary = runner.run_once(now()).await.unwrap();
    assert_eq!(summary.notified, 6);
    assert_eq!(backend.member_lookups().await, 1);

    runner.run_once(now()).await.unwrap();
    assert_eq!(backend.member_lookups().await, 2);
}

#[tokio::test]
async fn one_failing_member_or_household_does_not_stop_the_run() {
    let backend = Arc::new(MemoryBackend::new());
    household(&backend, "fam-h", &["u1", "u2"]).await;
    household(&backend, "fam-broken", &["u9"]).await;
    backend
        .add_item(typed_item("users/u1/raw_materials/x", "fam-h", 1.0, now() + Duration::days(2)))
        .await;
    backend
        .add_item(typed_item("users/u9/raw_materials/z", "fam-broken", 1.0, now() + Duration::days(1)))
        .await;
    backend.fail_notification_writes_to("u1").await;
    backend.fail_members_of("fam-broken").await;

    let summary = runner(&backend).run_once(now()).await.unwrap();

    assert_eq!(summary.eligible, 2);
    assert_eq!(summary.notified, 1);
    assert_eq!(summary.failed, 2);
    let records = backend.notifications().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].to_uid, "u2");
}

#[tokio::test]
async fn push_outage_keeps_records() {
    let backend = Arc::new(MemoryBackend::new());
    household(&backend, "fam-h", &["u1", "u2"]).await;
    backend
        .add_item(typed_item("users/u1/raw_materials/x", "fam-h", 1.0, now() + Duration::days(1)))
        .await;
    backend.fail_push(true).await;

    let summary = runner(&backend).run_once(now()).await.unwrap();

    assert_eq!(summary.notified, 2);
    assert_eq!(summary.push_failures, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(backend.notification_count().await, 2);
}

#[tokio::test]
async fn unregistered_token_is_pruned_during_a_run() {
    let backend = Arc::new(MemoryBackend::new());
    backend.add_member("fam-h", "u1").await;
    backend.add_collection_token("u1", "phone").await;
    backend.add_map_token("u1", "tablet").await;
    backend.add_map_token("u1", "old-phone").await;
    backend.reject_token("old-phone", REGISTRATION_TOKEN_NOT_REGISTERED).await;
    backend
        .add_item(typed_item("users/u1/raw_materials/x", "fam-h", 1.0, now() + Duration::days(1)))
        .await;

    runner(&backend).run_once(now()).await.unwrap();

    assert_eq!(backend.collection_tokens_of("u1").await, vec!["phone"]);
    assert_eq!(backend.map_tokens_of("u1").await, vec!["tablet"]);
}

#[tokio::test]
async fn member_without_devices_gets_a_record_but_no_push() {
    let backend = Arc::new(MemoryBackend::new());
    backend.add_member("fam-h", "u1").await;
    backend
        .add_item(typed_item("users/u1/raw_materials/x", "fam-h", 1.0, now() + Duration::days(1)))
        .await;

    let summary = runner(&backend).run_once(now()).await.unwrap();

    assert_eq!(summary.notified, 1);
    assert_eq!(summary.push_failures, 0);
    assert!(backend.sent_messages().await.is_empty());
}

#[tokio::test]
async fn run_aborts_only_when_both_queries_fail() {
    let backend = Arc::new(MemoryBackend::new());
    backend.fail_range_query(true).await;
    assert!(runner(&backend).run_once(now()).await.is_ok());

    backend.fail_fallback_query(true).await;
    assert!(matches!(
        runner(&backend).run_once(now()).await,
        Err(Error::Scan(_))
    ));
}

fn sampler(backend: &Arc<MemoryBackend>) -> SampleInvocation {
    SampleInvocation::new(&Backend::from_shared(backend.clone()), &ServiceConfig::default())
}

fn sample_request(family_id: Option<&str>, days_left: Option<serde_json::Value>) -> SampleRequest {
    SampleRequest {
        family_id: family_id.map(str::to_string),
        days_left,
        item_name: None,
    }
}

#[tokio::test]
async fn sample_push_reaches_the_whole_household() {
    let backend = Arc::new(MemoryBackend::new());
    household(&backend, "fam-h", &["u1", "u2"]).await;

    let response = sampler(&backend)
        .push_sample(Some("u1"), &sample_request(Some("fam-h"), Some(serde_json::json!(7))), now())
        .await
        .unwrap();

    assert_eq!(
        response,
        SampleResponse {
            ok: true,
            family_id: "fam-h".to_string(),
            days_left: 2,
            recipients: 2,
        }
    );
    let records = backend.notifications().await;
    assert_eq!(records.len(), 2);
    let expected_path = format!("families/fam-h/samples/{}", now().timestamp_millis());
    assert!(records.iter().all(|r| r.ref_path == expected_path));
    assert!(records.iter().all(|r| r.body.starts_with("ตัวอย่างวัตถุดิบ")));
    assert_eq!(backend.sent_messages().await.len(), 2);
}

#[tokio::test]
async fn sample_push_validates_the_caller() {
    let backend = Arc::new(MemoryBackend::new());
    household(&backend, "fam-h", &["u1"]).await;
    let sampler = sampler(&backend);

    assert_eq!(
        sampler
            .push_sample(None, &sample_request(Some("fam-h"), None), now())
            .await,
        Err(SampleError::Unauthenticated)
    );
    assert!(matches!(
        sampler.push_sample(Some("u1"), &sample_request(Some("  "), None), now()).await,
        Err(SampleError::InvalidArgument(_))
    ));
    assert!(matches!(
        sampler.push_sample(Some("stranger"), &sample_request(Some("fam-h"), None), now()).await,
        Err(SampleError::PermissionDenied(_))
    ));
    assert_eq!(backend.notification_count().await, 0);
}

//! Retry coordinator tests: rescheduling, immediate redelivery, and the
//! retry bound.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use libsyndica::platforms::mock::MockPublisher;
use libsyndica::platforms::PublisherRegistry;
use libsyndica::types::PlatformCredential;
use libsyndica::vault::Params;
use libsyndica::{Post, PostStatus, RetryCoordinator, Store, Vault};

fn at(s: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .unwrap()
        .and_utc()
}

fn post_at(user: &str, date: &str, time: &str) -> Post {
    Post::new(
        user,
        "hello fediverse",
        "mock",
        NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
        NaiveTime::parse_from_str(time, "%H:%M:%S").unwrap(),
    )
}

fn test_vault() -> Vault {
    Vault::with_params(
        "integration-master-key",
        Params::new(8, 1, 1, Some(32)).unwrap(),
    )
    .unwrap()
}

async fn seed_credential(store: &Store, vault: &Vault, user_id: &str, secret: &str) {
    let row = PlatformCredential {
        id: None,
        user_id: user_id.to_string(),
        platform: "mock".to_string(),
        encrypted_secret: vault.encrypt(secret).unwrap(),
        encrypted_refresh_token: None,
        expires_at: None,
        active: true,
        last_used_at: None,
        created_at: 1_700_000_000,
    };
    store.insert_credential(&row).await.unwrap();
}

async fn failed_post(store: &Store, user: &str, date: &str, time: &str) -> Post {
    let post = post_at(user, date, time);
    store.create_post(&post).await.unwrap();
    store
        .mark_failed(&post.id, PostStatus::Scheduled, "boom", at("2024-01-01 00:00:00"))
        .await
        .unwrap();
    post
}

fn coordinator_with(
    store: &Store,
    vault: Vault,
    publisher: MockPublisher,
    max_retries: u32,
) -> (RetryCoordinator, Arc<std::sync::Mutex<usize>>) {
    let (calls, _) = publisher.handles();
    let mut registry = PublisherRegistry::new();
    registry.register(Arc::new(publisher));
    (
        RetryCoordinator::new(store.clone(), Arc::new(vault), Arc::new(registry), max_retries),
        calls,
    )
}

#[tokio::test]
async fn not_yet_due_post_is_rescheduled_without_adapter_traffic() {
    let store = Store::open_in_memory().await.unwrap();
    let vault = test_vault();
    seed_credential(&store, &vault, "u1", "mock-token").await;

    let post = failed_post(&store, "u1", "2024-06-01", "10:00:00").await;
    let (coordinator, calls) = coordinator_with(&store, vault, MockPublisher::success("mock"), 3);

    let summary = coordinator
        .retry_failed_posts(at("2024-01-02 10:00:00"), None)
        .await
        .unwrap();

    assert_eq!(summary.retried, vec![post.id.clone()]);
    assert!(summary.still_failed.is_empty());
    assert_eq!(*calls.lock().unwrap(), 0);

    let stored = store.get_post(&post.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PostStatus::Scheduled);
    assert_eq!(stored.retry_count, 1);
}

#[tokio::test]
async fn overdue_post_gets_an_immediate_delivery_attempt() {
    let store = Store::open_in_memory().await.unwrap();
    let vault = test_vault();
    seed_credential(&store, &vault, "u1", "mock-token").await;

    let post = failed_post(&store, "u1", "2024-01-01", "10:00:00").await;
    let (coordinator, calls) = coordinator_with(&store, vault, MockPublisher::success("mock"), 3);

    let summary = coordinator
        .retry_failed_posts(at("2024-01-02 10:00:00"), None)
        .await
        .unwrap();

    assert_eq!(summary.retried, vec![post.id.clone()]);
    assert_eq!(*calls.lock().unwrap(), 1);

    let stored = store.get_post(&post.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PostStatus::Published);
    assert_eq!(stored.retry_count, 1);
}

#[tokio::test]
async fn failing_retry_keeps_the_post_failed_and_records_the_reason() {
    let store = Store::open_in_memory().await.unwrap();
    let vault = test_vault();
    seed_credential(&store, &vault, "u1", "mock-token").await;

    let post = failed_post(&store, "u1", "2024-01-01", "10:00:00").await;
    let (coordinator, calls) = coordinator_with(
        &store,
        vault,
        MockPublisher::publish_failure("mock", "still unreachable"),
        3,
    );

    let summary = coordinator
        .retry_failed_posts(at("2024-01-02 10:00:00"), None)
        .await
        .unwrap();

    assert!(summary.retried.is_empty());
    assert_eq!(summary.still_failed.len(), 1);
    assert_eq!(summary.still_failed[0].0, post.id);
    assert!(summary.still_failed[0].1.contains("still unreachable"));
    assert_eq!(*calls.lock().unwrap(), 1);

    let stored = store.get_post(&post.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PostStatus::Failed);
    assert_eq!(stored.retry_count, 1);
    assert!(stored.last_error.unwrap().contains("still unreachable"));
}

#[tokio::test]
async fn retry_limit_is_enforced() {
    let store = Store::open_in_memory().await.unwrap();
    let vault = test_vault();
    seed_credential(&store, &vault, "u1", "mock-token").await;

    let post = failed_post(&store, "u1", "2024-01-01", "10:00:00").await;
    let now = at("2024-01-02 10:00:00");
    for _ in 0..3 {
        store.increment_retry_count(&post.id, now).await.unwrap();
    }

    let (coordinator, calls) = coordinator_with(&store, vault, MockPublisher::success("mock"), 3);

    let summary = coordinator.retry_failed_posts(now, None).await.unwrap();

    assert!(summary.retried.is_empty());
    assert_eq!(summary.still_failed.len(), 1);
    assert!(summary.still_failed[0].1.contains("retry limit reached (3)"));
    assert_eq!(*calls.lock().unwrap(), 0);

    let stored = store.get_post(&post.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PostStatus::Failed);
    assert_eq!(stored.retry_count, 3);
}

#[tokio::test]
async fn post_id_filter_limits_the_pass() {
    let store = Store::open_in_memory().await.unwrap();
    let vault = test_vault();
    seed_credential(&store, &vault, "u1", "mock-token").await;

    let wanted = failed_post(&store, "u1", "2024-01-01", "10:00:00").await;
    let other = failed_post(&store, "u1", "2024-01-01", "11:00:00").await;

    let (coordinator, _) = coordinator_with(&store, vault, MockPublisher::success("mock"), 3);

    let summary = coordinator
        .retry_failed_posts(at("2024-01-02 10:00:00"), Some(&[wanted.id.clone()]))
        .await
        .unwrap();

    assert_eq!(summary.retried, vec![wanted.id.clone()]);

    let untouched = store.get_post(&other.id).await.unwrap().unwrap();
    assert_eq!(untouched.status, PostStatus::Failed);
    assert_eq!(untouched.retry_count, 0);
}

#[tokio::test]
async fn ids_that_are_not_failed_posts_are_skipped() {
    let store = Store::open_in_memory().await.unwrap();
    let vault = test_vault();
    seed_credential(&store, &vault, "u1", "mock-token").await;

    // Still scheduled, never failed
    let scheduled = post_at("u1", "2024-01-01", "10:00:00");
    store.create_post(&scheduled).await.unwrap();

    let (coordinator, calls) = coordinator_with(&store, vault, MockPublisher::success("mock"), 3);

    let summary = coordinator
        .retry_failed_posts(
            at("2024-01-02 10:00:00"),
            Some(&[scheduled.id.clone(), "no-such-post".to_string()]),
        )
        .await
        .unwrap();

    assert!(summary.retried.is_empty());
    assert!(summary.still_failed.is_empty());
    assert_eq!(*calls.lock().unwrap(), 0);

    let stored = store.get_post(&scheduled.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PostStatus::Scheduled);
}

#[tokio::test]
async fn rescheduled_post_is_published_by_a_later_sweep() {
    use libsyndica::Dispatcher;

    let store = Store::open_in_memory().await.unwrap();
    let vault = test_vault();
    seed_credential(&store, &vault, "u1", "mock-token").await;

    let post = failed_post(&store, "u1", "2024-03-01", "10:00:00").await;

    let publisher = MockPublisher::success("mock");
    let (calls, _) = publisher.handles();
    let mut registry = PublisherRegistry::new();
    registry.register(Arc::new(publisher));
    let vault = Arc::new(vault);
    let registry = Arc::new(registry);

    let coordinator = RetryCoordinator::new(
        store.clone(),
        Arc::clone(&vault),
        Arc::clone(&registry),
        3,
    );
    let dispatcher = Dispatcher::new(store.clone(), vault, registry);

    // Retry while the post is still ahead of its due instant
    coordinator
        .retry_failed_posts(at("2024-01-02 10:00:00"), None)
        .await
        .unwrap();
    assert_eq!(*calls.lock().unwrap(), 0);

    // A sweep after the due instant delivers it
    let summary = dispatcher
        .process_scheduled_posts(at("2024-03-01 10:05:00"))
        .await
        .unwrap();
    assert_eq!(summary.successful, 1);

    let stored = store.get_post(&post.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PostStatus::Published);
    assert_eq!(stored.retry_count, 1);
}

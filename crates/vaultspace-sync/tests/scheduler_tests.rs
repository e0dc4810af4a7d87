//! Integration tests for SyncScheduler

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use vaultspace_cache::{DatabasePool, SqliteMetadataStore};
use vaultspace_core::domain::NodeId;
use vaultspace_core::ports::IMetadataStore;
use vaultspace_core::retry::RetryPolicy;
use vaultspace_core::testing::{DriveOp, InMemoryDrive};
use vaultspace_core::RemoteError;
use vaultspace_stream::ContentCache;
use vaultspace_sync::{EventBus, SyncCoordinator, SyncPhase, SyncScheduler};

async fn setup() -> (Arc<InMemoryDrive>, Arc<SqliteMetadataStore>, Arc<SyncCoordinator>) {
    let pool = DatabasePool::in_memory()
        .await
        .expect("Failed to create in-memory database");
    let store = Arc::new(SqliteMetadataStore::new(pool.pool().clone()));
    let drive = Arc::new(InMemoryDrive::new());
    let coordinator = Arc::new(SyncCoordinator::new(
        drive.clone(),
        store.clone(),
        Arc::new(ContentCache::new(1024)),
        EventBus::new(64),
        RetryPolicy::none(),
    ));
    (drive, store, coordinator)
}

fn backoff() -> RetryPolicy {
    RetryPolicy {
        max_retries: 0,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(10),
    }
}

async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..300 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn has_node(store: &Arc<SqliteMetadataStore>, id: &NodeId) -> bool {
    store.get(id).await.unwrap().is_some()
}

#[tokio::test]
async fn test_first_cycle_runs_immediately() {
    let (drive, store, coordinator) = setup().await;
    let file = drive.remote_add_file(&NodeId::root(), "a.txt", b"a");

    let handle =
        SyncScheduler::new(coordinator.clone(), Duration::from_secs(3600), backoff()).spawn();

    eventually("initial sync", || {
        let store = store.clone();
        let id = file.id.clone();
        async move { has_node(&store, &id).await }
    })
    .await;

    handle.shutdown().await;
    assert_eq!(drive.calls(DriveOp::StartCursor), 1);
}

#[tokio::test]
async fn test_request_sync_wakes_loop() {
    let (drive, store, coordinator) = setup().await;
    let handle =
        SyncScheduler::new(coordinator.clone(), Duration::from_secs(3600), backoff()).spawn();

    eventually("initial sync", || {
        let coordinator = coordinator.clone();
        async move { coordinator.last_report().is_some() }
    })
    .await;

    let file = drive.remote_add_file(&NodeId::root(), "late.txt", b"late");
    handle.request_sync();

    eventually("requested sync", || {
        let store = store.clone();
        let id = file.id.clone();
        async move { has_node(&store, &id).await }
    })
    .await;
    assert!(!handle.is_sync_requested());

    handle.shutdown().await;
    assert_eq!(coordinator.state(), SyncPhase::Idle);
}

#[tokio::test]
async fn test_failed_cycle_backs_off_and_recovers() {
    let (drive, store, coordinator) = setup().await;
    let file = drive.remote_add_file(&NodeId::root(), "a.txt", b"a");
    drive.fail_next(
        DriveOp::StartCursor,
        RemoteError::TransientIo("offline".to_string()),
        1,
    );

    let handle =
        SyncScheduler::new(coordinator.clone(), Duration::from_millis(20), backoff()).spawn();

    eventually("recovery", || {
        let store = store.clone();
        let id = file.id.clone();
        async move { has_node(&store, &id).await }
    })
    .await;

    handle.shutdown().await;
    assert!(drive.calls(DriveOp::StartCursor) >= 2);
    assert!(coordinator.last_error().is_none());
    assert_ne!(coordinator.state(), SyncPhase::Error);
}

#[tokio::test]
async fn test_cancellation_token_stops_loop() {
    let (_drive, _store, coordinator) = setup().await;
    let handle =
        SyncScheduler::new(coordinator.clone(), Duration::from_secs(3600), backoff()).spawn();

    let token = handle.cancellation_token();
    token.cancel();

    tokio::time::timeout(Duration::from_secs(2), handle.shutdown())
        .await
        .expect("scheduler did not stop");
}

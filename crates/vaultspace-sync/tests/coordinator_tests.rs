//! Integration tests for SyncCoordinator
//!
//! Each test wires a coordinator to an `InMemoryDrive` playing the remote
//! side and an in-memory SQLite metadata store.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use vaultspace_cache::{DatabasePool, SqliteMetadataStore};
use vaultspace_core::domain::{
    ByteRange, CacheEntry, ChangeEvent, FileNode, NodeId, RemoteItem, Resolution, RevisionTag,
    SyncState,
};
use vaultspace_core::ports::IMetadataStore;
use vaultspace_core::retry::RetryPolicy;
use vaultspace_core::testing::{DriveOp, InMemoryDrive};
use vaultspace_core::RemoteError;
use vaultspace_stream::ContentCache;
use vaultspace_sync::{EventBus, Subscription, SyncCoordinator, SyncError, SyncPhase};

// ============================================================================
// Test helpers
// ============================================================================

struct Harness {
    drive: Arc<InMemoryDrive>,
    store: Arc<SqliteMetadataStore>,
    cache: Arc<ContentCache>,
    coordinator: Arc<SyncCoordinator>,
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
    }
}

async fn setup() -> Harness {
    let pool = DatabasePool::in_memory()
        .await
        .expect("Failed to create in-memory database");
    let store = Arc::new(SqliteMetadataStore::new(pool.pool().clone()));
    let drive = Arc::new(InMemoryDrive::new());
    let cache = Arc::new(ContentCache::new(1024 * 1024));
    let coordinator = Arc::new(SyncCoordinator::new(
        drive.clone(),
        store.clone(),
        cache.clone(),
        EventBus::new(256),
        fast_retry(),
    ));
    Harness {
        drive,
        store,
        cache,
        coordinator,
    }
}

fn root() -> NodeId {
    NodeId::root()
}

async fn node(h: &Harness, id: &NodeId) -> FileNode {
    h.store
        .get(id)
        .await
        .unwrap()
        .unwrap_or_else(|| panic!("node {id} missing"))
}

/// Every node as comparable tuples, ignoring timestamps
async fn snapshot(store: &SqliteMetadataStore) -> Vec<(String, String, String, Option<String>, String)> {
    let mut rows = Vec::new();
    for state in SyncState::ALL {
        for n in store.list_by_state(state).await.unwrap() {
            rows.push((
                n.id().to_string(),
                n.parent_id().to_string(),
                n.name().to_string(),
                n.revision_tag().map(ToString::to_string),
                n.sync_state().as_str().to_string(),
            ));
        }
    }
    rows.sort();
    rows
}

fn drain(sub: &mut Subscription) -> Vec<ChangeEvent> {
    let mut events = Vec::new();
    while let Some(event) = sub.try_recv() {
        events.push(event);
    }
    events
}

// ============================================================================
// Listing
// ============================================================================

#[tokio::test]
async fn test_first_run_performs_full_listing() {
    let h = setup().await;
    let album = h.drive.remote_add_folder(&root(), "Album");
    let track = h.drive.remote_add_file(&album.id, "01.flac", b"track one");
    let readme = h.drive.remote_add_file(&root(), "readme.txt", b"hello");

    let report = h.coordinator.run_cycle().await.unwrap();

    assert!(report.full_listing);
    assert_eq!(report.added, 3);
    assert!(report.errors.is_empty());
    assert_eq!(h.drive.calls(DriveOp::StartCursor), 1);
    assert_eq!(h.drive.calls(DriveOp::ListChanges), 0);
    // root and Album
    assert_eq!(h.drive.calls(DriveOp::ListAll), 2);

    let children = h.store.list_children(&root()).await.unwrap();
    assert_eq!(children.len(), 2);
    let stored = node(&h, &track.id).await;
    assert_eq!(stored.parent_id(), &album.id);
    assert_eq!(stored.sync_state(), SyncState::Synced);
    assert_eq!(stored.revision_tag(), track.revision_tag.as_ref());
    assert!(h.store.get(&readme.id).await.unwrap().is_some());

    assert!(h.store.get_cursor().await.unwrap().is_some());
    assert_eq!(h.coordinator.state(), SyncPhase::Idle);
    assert_eq!(h.coordinator.last_report().unwrap().added, 3);
}

#[tokio::test]
async fn test_incremental_cycle_uses_cursor() {
    let h = setup().await;
    h.drive.remote_add_file(&root(), "a.txt", b"a");
    h.coordinator.run_cycle().await.unwrap();

    let b = h.drive.remote_add_file(&root(), "b.txt", b"b");
    let report = h.coordinator.run_cycle().await.unwrap();

    assert!(!report.full_listing);
    assert_eq!(report.added, 1);
    assert_eq!(h.drive.calls(DriveOp::ListChanges), 1);
    assert_eq!(h.drive.calls(DriveOp::StartCursor), 1);
    assert!(h.store.get(&b.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_replaying_a_batch_is_idempotent() {
    let h = setup().await;
    let docs = h.drive.remote_add_folder(&root(), "docs");
    let moved = h.drive.remote_add_file(&docs.id, "plan.md", b"plan");
    let doomed = h.drive.remote_add_file(&root(), "old.txt", b"old");
    h.coordinator.run_cycle().await.unwrap();
    let cursor = h.store.get_cursor().await.unwrap().unwrap();

    h.drive.remote_add_file(&root(), "new.txt", b"new");
    h.drive.remote_update_file(&moved.id, b"plan v2").unwrap();
    h.drive.remote_move(&moved.id, &root()).unwrap();
    assert!(h.drive.remote_delete(&doomed.id));

    h.coordinator.run_cycle().await.unwrap();
    let first = snapshot(&h.store).await;

    h.store.set_cursor(&cursor).await.unwrap();
    let replay = h.coordinator.run_cycle().await.unwrap();
    let second = snapshot(&h.store).await;

    assert_eq!(first, second);
    assert_eq!(replay.added + replay.updated + replay.removed, 0);
    assert!(h.store.get(&doomed.id).await.unwrap().is_none());
    assert_eq!(node(&h, &moved.id).await.parent_id(), &root());
}

#[tokio::test]
async fn test_expired_cursor_falls_back_to_full_listing() {
    let h = setup().await;
    h.drive.remote_add_file(&root(), "a.txt", b"a");
    h.coordinator.run_cycle().await.unwrap();

    let late = h.drive.remote_add_file(&root(), "late.txt", b"late");
    h.drive.expire_cursors();
    let report = h.coordinator.run_cycle().await.unwrap();

    assert!(report.full_listing);
    assert_eq!(report.added, 1);
    assert_eq!(report.unchanged, 1);
    assert_eq!(h.drive.calls(DriveOp::ListChanges), 1);
    assert_eq!(h.drive.calls(DriveOp::StartCursor), 2);
    assert!(h.store.get(&late.id).await.unwrap().is_some());

    // The fresh cursor works incrementally again
    let report = h.coordinator.run_cycle().await.unwrap();
    assert!(!report.full_listing);
}

#[tokio::test]
async fn test_rejected_remote_item_forces_full_listing() {
    let h = setup().await;
    h.coordinator.run_cycle().await.unwrap();

    // The child shows up in a batch before its parent does
    let album_id = NodeId::new("album").unwrap();
    let track = h.drive.remote_add_file(&album_id, "01.flac", b"track one");
    let report = h.coordinator.run_cycle().await.unwrap();

    assert!(!report.full_listing);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.errors.len(), 1);
    assert!(h.store.get(&track.id).await.unwrap().is_none());
    assert!(h.store.get_cursor().await.unwrap().is_none());

    h.drive.remote_add_folder_with_id(album_id.clone(), &root(), "Album");
    let report = h.coordinator.run_cycle().await.unwrap();

    assert!(report.full_listing);
    assert_eq!(report.added, 2);
    assert_eq!(report.skipped, 0);
    assert_eq!(node(&h, &track.id).await.parent_id(), &album_id);
    assert!(h.store.get_cursor().await.unwrap().is_some());
}

#[tokio::test]
async fn test_full_listing_removes_nodes_missing_remotely() {
    let h = setup().await;
    let ghost = FileNode::from_remote(&RemoteItem::file(
        NodeId::new("ghost").unwrap(),
        root(),
        "ghost.txt",
        "text/plain",
        5,
        RevisionTag::new("v0").unwrap(),
    ))
    .unwrap();
    h.store.upsert(&ghost).await.unwrap();
    h.drive.remote_add_file(&root(), "real.txt", b"real");

    let report = h.coordinator.run_cycle().await.unwrap();

    assert_eq!(report.removed, 1);
    assert!(h.store.get(ghost.id()).await.unwrap().is_none());
    assert_eq!(h.store.list_children(&root()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_listing_keeps_cursor_and_data() {
    let h = setup().await;
    let kept = h.drive.remote_add_file(&root(), "kept.txt", b"kept");
    h.coordinator.run_cycle().await.unwrap();
    let cursor = h.store.get_cursor().await.unwrap();

    let added = h.drive.remote_add_file(&root(), "added.txt", b"added");
    h.drive.fail_next(
        DriveOp::ListChanges,
        RemoteError::TransientIo("connection reset".to_string()),
        3,
    );

    let err = h.coordinator.run_cycle().await.unwrap_err();
    assert!(matches!(err, SyncError::Remote(RemoteError::TransientIo(_))));
    assert_eq!(h.coordinator.state(), SyncPhase::Error);
    assert!(h.coordinator.last_error().is_some());
    assert_eq!(h.store.get_cursor().await.unwrap(), cursor);
    assert!(h.store.get(&kept.id).await.unwrap().is_some());
    assert!(h.store.get(&added.id).await.unwrap().is_none());

    h.coordinator.recover();
    assert_eq!(h.coordinator.state(), SyncPhase::Idle);

    let report = h.coordinator.run_cycle().await.unwrap();
    assert_eq!(report.added, 1);
    assert!(h.coordinator.last_error().is_none());
}

#[tokio::test]
async fn test_transient_listing_failure_is_retried_within_cycle() {
    let h = setup().await;
    h.drive.remote_add_file(&root(), "a.txt", b"a");
    h.drive.fail_next(
        DriveOp::StartCursor,
        RemoteError::RateLimited {
            retry_after: Some(Duration::from_millis(1)),
        },
        1,
    );

    let report = h.coordinator.run_cycle().await.unwrap();
    assert_eq!(report.added, 1);
    assert_eq!(h.drive.calls(DriveOp::StartCursor), 2);
}

#[tokio::test]
async fn test_remote_update_invalidates_cached_content() {
    let h = setup().await;
    let file = h.drive.remote_add_file(&root(), "song.mp3", b"abcd");
    h.coordinator.run_cycle().await.unwrap();

    let entry = CacheEntry::new(
        file.id.clone(),
        ByteRange::new(0, 4).unwrap(),
        Bytes::from_static(b"abcd"),
        file.revision_tag.clone().unwrap(),
    )
    .unwrap();
    h.cache.put(entry);
    assert_eq!(h.cache.ranges(&file.id).len(), 1);

    let updated = h.drive.remote_update_file(&file.id, b"efghij").unwrap();
    let report = h.coordinator.run_cycle().await.unwrap();

    assert_eq!(report.updated, 1);
    assert!(h.cache.ranges(&file.id).is_empty());
    let stored = node(&h, &file.id).await;
    assert_eq!(stored.revision_tag(), updated.revision_tag.as_ref());
    assert_eq!(stored.size_bytes(), 6);
}

#[tokio::test]
async fn test_remote_folder_delete_cascades() {
    let h = setup().await;
    let folder = h.drive.remote_add_folder(&root(), "photos");
    let sub = h.drive.remote_add_folder(&folder.id, "2024");
    let photo = h.drive.remote_add_file(&sub.id, "cat.jpg", b"meow");
    h.coordinator.run_cycle().await.unwrap();

    assert!(h.drive.remote_delete(&folder.id));
    let report = h.coordinator.run_cycle().await.unwrap();

    assert_eq!(report.removed, 1);
    assert_eq!(report.conflicts, 0);
    assert!(h.store.get(&folder.id).await.unwrap().is_none());
    assert!(h.store.get(&sub.id).await.unwrap().is_none());
    assert!(h.store.get(&photo.id).await.unwrap().is_none());
}

/// A folder deleted remotely holding one edited file and one new file
async fn deleted_folder_with_local_changes(h: &Harness) -> (RemoteItem, NodeId, NodeId) {
    let folder = h.drive.remote_add_folder(&root(), "photos");
    let photo = h.drive.remote_add_file(&folder.id, "cat.jpg", b"meow");
    let other = h.drive.remote_add_file(&folder.id, "dog.jpg", b"woof");
    h.coordinator.run_cycle().await.unwrap();

    h.coordinator
        .create_upload(Bytes::from_static(b"edited"), &folder.id, "cat.jpg", "image/jpeg")
        .await
        .unwrap();
    let fresh = h
        .coordinator
        .create_upload(Bytes::from_static(b"only copy"), &folder.id, "new.jpg", "image/jpeg")
        .await
        .unwrap();
    assert!(h.drive.remote_delete(&folder.id));
    h.coordinator.run_cycle().await.unwrap();
    assert!(h.store.get(&other.id).await.unwrap().is_none());

    (folder, photo.id, fresh.id().clone())
}

#[tokio::test]
async fn test_remote_folder_delete_keeps_local_changes() {
    let h = setup().await;
    let folder = h.drive.remote_add_folder(&root(), "photos");
    let photo = h.drive.remote_add_file(&folder.id, "cat.jpg", b"meow");
    let other = h.drive.remote_add_file(&folder.id, "dog.jpg", b"woof");
    h.coordinator.run_cycle().await.unwrap();

    h.coordinator
        .create_upload(Bytes::from_static(b"edited"), &folder.id, "cat.jpg", "image/jpeg")
        .await
        .unwrap();
    let fresh = h
        .coordinator
        .create_upload(Bytes::from_static(b"only copy"), &folder.id, "new.jpg", "image/jpeg")
        .await
        .unwrap();
    assert!(h.drive.remote_delete(&folder.id));

    let report = h.coordinator.run_cycle().await.unwrap();

    assert_eq!(report.conflicts, 2);
    // dog.jpg had no local changes
    assert_eq!(report.removed, 1);
    assert_eq!(h.drive.calls(DriveOp::Upload), 0);
    assert!(h.store.get(&other.id).await.unwrap().is_none());

    let placeholder = node(&h, &folder.id).await;
    assert_eq!(placeholder.sync_state(), SyncState::Stale);
    assert!(placeholder.revision_tag().is_none());

    for id in [&photo.id, fresh.id()] {
        assert_eq!(node(&h, id).await.sync_state(), SyncState::Conflict);
        assert!(h.store.get_conflict(id).await.unwrap().unwrap().remote_deleted());
    }
    let staged = h.store.staged_upload(fresh.id()).await.unwrap().unwrap();
    assert_eq!(staged.data, Bytes::from_static(b"only copy"));
    let staged = h.store.staged_upload(&photo.id).await.unwrap().unwrap();
    assert_eq!(staged.data, Bytes::from_static(b"edited"));

    // A full listing leaves the placeholder and its conflicts alone
    h.store.clear_cursor().await.unwrap();
    let report = h.coordinator.run_cycle().await.unwrap();
    assert!(report.full_listing);
    assert_eq!(h.store.list_children(&folder.id).await.unwrap().len(), 2);
    assert_eq!(h.store.list_conflicts().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_keep_remote_prunes_deleted_folder() {
    let h = setup().await;
    let (folder, photo, fresh) = deleted_folder_with_local_changes(&h).await;

    h.coordinator
        .resolve_conflict(&photo, Resolution::KeepRemote)
        .await
        .unwrap();
    assert!(h.store.get(&folder.id).await.unwrap().is_some());

    h.coordinator
        .resolve_conflict(&fresh, Resolution::KeepRemote)
        .await
        .unwrap();
    assert!(h.store.get(&folder.id).await.unwrap().is_none());
    assert!(h.store.list_children(&root()).await.unwrap().is_empty());
    assert!(h.store.list_conflicts().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_keep_local_recreates_deleted_folder() {
    let h = setup().await;
    let (folder, photo, fresh) = deleted_folder_with_local_changes(&h).await;

    h.coordinator
        .resolve_conflict(&fresh, Resolution::KeepLocal)
        .await
        .unwrap();
    let report = h.coordinator.run_cycle().await.unwrap();

    assert_eq!(report.uploaded, 1);
    assert_eq!(h.drive.calls(DriveOp::CreateFolder), 1);
    assert!(h.store.get(&folder.id).await.unwrap().is_none());

    let children = h.store.list_children(&root()).await.unwrap();
    assert_eq!(children.len(), 1);
    let recreated = &children[0];
    assert_eq!(recreated.name(), "photos");
    assert_ne!(recreated.id(), &folder.id);
    assert_eq!(recreated.sync_state(), SyncState::Synced);

    let inside = h.store.list_children(recreated.id()).await.unwrap();
    assert_eq!(inside.len(), 2);
    let uploaded = inside.iter().find(|n| n.name() == "new.jpg").unwrap();
    assert_eq!(uploaded.sync_state(), SyncState::Synced);
    assert_eq!(
        h.drive.content(uploaded.id()).unwrap(),
        Bytes::from_static(b"only copy")
    );
    // The other conflict moved along with its folder
    assert_eq!(node(&h, &photo).await.parent_id(), recreated.id());
    assert_eq!(node(&h, &photo).await.sync_state(), SyncState::Conflict);
}

// ============================================================================
// Uploads
// ============================================================================

#[tokio::test]
async fn test_new_upload_is_rekeyed_to_server_id() {
    let h = setup().await;
    h.coordinator.run_cycle().await.unwrap();
    let mut sub = h.coordinator.subscribe();

    let local = h
        .coordinator
        .create_upload(Bytes::from_static(b"fresh bytes"), &root(), "n1.txt", "text/plain")
        .await
        .unwrap();
    assert!(local.id().is_provisional());
    assert_eq!(local.sync_state(), SyncState::PendingUpload);

    let report = h.coordinator.run_cycle().await.unwrap();
    assert_eq!(report.uploaded, 1);

    let children = h.store.list_children(&root()).await.unwrap();
    assert_eq!(children.len(), 1);
    let synced = &children[0];
    assert!(!synced.id().is_provisional());
    assert_eq!(synced.name(), "n1.txt");
    assert_eq!(synced.sync_state(), SyncState::Synced);
    let remote = h.drive.item(synced.id()).unwrap();
    assert_eq!(synced.revision_tag(), remote.revision_tag.as_ref());
    assert_eq!(h.drive.content(synced.id()).unwrap(), Bytes::from_static(b"fresh bytes"));

    assert!(h.store.get(local.id()).await.unwrap().is_none());
    assert!(h.store.staged_upload(synced.id()).await.unwrap().is_none());
    assert!(!h.cache.ranges(synced.id()).is_empty());

    let events = drain(&mut sub);
    assert!(events.contains(&ChangeEvent::Rekeyed {
        from: local.id().clone(),
        to: synced.id().clone(),
    }));

    // The uploaded item comes back in the next change batch unchanged
    let report = h.coordinator.run_cycle().await.unwrap();
    assert_eq!(report.added + report.updated + report.conflicts, 0);
    assert_eq!(h.drive.calls(DriveOp::Upload), 1);
}

#[tokio::test]
async fn test_replacement_upload_keeps_node_id() {
    let h = setup().await;
    let file = h.drive.remote_add_file(&root(), "notes.txt", b"first");
    h.coordinator.run_cycle().await.unwrap();

    let staged = h
        .coordinator
        .create_upload(Bytes::from_static(b"second"), &root(), "notes.txt", "text/plain")
        .await
        .unwrap();
    assert_eq!(staged.id(), &file.id);
    assert_eq!(staged.sync_state(), SyncState::PendingUpload);
    assert_eq!(staged.revision_tag(), file.revision_tag.as_ref());

    let report = h.coordinator.run_cycle().await.unwrap();
    assert_eq!(report.uploaded, 1);
    assert_eq!(h.drive.calls(DriveOp::UpdateContent), 1);
    assert_eq!(h.drive.calls(DriveOp::Upload), 0);

    let stored = node(&h, &file.id).await;
    assert_eq!(stored.sync_state(), SyncState::Synced);
    assert_eq!(stored.size_bytes(), 6);
    assert_eq!(
        stored.revision_tag(),
        h.drive.item(&file.id).unwrap().revision_tag.as_ref()
    );
    assert_eq!(h.drive.content(&file.id).unwrap(), Bytes::from_static(b"second"));
}

#[tokio::test]
async fn test_failed_upload_is_recorded_until_retried() {
    let h = setup().await;
    h.coordinator.run_cycle().await.unwrap();
    let local = h
        .coordinator
        .create_upload(Bytes::from_static(b"data"), &root(), "report.pdf", "application/pdf")
        .await
        .unwrap();
    h.drive.fail_next(
        DriveOp::Upload,
        RemoteError::NotFound("parent".to_string()),
        1,
    );

    let report = h.coordinator.run_cycle().await.unwrap();
    assert_eq!(report.uploaded, 0);
    assert_eq!(report.errors.len(), 1);

    let failed = h.store.failed_uploads().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(&failed[0].node_id, local.id());
    assert_eq!(failed[0].attempts, 1);
    assert!(!failed[0].retryable);
    assert!(failed[0].last_error.is_some());

    // Blocked until someone asks for a retry
    let report = h.coordinator.run_cycle().await.unwrap();
    assert_eq!(report.deferred, 1);
    assert_eq!(h.drive.calls(DriveOp::Upload), 1);

    h.coordinator.retry_upload(local.id()).await.unwrap();
    let report = h.coordinator.run_cycle().await.unwrap();
    assert_eq!(report.uploaded, 1);
    assert!(h.store.failed_uploads().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unauthorized_upload_aborts_cycle() {
    let h = setup().await;
    h.coordinator.run_cycle().await.unwrap();
    let cursor = h.store.get_cursor().await.unwrap();
    h.coordinator
        .create_upload(Bytes::from_static(b"x"), &root(), "x.bin", "application/octet-stream")
        .await
        .unwrap();
    h.drive.fail_next(
        DriveOp::Upload,
        RemoteError::Unauthorized("token revoked".to_string()),
        1,
    );

    let err = h.coordinator.run_cycle().await.unwrap_err();
    assert!(matches!(err, SyncError::Remote(RemoteError::Unauthorized(_))));
    assert_eq!(h.coordinator.state(), SyncPhase::Error);
    assert_eq!(h.store.get_cursor().await.unwrap(), cursor);
}

#[tokio::test]
async fn test_upload_into_missing_parent_is_rejected() {
    let h = setup().await;
    let file = h.drive.remote_add_file(&root(), "plain.txt", b"p");
    h.coordinator.run_cycle().await.unwrap();

    let err = h
        .coordinator
        .create_upload(Bytes::from_static(b"x"), &file.id, "child.txt", "text/plain")
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));

    let err = h
        .coordinator
        .create_upload(
            Bytes::from_static(b"x"),
            &NodeId::new("nowhere").unwrap(),
            "child.txt",
            "text/plain",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));
}

// ============================================================================
// Conflicts
// ============================================================================

/// Syncs `notes.txt`, stages a local edit, then edits it remotely
async fn conflicted(h: &Harness) -> NodeId {
    let file = h.drive.remote_add_file(&root(), "notes.txt", b"original");
    h.coordinator.run_cycle().await.unwrap();
    h.coordinator
        .create_upload(Bytes::from_static(b"local edit"), &root(), "notes.txt", "text/plain")
        .await
        .unwrap();
    h.drive.remote_update_file(&file.id, b"remote edit").unwrap();
    file.id
}

#[tokio::test]
async fn test_concurrent_remote_edit_raises_conflict() {
    let h = setup().await;
    let mut sub = h.coordinator.subscribe();
    let id = conflicted(&h).await;

    let report = h.coordinator.run_cycle().await.unwrap();

    assert_eq!(report.conflicts, 1);
    assert_eq!(report.uploaded, 0);
    assert_eq!(h.drive.calls(DriveOp::UpdateContent), 0);
    assert_eq!(node(&h, &id).await.sync_state(), SyncState::Conflict);
    assert_eq!(h.drive.content(&id).unwrap(), Bytes::from_static(b"remote edit"));

    let staged = h.store.staged_upload(&id).await.unwrap().unwrap();
    assert_eq!(staged.data, Bytes::from_static(b"local edit"));

    let record = h.store.get_conflict(&id).await.unwrap().unwrap();
    assert_eq!(
        record.remote.revision_tag,
        h.drive.item(&id).unwrap().revision_tag
    );
    assert!(!record.remote_deleted());

    let events = drain(&mut sub);
    assert!(events.contains(&ChangeEvent::ConflictDetected {
        node_id: id.clone()
    }));

    // Conflicts stay put until resolved
    let report = h.coordinator.run_cycle().await.unwrap();
    assert_eq!(h.drive.calls(DriveOp::UpdateContent), 0);
    assert_eq!(report.uploaded, 0);
    assert_eq!(node(&h, &id).await.sync_state(), SyncState::Conflict);
}

#[tokio::test]
async fn test_keep_local_pushes_local_content() {
    let h = setup().await;
    let id = conflicted(&h).await;
    h.coordinator.run_cycle().await.unwrap();
    let remote_rev = h.drive.item(&id).unwrap().revision_tag;

    let resolved = h
        .coordinator
        .resolve_conflict(&id, Resolution::KeepLocal)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resolved.sync_state(), SyncState::PendingUpload);
    assert_eq!(resolved.revision_tag(), remote_rev.as_ref());
    assert!(h.store.get_conflict(&id).await.unwrap().is_none());

    let report = h.coordinator.run_cycle().await.unwrap();
    assert_eq!(report.uploaded, 1);
    assert_eq!(h.drive.content(&id).unwrap(), Bytes::from_static(b"local edit"));
    let stored = node(&h, &id).await;
    assert_eq!(stored.sync_state(), SyncState::Synced);
    assert_eq!(
        stored.revision_tag(),
        h.drive.item(&id).unwrap().revision_tag.as_ref()
    );
}

#[tokio::test]
async fn test_keep_remote_discards_local_content() {
    let h = setup().await;
    let id = conflicted(&h).await;
    h.coordinator.run_cycle().await.unwrap();
    let remote_rev = h.drive.item(&id).unwrap().revision_tag;
    let mut sub = h.coordinator.subscribe();

    let resolved = h
        .coordinator
        .resolve_conflict(&id, Resolution::KeepRemote)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resolved.sync_state(), SyncState::Stale);
    assert_eq!(resolved.revision_tag(), remote_rev.as_ref());
    assert!(h.store.staged_upload(&id).await.unwrap().is_none());
    assert!(h.store.get_conflict(&id).await.unwrap().is_none());
    assert!(drain(&mut sub).contains(&ChangeEvent::ConflictResolved {
        node_id: id.clone(),
        resolution: Resolution::KeepRemote,
    }));

    let report = h.coordinator.run_cycle().await.unwrap();
    assert_eq!(report.uploaded, 0);
    assert_eq!(node(&h, &id).await.sync_state(), SyncState::Synced);
    assert_eq!(h.drive.content(&id).unwrap(), Bytes::from_static(b"remote edit"));
}

#[tokio::test]
async fn test_remote_delete_of_pending_upload_conflicts() {
    let h = setup().await;
    let file = h.drive.remote_add_file(&root(), "draft.txt", b"draft");
    h.coordinator.run_cycle().await.unwrap();
    h.coordinator
        .create_upload(Bytes::from_static(b"draft 2"), &root(), "draft.txt", "text/plain")
        .await
        .unwrap();
    assert!(h.drive.remote_delete(&file.id));

    let report = h.coordinator.run_cycle().await.unwrap();
    assert_eq!(report.conflicts, 1);
    let record = h.store.get_conflict(&file.id).await.unwrap().unwrap();
    assert!(record.remote_deleted());

    let outcome = h
        .coordinator
        .resolve_conflict(&file.id, Resolution::KeepRemote)
        .await
        .unwrap();
    assert!(outcome.is_none());
    assert!(h.store.get(&file.id).await.unwrap().is_none());
    assert!(h.store.list_conflicts().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_keep_local_after_remote_delete_uploads_as_new() {
    let h = setup().await;
    let file = h.drive.remote_add_file(&root(), "draft.txt", b"draft");
    h.coordinator.run_cycle().await.unwrap();
    h.coordinator
        .create_upload(Bytes::from_static(b"draft 2"), &root(), "draft.txt", "text/plain")
        .await
        .unwrap();
    h.drive.remote_delete(&file.id);
    h.coordinator.run_cycle().await.unwrap();

    h.coordinator
        .resolve_conflict(&file.id, Resolution::KeepLocal)
        .await
        .unwrap();
    let report = h.coordinator.run_cycle().await.unwrap();

    assert_eq!(report.uploaded, 1);
    let children = h.store.list_children(&root()).await.unwrap();
    assert_eq!(children.len(), 1);
    assert_ne!(children[0].id(), &file.id);
    assert_eq!(children[0].name(), "draft.txt");
    assert_eq!(children[0].sync_state(), SyncState::Synced);
    assert_eq!(
        h.drive.content(children[0].id()).unwrap(),
        Bytes::from_static(b"draft 2")
    );
}

#[tokio::test]
async fn test_remote_twin_of_local_creation_conflicts() {
    let h = setup().await;
    h.coordinator.run_cycle().await.unwrap();
    let local = h
        .coordinator
        .create_upload(Bytes::from_static(b"mine"), &root(), "memo.txt", "text/plain")
        .await
        .unwrap();
    let theirs = h.drive.remote_add_file(&root(), "memo.txt", b"theirs");

    let report = h.coordinator.run_cycle().await.unwrap();

    assert_eq!(report.conflicts, 1);
    assert_eq!(h.drive.calls(DriveOp::Upload), 0);
    assert_eq!(node(&h, local.id()).await.sync_state(), SyncState::Conflict);
    let record = h.store.get_conflict(local.id()).await.unwrap().unwrap();
    assert_eq!(record.remote.id, theirs.id);

    let adopted = h
        .coordinator
        .resolve_conflict(local.id(), Resolution::KeepRemote)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(adopted.id(), &theirs.id);
    assert!(h.store.get(local.id()).await.unwrap().is_none());
    let children = h.store.list_children(&root()).await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id(), &theirs.id);
}

#[tokio::test]
async fn test_upload_over_conflict_is_rejected() {
    let h = setup().await;
    let id = conflicted(&h).await;
    h.coordinator.run_cycle().await.unwrap();

    let err = h
        .coordinator
        .create_upload(Bytes::from_static(b"again"), &root(), "notes.txt", "text/plain")
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Conflict(conflict) if conflict == id));
}

// ============================================================================
// Deletes, renames, folders
// ============================================================================

#[tokio::test]
async fn test_requested_delete_is_pushed() {
    let h = setup().await;
    let file = h.drive.remote_add_file(&root(), "trash.txt", b"bye");
    h.coordinator.run_cycle().await.unwrap();

    h.coordinator.request_delete(&file.id).await.unwrap();
    assert_eq!(node(&h, &file.id).await.sync_state(), SyncState::PendingDelete);
    assert!(h.drive.item(&file.id).is_some());

    let report = h.coordinator.run_cycle().await.unwrap();
    assert_eq!(report.deleted_remotely, 1);
    assert!(h.drive.item(&file.id).is_none());
    assert!(h.store.get(&file.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_of_local_creation_is_immediate() {
    let h = setup().await;
    let mut sub = h.coordinator.subscribe();
    let local = h
        .coordinator
        .create_upload(Bytes::from_static(b"tmp"), &root(), "tmp.txt", "text/plain")
        .await
        .unwrap();

    h.coordinator.request_delete(local.id()).await.unwrap();

    assert!(h.store.get(local.id()).await.unwrap().is_none());
    assert!(h.store.staged_upload(local.id()).await.unwrap().is_none());
    assert!(drain(&mut sub).contains(&ChangeEvent::Removed {
        node_id: local.id().clone(),
        parent_id: root(),
    }));
    assert_eq!(h.drive.calls(DriveOp::Delete), 0);
}

#[tokio::test]
async fn test_delete_root_is_rejected() {
    let h = setup().await;
    let err = h.coordinator.request_delete(&root()).await.unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
}

#[tokio::test]
async fn test_rename_adopts_remote_revision() {
    let h = setup().await;
    let file = h.drive.remote_add_file(&root(), "before.txt", b"same");
    h.coordinator.run_cycle().await.unwrap();

    let renamed = h.coordinator.rename(&file.id, "after.txt").await.unwrap();

    let remote = h.drive.item(&file.id).unwrap();
    assert_eq!(remote.name, "after.txt");
    assert_eq!(renamed.name(), "after.txt");
    assert_eq!(renamed.sync_state(), SyncState::Synced);
    assert_eq!(renamed.revision_tag(), remote.revision_tag.as_ref());

    let report = h.coordinator.run_cycle().await.unwrap();
    assert_eq!(report.updated, 0);
    assert_eq!(report.conflicts, 0);
}

#[tokio::test]
async fn test_rename_rejects_invalid_name() {
    let h = setup().await;
    let file = h.drive.remote_add_file(&root(), "ok.txt", b"ok");
    h.coordinator.run_cycle().await.unwrap();

    let err = h.coordinator.rename(&file.id, "a/b").await.unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
    assert_eq!(h.drive.calls(DriveOp::Rename), 0);
}

#[tokio::test]
async fn test_ensure_folder_creates_once() {
    let h = setup().await;
    h.coordinator.run_cycle().await.unwrap();

    let first = h.coordinator.ensure_folder(&root(), "Music").await.unwrap();
    let second = h.coordinator.ensure_folder(&root(), "Music").await.unwrap();

    assert!(first.is_folder());
    assert_eq!(first.id(), second.id());
    assert_eq!(h.drive.calls(DriveOp::CreateFolder), 1);
    assert!(h.drive.item(first.id()).unwrap().is_folder());

    let nested = h.coordinator.ensure_folder(first.id(), "Jazz").await.unwrap();
    assert_eq!(nested.parent_id(), first.id());
}

#[tokio::test]
async fn test_ensure_folder_refuses_file_name() {
    let h = setup().await;
    h.drive.remote_add_file(&root(), "Music", b"not a folder");
    h.coordinator.run_cycle().await.unwrap();

    let err = h.coordinator.ensure_folder(&root(), "Music").await.unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
    assert_eq!(h.drive.calls(DriveOp::CreateFolder), 0);
}

// ============================================================================
// Events and phases
// ============================================================================

#[tokio::test]
async fn test_cycle_publishes_upserts() {
    let h = setup().await;
    let file = h.drive.remote_add_file(&root(), "a.txt", b"a");
    let mut sub = h.coordinator.subscribe();

    h.coordinator.run_cycle().await.unwrap();

    let events = drain(&mut sub);
    assert_eq!(
        events,
        vec![ChangeEvent::Upserted {
            node_id: file.id.clone(),
            parent_id: root(),
            state: SyncState::Synced,
        }]
    );
}

#[tokio::test]
async fn test_phase_changes_are_observable() {
    let h = setup().await;
    h.drive.remote_add_file(&root(), "a.txt", b"a");
    let mut phases = h.coordinator.watch_state();
    assert_eq!(*phases.borrow(), SyncPhase::Idle);

    h.coordinator.run_cycle().await.unwrap();

    assert!(phases.has_changed().unwrap());
    assert_eq!(*phases.borrow_and_update(), SyncPhase::Idle);
}

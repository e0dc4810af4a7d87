//! Integration tests for RangeFetcher and Reader
//!
//! The remote side is an `InMemoryDrive`; fetch delays widen the windows
//! in which concurrent readers can coalesce.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use vaultspace_core::domain::{ByteRange, FileNode, NodeId, RemoteItem};
use vaultspace_core::retry::RetryPolicy;
use vaultspace_core::testing::{DriveOp, InMemoryDrive};
use vaultspace_core::RemoteError;
use vaultspace_stream::{ContentCache, PrefetchPolicy, RangeFetcher, Reader, StreamError};

// ============================================================================
// Test helpers
// ============================================================================

struct Fixture {
    drive: Arc<InMemoryDrive>,
    cache: Arc<ContentCache>,
    fetcher: Arc<RangeFetcher>,
}

fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

fn setup_with(prefetch: PrefetchPolicy, retry: RetryPolicy) -> Fixture {
    let drive = Arc::new(InMemoryDrive::new());
    let cache = Arc::new(ContentCache::new(1024 * 1024));
    let fetcher = Arc::new(RangeFetcher::new(
        drive.clone(),
        cache.clone(),
        retry,
        prefetch,
    ));
    Fixture {
        drive,
        cache,
        fetcher,
    }
}

fn setup() -> Fixture {
    setup_with(PrefetchPolicy::default(), fast_retry(2))
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn add_file(fx: &Fixture, name: &str, len: usize) -> (RemoteItem, FileNode) {
    let item = fx.drive.remote_add_file(&NodeId::root(), name, &pattern(len));
    let node = FileNode::from_remote(&item).unwrap();
    (item, node)
}

// ============================================================================
// Cache-first reads
// ============================================================================

#[tokio::test]
async fn test_first_read_fetches_then_cache_serves() {
    let fx = setup();
    let (_, f1) = add_file(&fx, "f1.mp3", 100);
    let reader = Reader::remote(fx.fetcher.clone(), &f1).unwrap();

    let first = reader.read_range(0, 50).await.unwrap();
    assert_eq!(first.len(), 50);
    assert_eq!(&first[..], &pattern(100)[..50]);
    assert_eq!(fx.drive.calls(DriveOp::FetchRange), 1);

    let second = reader.read_range(10, 20).await.unwrap();
    assert_eq!(&second[..], &pattern(100)[10..20]);
    assert_eq!(fx.drive.calls(DriveOp::FetchRange), 1);
}

#[tokio::test]
async fn test_read_past_end_is_truncated() {
    let fx = setup();
    let (_, f1) = add_file(&fx, "f1.mp3", 100);
    let reader = Reader::remote(fx.fetcher.clone(), &f1).unwrap();

    assert_eq!(reader.read_range(90, 500).await.unwrap().len(), 10);
    assert!(reader.read_range(100, 120).await.unwrap().is_empty());
    assert!(reader.read_range(30, 30).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_inverted_range_rejected() {
    let fx = setup();
    let (_, f1) = add_file(&fx, "f1.mp3", 100);
    let reader = Reader::remote(fx.fetcher.clone(), &f1).unwrap();

    assert!(matches!(
        reader.read_range(50, 10).await,
        Err(StreamError::InvalidRange(_))
    ));
    assert_eq!(fx.drive.calls(DriveOp::FetchRange), 0);
}

#[tokio::test]
async fn test_node_without_revision_has_no_remote_reader() {
    let fx = setup();
    let local = FileNode::new_local_file(NodeId::root(), "memo.m4a", "audio/mp4", 3).unwrap();
    assert!(matches!(
        Reader::remote(fx.fetcher.clone(), &local),
        Err(StreamError::NoRevision(_))
    ));
}

#[tokio::test]
async fn test_prefetch_follows_bitrate_hint() {
    let policy = PrefetchPolicy {
        min_bytes: 10,
        max_bytes: 40,
        seconds: 2,
    };
    let fx = setup_with(policy, fast_retry(0));
    let (_, f1) = add_file(&fx, "song.mp3", 100);
    let reader = Reader::remote(fx.fetcher.clone(), &f1).unwrap();

    reader.read_range(0, 5).await.unwrap();
    assert_eq!(
        fx.cache.ranges(f1.id()).last().map(|r| (r.start(), r.end())),
        Some((0, 10))
    );

    reader.set_bitrate_hint(Some(15));
    reader.read_range(10, 12).await.unwrap();
    assert_eq!(
        fx.cache.ranges(f1.id()).last().map(|r| (r.start(), r.end())),
        Some((10, 40))
    );
}

// ============================================================================
// Coalescing
// ============================================================================

#[tokio::test]
async fn test_concurrent_overlapping_reads_share_one_fetch() {
    let fx = setup();
    let (_, f1) = add_file(&fx, "movie.mkv", 4096);
    fx.drive.set_fetch_delay(Duration::from_millis(50));

    let mut handles = Vec::new();
    for i in 0..8u64 {
        let reader = Reader::remote(fx.fetcher.clone(), &f1).unwrap();
        handles.push(tokio::spawn(async move {
            reader.read_range(i * 100, i * 100 + 200).await
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let bytes = handle.await.unwrap().unwrap();
        let start = i * 100;
        assert_eq!(&bytes[..], &pattern(4096)[start..start + 200]);
    }
    assert_eq!(fx.drive.calls(DriveOp::FetchRange), 1);
    assert_eq!(fx.fetcher.in_flight(), 0);
}

#[tokio::test]
async fn test_reads_on_different_files_do_not_coalesce() {
    let fx = setup();
    let (_, a) = add_file(&fx, "a.mp3", 100);
    let (_, b) = add_file(&fx, "b.mp3", 100);
    fx.drive.set_fetch_delay(Duration::from_millis(20));

    let ra = Reader::remote(fx.fetcher.clone(), &a).unwrap();
    let rb = Reader::remote(fx.fetcher.clone(), &b).unwrap();
    let (x, y) = tokio::join!(ra.read_range(0, 10), rb.read_range(0, 10));
    x.unwrap();
    y.unwrap();
    assert_eq!(fx.drive.calls(DriveOp::FetchRange), 2);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancel_detaches_only_the_cancelled_waiter() {
    let fx = setup();
    let (_, f1) = add_file(&fx, "movie.mkv", 1000);
    fx.drive.set_fetch_delay(Duration::from_millis(100));

    let impatient = Reader::remote(fx.fetcher.clone(), &f1).unwrap();
    let patient = Reader::remote(fx.fetcher.clone(), &f1).unwrap();
    let token = CancellationToken::new();

    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });

    let (cancelled, completed) = tokio::join!(
        impatient.read_range_cancellable(0, 100, &token),
        patient.read_range(50, 150),
    );

    assert!(matches!(cancelled, Err(StreamError::Cancelled)));
    assert_eq!(completed.unwrap().len(), 100);
    assert_eq!(fx.drive.calls(DriveOp::FetchRange), 1);

    // The fetch still landed for everyone
    assert!(impatient.read_range(0, 100).await.is_ok());
    assert_eq!(fx.drive.calls(DriveOp::FetchRange), 1);
}

#[tokio::test]
async fn test_abandoned_fetch_still_fills_cache() {
    let fx = setup();
    let (_, f1) = add_file(&fx, "movie.mkv", 1000);
    fx.drive.set_fetch_delay(Duration::from_millis(30));

    let reader = Reader::remote(fx.fetcher.clone(), &f1).unwrap();
    let token = CancellationToken::new();
    token.cancel();
    assert!(matches!(
        reader.read_range_cancellable(0, 10, &token).await,
        Err(StreamError::Cancelled)
    ));
    assert_eq!(fx.drive.calls(DriveOp::FetchRange), 0);

    let token = CancellationToken::new();
    let seeker = token.clone();
    let read = reader.read_range_cancellable(0, 10, &token);
    let (result, ()) = tokio::join!(read, async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        seeker.cancel();
    });
    assert!(matches!(result, Err(StreamError::Cancelled)));

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(fx.cache.ranges(f1.id()).len(), 1);
    assert_eq!(fx.fetcher.in_flight(), 0);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_transient_failure_retried() {
    let fx = setup();
    let (_, f1) = add_file(&fx, "f1.mp3", 100);
    fx.drive.fail_next(
        DriveOp::FetchRange,
        RemoteError::TransientIo("connection reset".into()),
        2,
    );

    let reader = Reader::remote(fx.fetcher.clone(), &f1).unwrap();
    assert_eq!(reader.read_range(0, 10).await.unwrap().len(), 10);
    assert_eq!(fx.drive.calls(DriveOp::FetchRange), 3);
}

#[tokio::test]
async fn test_exhausted_retries_surface_and_do_not_cache() {
    let fx = setup();
    let (_, f1) = add_file(&fx, "f1.mp3", 100);
    fx.drive.fail_next(
        DriveOp::FetchRange,
        RemoteError::TransientIo("timeout".into()),
        3,
    );

    let reader = Reader::remote(fx.fetcher.clone(), &f1).unwrap();
    let err = reader.read_range(20, 30).await.unwrap_err();
    match err {
        StreamError::Fetch { range, source, .. } => {
            assert_eq!((range.start(), range.end()), (20, 30));
            assert!(source.is_transient());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(fx.cache.ranges(f1.id()).is_empty());

    // Same request succeeds once the remote recovers
    assert_eq!(reader.read_range(20, 30).await.unwrap().len(), 10);
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let fx = setup();
    let (_, f1) = add_file(&fx, "f1.mp3", 100);
    fx.drive.remote_delete(f1.id());

    let reader = Reader::remote(fx.fetcher.clone(), &f1).unwrap();
    let err = reader.read_range(0, 10).await.unwrap_err();
    assert!(matches!(
        err,
        StreamError::Fetch {
            source: RemoteError::NotFound(_),
            ..
        }
    ));
    assert_eq!(fx.drive.calls(DriveOp::FetchRange), 1);
}

// ============================================================================
// Revisions
// ============================================================================

#[tokio::test]
async fn test_new_revision_never_sees_old_bytes() {
    let fx = setup();
    let (_, f1) = add_file(&fx, "f1.mp3", 100);
    let old_reader = Reader::remote(fx.fetcher.clone(), &f1).unwrap();
    assert_eq!(old_reader.read_range(0, 4).await.unwrap()[..], pattern(4)[..]);

    let updated = fx.drive.remote_update_file(f1.id(), b"fresh content").unwrap();
    fx.cache.invalidate(f1.id());
    let f1_v2 = FileNode::from_remote(&updated).unwrap();

    let new_reader = Reader::remote(fx.fetcher.clone(), &f1_v2).unwrap();
    assert_eq!(&new_reader.read_range(0, 5).await.unwrap()[..], b"fresh");
    assert_eq!(fx.drive.calls(DriveOp::FetchRange), 2);
}

#[tokio::test]
async fn test_late_fetch_of_old_revision_keeps_new_entries() {
    let fx = setup();
    let (_, f1) = add_file(&fx, "f1.mp3", 100);
    let old_reader = Reader::remote(fx.fetcher.clone(), &f1).unwrap();

    fx.drive.set_fetch_delay(Duration::from_millis(80));
    let late = tokio::spawn(async move { old_reader.read_range(0, 10).await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let updated = fx.drive.remote_update_file(f1.id(), b"fresh content").unwrap();
    fx.cache.invalidate(f1.id());
    let f1_v2 = FileNode::from_remote(&updated).unwrap();
    let revision = f1_v2.revision_tag().cloned().unwrap();

    fx.drive.set_fetch_delay(Duration::ZERO);
    let new_reader = Reader::remote(fx.fetcher.clone(), &f1_v2).unwrap();
    assert_eq!(&new_reader.read_range(0, 5).await.unwrap()[..], b"fresh");
    assert_eq!(fx.drive.calls(DriveOp::FetchRange), 2);

    late.await.unwrap().unwrap();
    assert_eq!(fx.cache.ranges(f1.id()).len(), 1);
    assert!(fx
        .cache
        .read(f1.id(), ByteRange::new(0, 5).unwrap(), f1.revision_tag().unwrap())
        .is_none());
    assert!(fx
        .cache
        .read(f1.id(), ByteRange::new(0, 5).unwrap(), &revision)
        .is_some());

    assert_eq!(&new_reader.read_range(0, 13).await.unwrap()[..], b"fresh content");
    assert_eq!(fx.drive.calls(DriveOp::FetchRange), 2);
}

//! Range fetcher with request coalescing.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  fetch()   ┌────────────────────────────────────┐
//! │ Reader A     │ ─────────► │ RangeFetcher                       │
//! └──────────────┘            │                                    │
//! ┌──────────────┐  fetch()   │  1. ContentCache::read  ── hit ──► │ bytes
//! │ Reader B     │ ─────────► │  2. in_flight: DashMap<NodeId,     │
//! └──────────────┘            │        Vec<InFlight>>              │
//!        ▲                    │     overlapping fetch? join it     │
//!        │ watch::Receiver    │     otherwise spawn a fetch task   │
//!        └────────────────────│                                    │
//!                             └────────────────────────────────────┘
//!                                              │ spawn
//!                                              ▼
//!                             ┌────────────────────────────────────┐
//!                             │ Fetch task                         │
//!                             │  with_retry(fetch_range)           │
//!                             │  ContentCache::put_at_generation   │
//!                             │  broadcast outcome, leave table    │
//!                             └────────────────────────────────────┘
//! ```
//!
//! Fetch tasks are detached from their callers. A waiter that gives up
//! only drops its receiver; the fetch keeps running for everyone else and
//! still lands in the cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use vaultspace_core::domain::{ByteRange, CacheEntry, NodeId, RevisionTag};
use vaultspace_core::ports::IRemoteDrive;
use vaultspace_core::retry::{with_retry, RetryPolicy};
use vaultspace_core::RemoteError;

use crate::cache::ContentCache;
use crate::error::StreamError;
use crate::prefetch::PrefetchPolicy;

/// Published once by a fetch task; `None` until then
type FetchOutcome = Option<Result<Bytes, RemoteError>>;

/// The remote content a read is addressed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRef {
    pub file_id: NodeId,
    pub revision: RevisionTag,
    pub size: u64,
}

enum Lookup {
    Hit(Bytes),
    Wait {
        range: ByteRange,
        rx: watch::Receiver<FetchOutcome>,
        joined: bool,
    },
}

struct InFlight {
    id: u64,
    range: ByteRange,
    revision: RevisionTag,
    rx: watch::Receiver<FetchOutcome>,
}

/// Serves byte ranges from the content cache, fetching misses remotely
pub struct RangeFetcher {
    remote: Arc<dyn IRemoteDrive>,
    cache: Arc<ContentCache>,
    retry: RetryPolicy,
    prefetch: PrefetchPolicy,
    in_flight: Arc<DashMap<NodeId, Vec<InFlight>>>,
    next_id: AtomicU64,
}

impl RangeFetcher {
    pub fn new(
        remote: Arc<dyn IRemoteDrive>,
        cache: Arc<ContentCache>,
        retry: RetryPolicy,
        prefetch: PrefetchPolicy,
    ) -> Self {
        Self {
            remote,
            cache,
            retry,
            prefetch,
            in_flight: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// The cache this fetcher fills
    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    /// Default sizing policy for new readers
    pub fn prefetch(&self) -> PrefetchPolicy {
        self.prefetch
    }

    /// Number of remote fetches currently outstanding
    pub fn in_flight(&self) -> usize {
        self.in_flight.iter().map(|e| e.value().len()).sum()
    }

    /// Returns `wanted`, clamped to the file size
    ///
    /// On a miss the remote fetch spans at least `chunk` bytes from the
    /// start of `wanted`. A caller that finds an overlapping fetch already
    /// outstanding waits for it instead of issuing another one.
    pub async fn fetch(
        &self,
        content: &ContentRef,
        wanted: ByteRange,
        chunk: u64,
    ) -> Result<Bytes, StreamError> {
        let wanted = wanted.clamp_end(content.size);
        if wanted.is_empty() {
            return Ok(Bytes::new());
        }

        loop {
            if let Some(bytes) = self.cache.read(&content.file_id, wanted, &content.revision) {
                return Ok(bytes);
            }

            let (range, mut rx, joined) = match self.join_or_start(content, wanted, chunk) {
                Lookup::Hit(bytes) => {
                    self.in_flight
                        .remove_if(&content.file_id, |_, waiting| waiting.is_empty());
                    return Ok(bytes);
                }
                Lookup::Wait { range, rx, joined } => (range, rx, joined),
            };
            let outcome = rx
                .wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|v| (*v).clone());

            let data = match outcome {
                Some(Ok(data)) => data,
                Some(Err(source)) => {
                    return Err(StreamError::Fetch {
                        file_id: content.file_id.clone(),
                        range: wanted,
                        source,
                    })
                }
                None => {
                    return Err(StreamError::Fetch {
                        file_id: content.file_id.clone(),
                        range: wanted,
                        source: RemoteError::TransientIo("fetch task ended without a result".into()),
                    })
                }
            };

            let fetched_end = range.start() + data.len() as u64;
            if range.start() <= wanted.start() && wanted.end() <= fetched_end {
                return Ok(slice(&data, range.start(), wanted));
            }
            if !joined {
                // The remote returned less than its advertised size
                let available = wanted.clamp_end(fetched_end);
                tracing::debug!(
                    file_id = %content.file_id,
                    expected = wanted.end(),
                    got = fetched_end,
                    "Short read from remote"
                );
                return Ok(slice(&data, range.start(), available));
            }
            tracing::trace!(file_id = %content.file_id, "Joined fetch did not cover request, fetching again");
        }
    }

    /// Like [`fetch`](Self::fetch), giving up when `cancel` fires
    ///
    /// Cancelling detaches this caller only.
    pub async fn fetch_cancellable(
        &self,
        content: &ContentRef,
        wanted: ByteRange,
        chunk: u64,
        cancel: &CancellationToken,
    ) -> Result<Bytes, StreamError> {
        tokio::select! {
            result = self.fetch(content, wanted, chunk) => result,
            () = cancel.cancelled() => {
                tracing::debug!(file_id = %content.file_id, start = wanted.start(), "Read cancelled");
                Err(StreamError::Cancelled)
            }
        }
    }

    fn join_or_start(
        &self,
        content: &ContentRef,
        wanted: ByteRange,
        chunk: u64,
    ) -> Lookup {
        let mut waiting = self.in_flight.entry(content.file_id.clone()).or_default();

        // Fetch tasks fill the cache before leaving the table, so a miss
        // here with no overlapping entry means nobody is fetching it.
        if let Some(bytes) = self.cache.read(&content.file_id, wanted, &content.revision) {
            return Lookup::Hit(bytes);
        }
        if let Some(existing) = waiting
            .iter()
            .find(|f| f.revision == content.revision && f.range.overlaps(&wanted))
        {
            tracing::trace!(
                file_id = %content.file_id,
                start = existing.range.start(),
                end = existing.range.end(),
                "Joining in-flight fetch"
            );
            return Lookup::Wait {
                range: existing.range,
                rx: existing.rx.clone(),
                joined: true,
            };
        }

        let end = wanted
            .end()
            .max(wanted.start().saturating_add(chunk))
            .min(content.size);
        let range = ByteRange::new(wanted.start(), end).unwrap_or(wanted);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        waiting.push(InFlight {
            id,
            range,
            revision: content.revision.clone(),
            rx: rx.clone(),
        });
        drop(waiting);

        self.spawn_fetch(id, content.clone(), range, tx);
        Lookup::Wait {
            range,
            rx,
            joined: false,
        }
    }

    fn spawn_fetch(
        &self,
        id: u64,
        content: ContentRef,
        range: ByteRange,
        tx: watch::Sender<FetchOutcome>,
    ) {
        let remote = Arc::clone(&self.remote);
        let cache = Arc::clone(&self.cache);
        let in_flight = Arc::clone(&self.in_flight);
        let retry = self.retry.clone();
        let generation = cache.generation(&content.file_id);

        tokio::spawn(async move {
            tracing::debug!(
                file_id = %content.file_id,
                start = range.start(),
                end = range.end(),
                "Fetching range"
            );

            let result = with_retry(&retry, "fetch_range", || {
                remote.fetch_range(&content.file_id, range.start(), range.end())
            })
            .await
            .map(|data| {
                if data.len() as u64 > range.len() {
                    data.slice(..range.len() as usize)
                } else {
                    data
                }
            });

            match &result {
                Ok(data) => {
                    let fetched = range.clamp_end(range.start() + data.len() as u64);
                    match CacheEntry::new(
                        content.file_id.clone(),
                        fetched,
                        data.clone(),
                        content.revision.clone(),
                    ) {
                        Ok(entry) => cache.put_at_generation(entry, generation),
                        Err(e) => tracing::warn!(file_id = %content.file_id, error = %e, "Fetched range not cached"),
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        file_id = %content.file_id,
                        start = range.start(),
                        end = range.end(),
                        error = %e,
                        "Range fetch failed"
                    );
                }
            }

            tx.send_replace(Some(result));

            if let Some(mut waiting) = in_flight.get_mut(&content.file_id) {
                waiting.retain(|f| f.id != id);
            }
            in_flight.remove_if(&content.file_id, |_, waiting| waiting.is_empty());
        });
    }
}

fn slice(data: &Bytes, data_start: u64, wanted: ByteRange) -> Bytes {
    let from = (wanted.start() - data_start) as usize;
    let to = (wanted.end() - data_start) as usize;
    data.slice(from..to)
}

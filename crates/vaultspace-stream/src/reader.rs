//! Random-access reader over one file's content.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use vaultspace_core::domain::{ByteRange, FileNode, NodeId, RevisionTag};

use crate::error::StreamError;
use crate::fetcher::{ContentRef, RangeFetcher};

enum Source {
    Remote {
        fetcher: Arc<RangeFetcher>,
        content: ContentRef,
    },
    /// Local bytes not uploaded yet
    Staged(Bytes),
}

/// Reads byte ranges of a file, sequentially or at random (seeking)
///
/// A reader is bound to the revision the file had when it was opened.
/// Reads never mix bytes of two revisions; after a remote change, open a
/// new reader to see the new content.
pub struct Reader {
    file_id: NodeId,
    size: u64,
    source: Source,
    /// Bytes per second, 0 when unknown
    bitrate: AtomicU64,
}

impl Reader {
    /// Reader over remote content at the node's current revision
    ///
    /// # Errors
    /// `StreamError::NoRevision` if the node was never seen by the remote.
    pub fn remote(fetcher: Arc<RangeFetcher>, node: &FileNode) -> Result<Self, StreamError> {
        let revision = node
            .revision_tag()
            .cloned()
            .ok_or_else(|| StreamError::NoRevision(node.id().clone()))?;
        Ok(Self {
            file_id: node.id().clone(),
            size: node.size_bytes(),
            source: Source::Remote {
                fetcher,
                content: ContentRef {
                    file_id: node.id().clone(),
                    revision,
                    size: node.size_bytes(),
                },
            },
            bitrate: AtomicU64::new(0),
        })
    }

    /// Reader over content staged locally for upload
    pub fn staged(node: &FileNode, data: Bytes) -> Self {
        Self {
            file_id: node.id().clone(),
            size: data.len() as u64,
            source: Source::Staged(data),
            bitrate: AtomicU64::new(0),
        }
    }

    pub fn file_id(&self) -> &NodeId {
        &self.file_id
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Revision the reader is bound to; `None` for staged content
    pub fn revision(&self) -> Option<&RevisionTag> {
        match &self.source {
            Source::Remote { content, .. } => Some(&content.revision),
            Source::Staged(_) => None,
        }
    }

    /// Sets the playback rate used to size prefetches, `None` to clear it
    pub fn set_bitrate_hint(&self, bytes_per_sec: Option<u64>) {
        self.bitrate
            .store(bytes_per_sec.unwrap_or(0), Ordering::Relaxed);
    }

    fn chunk(&self, fetcher: &RangeFetcher) -> u64 {
        let rate = self.bitrate.load(Ordering::Relaxed);
        fetcher
            .prefetch()
            .chunk_for((rate > 0).then_some(rate))
    }

    /// Bytes in `[start, end)`, truncated at end of file
    ///
    /// # Errors
    /// `StreamError::InvalidRange` if `start > end`, `StreamError::Fetch`
    /// when the remote fetch fails after retries.
    pub async fn read_range(&self, start: u64, end: u64) -> Result<Bytes, StreamError> {
        let wanted = ByteRange::new(start, end)?;
        match &self.source {
            Source::Remote { fetcher, content } => {
                fetcher.fetch(content, wanted, self.chunk(fetcher)).await
            }
            Source::Staged(data) => Ok(slice_staged(data, wanted)),
        }
    }

    /// Like [`read_range`](Self::read_range), abandoning the wait when
    /// `cancel` fires
    ///
    /// Other readers waiting on the same remote fetch are not affected.
    pub async fn read_range_cancellable(
        &self,
        start: u64,
        end: u64,
        cancel: &CancellationToken,
    ) -> Result<Bytes, StreamError> {
        let wanted = ByteRange::new(start, end)?;
        if cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        match &self.source {
            Source::Remote { fetcher, content } => {
                fetcher
                    .fetch_cancellable(content, wanted, self.chunk(fetcher), cancel)
                    .await
            }
            Source::Staged(data) => Ok(slice_staged(data, wanted)),
        }
    }
}

fn slice_staged(data: &Bytes, wanted: ByteRange) -> Bytes {
    let wanted = wanted.clamp_end(data.len() as u64);
    data.slice(wanted.start() as usize..wanted.end() as usize)
}

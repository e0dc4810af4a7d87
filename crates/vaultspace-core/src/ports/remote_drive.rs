//! Remote drive port (driven/secondary port)
//!
//! This module defines the interface the engine uses to talk to the cloud
//! drive. The transport, authentication and provider-specific paging live
//! in the adapter; the engine only sees items, cursors and byte ranges.
//!
//! ## Design Notes
//!
//! - Errors are typed ([`RemoteError`]) because the engine must tell
//!   `Unauthorized`, `NotFound`, `RateLimited` and transient failures apart.
//! - Implementations should not retry internally; retry budgets belong to
//!   the sync coordinator and the range fetcher.
//! - Uses `#[async_trait]` for async trait methods.

use bytes::Bytes;

use crate::domain::{NodeId, RemoteItem, RevisionTag, SyncCursor};
use crate::error::RemoteError;

/// Items changed since a cursor, plus the cursor to resume from next time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBatch {
    /// Created, updated and deleted items, in provider order
    pub items: Vec<RemoteItem>,
    /// Cursor positioned after this batch
    pub new_cursor: SyncCursor,
}

/// Result of a successful upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Server-assigned id
    pub remote_id: NodeId,
    /// Revision of the uploaded content
    pub revision_tag: RevisionTag,
}

/// Port trait for remote drive operations
#[async_trait::async_trait]
pub trait IRemoteDrive: Send + Sync {
    /// Returns a cursor positioned at "now" in the change stream
    ///
    /// Taken before a full listing so that changes made while walking the
    /// tree are replayed by the next incremental cycle.
    async fn start_cursor(&self) -> Result<SyncCursor, RemoteError>;

    /// Lists all changes since `cursor`
    ///
    /// # Errors
    /// `RemoteError::CursorExpired` when the provider no longer accepts the
    /// cursor and a full listing is required.
    async fn list_changes(&self, cursor: &SyncCursor) -> Result<ChangeBatch, RemoteError>;

    /// Lists the direct children of a folder (root sentinel for the top)
    async fn list_all(&self, parent_id: &NodeId) -> Result<Vec<RemoteItem>, RemoteError>;

    /// Downloads the half-open byte range `[start, end)` of a file
    ///
    /// The result may be shorter than requested when `end` lies past the
    /// end of the file.
    async fn fetch_range(&self, file_id: &NodeId, start: u64, end: u64)
        -> Result<Bytes, RemoteError>;

    /// Uploads new content as a new file under `parent_id`
    async fn upload(
        &self,
        data: Bytes,
        parent_id: &NodeId,
        name: &str,
        mime_type: &str,
    ) -> Result<UploadReceipt, RemoteError>;

    /// Replaces the content of an existing file
    async fn update_content(
        &self,
        file_id: &NodeId,
        data: Bytes,
    ) -> Result<UploadReceipt, RemoteError>;

    /// Deletes a file or folder (folders recursively)
    async fn delete(&self, remote_id: &NodeId) -> Result<(), RemoteError>;

    /// Renames an item and returns its updated metadata
    async fn rename(&self, remote_id: &NodeId, new_name: &str) -> Result<RemoteItem, RemoteError>;

    /// Creates a folder and returns its metadata
    async fn create_folder(&self, parent_id: &NodeId, name: &str)
        -> Result<RemoteItem, RemoteError>;
}

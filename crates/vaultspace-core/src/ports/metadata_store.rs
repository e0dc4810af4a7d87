//! Metadata store port (driven/secondary port)
//!
//! Durable local mirror of the remote tree. Listings and searches are
//! answered from here without network access, so the UI always sees the
//! best-known snapshot, even while a sync cycle is failing.
//!
//! ## Consistency
//!
//! Every mutating method is atomic with respect to concurrent readers:
//! a subtree delete is a single transaction, so no reader can observe a
//! child whose parent is already gone.

use std::collections::HashMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::domain::{ConflictRecord, FileNode, NodeId, RevisionTag, SyncCursor, SyncState};
use crate::error::StoreError;

/// Local content waiting to be pushed, with its failure ledger
#[derive(Debug, Clone)]
pub struct StagedUpload {
    /// Node the content belongs to
    pub node_id: NodeId,
    /// Bytes to upload
    pub data: Bytes,
    /// Upload attempts that failed so far
    pub attempts: u32,
    /// Last failure message
    pub last_error: Option<String>,
    /// Whether the last failure may clear up by itself
    pub retryable: bool,
    /// When the content was staged
    pub staged_at: DateTime<Utc>,
}

impl StagedUpload {
    /// True when later cycles should skip this upload until a user retries it
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.last_error.is_some() && !self.retryable
    }
}

/// Port trait for the persistent metadata store
#[async_trait::async_trait]
pub trait IMetadataStore: Send + Sync {
    // --- nodes ---

    /// Inserts or replaces a node by id
    ///
    /// # Errors
    /// `StoreError::Validation` if the parent does not exist or the write
    /// would make the node its own ancestor.
    async fn upsert(&self, node: &FileNode) -> Result<(), StoreError>;

    /// Looks up a node by id
    async fn get(&self, id: &NodeId) -> Result<Option<FileNode>, StoreError>;

    /// Direct children of a folder, ordered by name (case-insensitive)
    async fn list_children(&self, parent_id: &NodeId) -> Result<Vec<FileNode>, StoreError>;

    /// Records a local-origin state transition
    ///
    /// # Errors
    /// `StoreError::NotFound` for an unknown id, `StoreError::Validation`
    /// for an illegal transition.
    async fn mark_pending(&self, id: &NodeId, state: SyncState) -> Result<FileNode, StoreError>;

    /// Removes a node and its full subtree; returns the ids removed
    async fn delete(&self, id: &NodeId) -> Result<Vec<NodeId>, StoreError>;

    /// Case-insensitive substring search on names, ordered by name
    async fn search(&self, query: &str) -> Result<Vec<FileNode>, StoreError>;

    /// All nodes in a given state
    async fn list_by_state(&self, state: SyncState) -> Result<Vec<FileNode>, StoreError>;

    /// Node counts keyed by state
    async fn count_by_state(&self) -> Result<HashMap<SyncState, u64>, StoreError>;

    /// Every node id currently stored
    async fn all_ids(&self) -> Result<Vec<NodeId>, StoreError>;

    /// Moves a provisional node to its server id, marking it Synced
    async fn rekey(
        &self,
        old_id: &NodeId,
        new_id: &NodeId,
        revision: &RevisionTag,
    ) -> Result<FileNode, StoreError>;

    // --- cursor ---

    /// Last fully applied change-stream position
    async fn get_cursor(&self) -> Result<Option<SyncCursor>, StoreError>;

    /// Persists a new cursor
    async fn set_cursor(&self, cursor: &SyncCursor) -> Result<(), StoreError>;

    /// Forgets the cursor, forcing a full listing on the next cycle
    async fn clear_cursor(&self) -> Result<(), StoreError>;

    // --- staged uploads ---

    /// Stores local content for a node and writes the node in the same
    /// transaction
    async fn stage_upload(&self, node: &FileNode, data: Bytes) -> Result<(), StoreError>;

    /// Staged content for a node
    async fn staged_upload(&self, id: &NodeId) -> Result<Option<StagedUpload>, StoreError>;

    /// Drops staged content
    async fn discard_upload(&self, id: &NodeId) -> Result<(), StoreError>;

    /// Records a failed push attempt
    async fn record_upload_failure(
        &self,
        id: &NodeId,
        error: &str,
        retryable: bool,
    ) -> Result<(), StoreError>;

    /// Clears the failure ledger so the next cycle retries
    async fn clear_upload_failure(&self, id: &NodeId) -> Result<(), StoreError>;

    /// Staged uploads with a recorded failure
    async fn failed_uploads(&self) -> Result<Vec<StagedUpload>, StoreError>;

    // --- conflicts ---

    /// Inserts or refreshes a conflict record
    async fn save_conflict(&self, record: &ConflictRecord) -> Result<(), StoreError>;

    /// Conflict record for a node
    async fn get_conflict(&self, id: &NodeId) -> Result<Option<ConflictRecord>, StoreError>;

    /// All open conflicts, oldest first
    async fn list_conflicts(&self) -> Result<Vec<ConflictRecord>, StoreError>;

    /// Removes a conflict record
    async fn remove_conflict(&self, id: &NodeId) -> Result<(), StoreError>;
}

//! Vault facade - the single entry point for the UI and the player
//!
//! Listings and search are answered from the metadata store only, so they
//! keep working while the remote is unreachable. Bytes go through the
//! range fetcher. Every mutation is delegated to the sync coordinator so
//! it is published on the change bus. The facade adds no retries of its
//! own: errors arrive here after the coordinator or fetcher gave up.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use vaultspace_core::domain::{
    ChangeEvent, ConflictRecord, FileNode, NodeId, Resolution, SyncState,
};
use vaultspace_core::ports::{IMetadataStore, StagedUpload};
use vaultspace_core::VaultError;
use vaultspace_stream::{ContentCache, RangeFetcher, Reader};
use vaultspace_sync::{Subscription, SyncCoordinator, SyncPhase, SyncReport};

/// Mime type used when the caller does not name one
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Snapshot of the engine for status displays
#[derive(Debug, Clone, Serialize)]
pub struct VaultStatus {
    /// Node count per sync state, every state present
    pub nodes: BTreeMap<&'static str, u64>,
    pub phase: SyncPhase,
    pub last_report: Option<SyncReport>,
    pub last_error: Option<String>,
    /// Whether the next cycle is incremental
    pub has_cursor: bool,
    pub open_conflicts: usize,
    pub failed_uploads: usize,
    pub cache_used_bytes: u64,
    pub cache_max_bytes: u64,
    pub cache_entries: usize,
    /// Bytes in the on-disk mirror, `None` when persistence is off
    pub cache_disk_bytes: Option<u64>,
}

impl VaultStatus {
    /// Total number of mirrored nodes
    pub fn total_nodes(&self) -> u64 {
        self.nodes.values().sum()
    }
}

/// Cloneable handle over one engine
#[derive(Clone)]
pub struct Vault {
    coordinator: Arc<SyncCoordinator>,
    fetcher: Arc<RangeFetcher>,
}

impl Vault {
    pub fn new(coordinator: Arc<SyncCoordinator>, fetcher: Arc<RangeFetcher>) -> Self {
        Self {
            coordinator,
            fetcher,
        }
    }

    fn store(&self) -> &Arc<dyn IMetadataStore> {
        self.coordinator.store()
    }

    fn cache(&self) -> &Arc<ContentCache> {
        self.fetcher.cache()
    }

    // ========================================================================
    // Reading the mirror
    // ========================================================================

    /// One node by id
    pub async fn get(&self, id: &NodeId) -> Result<FileNode, VaultError> {
        self.store()
            .get(id)
            .await?
            .ok_or_else(|| VaultError::NotFound(id.to_string()))
    }

    /// Children of a folder ordered by name, case-insensitively
    ///
    /// # Errors
    /// `VaultError::NotFound` for an unknown folder, `VaultError::Validation`
    /// when `folder_id` is a file.
    pub async fn list(&self, folder_id: &NodeId) -> Result<Vec<FileNode>, VaultError> {
        if !folder_id.is_root() {
            let folder = self.get(folder_id).await?;
            if !folder.is_folder() {
                return Err(VaultError::Validation(format!("{folder_id} is not a folder")));
            }
        }
        Ok(self.store().list_children(folder_id).await?)
    }

    /// Nodes whose name contains `query`, case-insensitively
    pub async fn search(&self, query: &str) -> Result<Vec<FileNode>, VaultError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.store().search(query).await?)
    }

    /// Opens a reader over a file's content
    ///
    /// Content staged for upload is served from the staging area; anything
    /// else is read from the remote at the node's current revision.
    ///
    /// # Errors
    /// `VaultError::Validation` for folders, `VaultError::NotFound` for
    /// unknown ids or files with no content anywhere yet.
    pub async fn open_reader(&self, file_id: &NodeId) -> Result<Reader, VaultError> {
        let node = self.get(file_id).await?;
        if node.is_folder() {
            return Err(VaultError::Validation(format!("{file_id} is a folder")));
        }

        if matches!(
            node.sync_state(),
            SyncState::PendingUpload | SyncState::Conflict
        ) {
            if let Some(staged) = self.store().staged_upload(file_id).await? {
                debug!(node_id = %file_id, "Reading staged content");
                return Ok(Reader::staged(&node, staged.data));
            }
        }

        Ok(Reader::remote(Arc::clone(&self.fetcher), &node)?)
    }

    // ========================================================================
    // Local mutations
    // ========================================================================

    /// Stages `data` as `name` under `parent_id`; see
    /// [`SyncCoordinator::create_upload`]
    pub async fn create_upload(
        &self,
        data: Bytes,
        parent_id: &NodeId,
        name: &str,
        mime_type: Option<&str>,
    ) -> Result<FileNode, VaultError> {
        let mime_type = mime_type.unwrap_or(DEFAULT_MIME_TYPE);
        Ok(self
            .coordinator
            .create_upload(data, parent_id, name, mime_type)
            .await?)
    }

    pub async fn request_delete(&self, id: &NodeId) -> Result<(), VaultError> {
        Ok(self.coordinator.request_delete(id).await?)
    }

    pub async fn rename(&self, id: &NodeId, new_name: &str) -> Result<FileNode, VaultError> {
        Ok(self.coordinator.rename(id, new_name).await?)
    }

    /// Find-or-create a child folder
    pub async fn ensure_folder(&self, parent_id: &NodeId, name: &str) -> Result<FileNode, VaultError> {
        Ok(self.coordinator.ensure_folder(parent_id, name).await?)
    }

    // ========================================================================
    // Conflicts and the upload ledger
    // ========================================================================

    pub async fn conflicts(&self) -> Result<Vec<ConflictRecord>, VaultError> {
        Ok(self.store().list_conflicts().await?)
    }

    /// Applies an explicit decision; `None` when the node was removed
    pub async fn resolve_conflict(
        &self,
        id: &NodeId,
        resolution: Resolution,
    ) -> Result<Option<FileNode>, VaultError> {
        Ok(self.coordinator.resolve_conflict(id, resolution).await?)
    }

    pub async fn failed_uploads(&self) -> Result<Vec<StagedUpload>, VaultError> {
        Ok(self.store().failed_uploads().await?)
    }

    pub async fn retry_upload(&self, id: &NodeId) -> Result<(), VaultError> {
        Ok(self.coordinator.retry_upload(id).await?)
    }

    // ========================================================================
    // Change notifications
    // ========================================================================

    pub fn subscribe(&self) -> Subscription {
        self.coordinator.subscribe()
    }

    /// Feeds every change event to `callback` until the engine is dropped
    ///
    /// A `ChangeEvent::Resync` means events were missed and the caller
    /// should reload what it displays.
    pub fn on_change<F>(&self, mut callback: F) -> JoinHandle<()>
    where
        F: FnMut(ChangeEvent) + Send + 'static,
    {
        let mut subscription = self.subscribe();
        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                callback(event);
            }
            debug!("Change bus closed, callback task ending");
        })
    }

    // ========================================================================
    // Sync and maintenance
    // ========================================================================

    /// Runs one reconciliation cycle now, after any cycle in progress
    pub async fn sync_now(&self) -> Result<SyncReport, VaultError> {
        Ok(self.coordinator.run_cycle().await?)
    }

    pub async fn status(&self) -> Result<VaultStatus, VaultError> {
        let counts = self.store().count_by_state().await?;
        let nodes = SyncState::ALL
            .iter()
            .map(|state| (state.as_str(), counts.get(state).copied().unwrap_or(0)))
            .collect();
        let usage = self.cache().usage();

        Ok(VaultStatus {
            nodes,
            phase: self.coordinator.state(),
            last_report: self.coordinator.last_report(),
            last_error: self.coordinator.last_error(),
            has_cursor: self.store().get_cursor().await?.is_some(),
            open_conflicts: self.store().list_conflicts().await?.len(),
            failed_uploads: self.store().failed_uploads().await?.len(),
            cache_used_bytes: usage.used_bytes,
            cache_max_bytes: usage.max_bytes,
            cache_entries: usage.entries,
            cache_disk_bytes: self.cache().disk_usage(),
        })
    }

    /// Drops all cached content, in memory and on disk
    pub fn clear_cache(&self) -> Result<(), VaultError> {
        self.cache()
            .clear()
            .map_err(|e| VaultError::Storage(format!("Failed to clear content cache: {e}")))?;
        info!("Content cache cleared");
        Ok(())
    }
}

//! Local-origin mutations
//!
//! Uploads, deletes, renames, folder creation and conflict decisions made
//! by the user. They all go through the [`SyncCoordinator`] so that every
//! write to the mirror is published on its event bus. Uploads and deletes
//! only stage the intent; the next cycle pushes them. Renames and folder
//! creation call the remote directly because the UI needs the result.

use bytes::Bytes;
use tracing::{debug, info};
use vaultspace_core::domain::{
    ChangeEvent, DomainError, FileNode, NodeId, Resolution, SyncState,
};
use vaultspace_core::retry::with_retry;
use vaultspace_core::StoreError;

use crate::coordinator::SyncCoordinator;
use crate::SyncError;

impl SyncCoordinator {
    async fn node(&self, id: &NodeId) -> Result<FileNode, SyncError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| SyncError::NotFound(id.clone()))
    }

    /// Checks that `parent_id` is the root or an existing folder
    async fn check_parent(&self, parent_id: &NodeId) -> Result<(), SyncError> {
        if parent_id.is_root() {
            return Ok(());
        }
        let parent = self.node(parent_id).await?;
        if !parent.is_folder() {
            return Err(DomainError::NotAFolder(parent_id.to_string()).into());
        }
        Ok(())
    }

    async fn child_named(
        &self,
        parent_id: &NodeId,
        name: &str,
    ) -> Result<Option<FileNode>, SyncError> {
        Ok(self
            .store
            .list_children(parent_id)
            .await?
            .into_iter()
            .find(|n| n.name() == name))
    }

    // ========================================================================
    // Uploads
    // ========================================================================

    /// Stages `data` for upload as `name` under `parent_id`
    ///
    /// An existing file with the same name gets its content replaced and
    /// keeps its id. Otherwise a node with a provisional id is created. The
    /// node is `PendingUpload` until a cycle pushes it.
    ///
    /// # Errors
    /// `SyncError::Conflict` if the existing file is in conflict,
    /// `SyncError::Validation` if the name is taken by a folder or the
    /// existing file is pending deletion.
    pub async fn create_upload(
        &self,
        data: Bytes,
        parent_id: &NodeId,
        name: &str,
        mime_type: &str,
    ) -> Result<FileNode, SyncError> {
        self.check_parent(parent_id).await?;
        let size = data.len() as u64;

        let node = match self.child_named(parent_id, name).await? {
            Some(existing) if existing.is_folder() => {
                return Err(DomainError::InvalidName(format!("{name} is a folder")).into());
            }
            Some(existing) if existing.sync_state() == SyncState::Conflict => {
                return Err(SyncError::Conflict(existing.id().clone()));
            }
            Some(mut existing) => {
                existing.transition_to(SyncState::PendingUpload)?;
                existing.set_size(size);
                existing
            }
            None => FileNode::new_local_file(parent_id.clone(), name, mime_type, size)?,
        };

        self.store.stage_upload(&node, data).await?;
        info!(
            node_id = %node.id(),
            parent_id = %parent_id,
            bytes = size,
            "Upload staged"
        );
        self.publish_upserted(&node);
        Ok(node)
    }

    /// Clears a recorded upload failure so the next cycle tries again
    pub async fn retry_upload(&self, id: &NodeId) -> Result<(), SyncError> {
        match self.store.clear_upload_failure(id).await {
            Ok(()) => {
                info!(node_id = %id, "Upload retry requested");
                Ok(())
            }
            Err(StoreError::NotFound(_)) => Err(SyncError::NotFound(id.clone())),
            Err(err) => Err(err.into()),
        }
    }

    // ========================================================================
    // Deletes
    // ========================================================================

    /// Marks a node for remote deletion
    ///
    /// A node that never reached the remote is removed right away. Staged
    /// content and any open conflict on the node are dropped.
    pub async fn request_delete(&self, id: &NodeId) -> Result<(), SyncError> {
        if id.is_root() {
            return Err(DomainError::RootImmutable.into());
        }
        let node = self.node(id).await?;

        if id.is_provisional() {
            self.remove_local(&node).await?;
            info!(node_id = %id, "Discarded local creation");
            return Ok(());
        }

        let marked = self.store.mark_pending(id, SyncState::PendingDelete).await?;
        match node.sync_state() {
            SyncState::PendingUpload => self.store.discard_upload(id).await?,
            SyncState::Conflict => {
                self.store.discard_upload(id).await?;
                self.store.remove_conflict(id).await?;
            }
            _ => {}
        }

        info!(node_id = %id, "Delete requested");
        self.publish_upserted(&marked);
        Ok(())
    }

    // ========================================================================
    // Renames and folders
    // ========================================================================

    /// Renames a node
    ///
    /// Nodes that exist remotely are renamed there first and adopt the
    /// revision the remote reports; provisional nodes are renamed locally.
    pub async fn rename(&self, id: &NodeId, new_name: &str) -> Result<FileNode, SyncError> {
        if id.is_root() {
            return Err(DomainError::RootImmutable.into());
        }
        let mut node = self.node(id).await?;
        if node.sync_state() == SyncState::Conflict {
            return Err(SyncError::Conflict(id.clone()));
        }
        node.rename(new_name)?;

        if id.is_provisional() {
            self.store.upsert(&node).await?;
            debug!(node_id = %id, name = new_name, "Renamed local creation");
            self.publish_upserted(&node);
            return Ok(node);
        }

        let item = with_retry(&self.retry, "rename", || self.remote.rename(id, new_name)).await?;

        let mut current = self.node(id).await?;
        let previous = current.revision_tag().cloned();
        current.rename(item.name.clone())?;
        match (current.sync_state(), item.revision_tag.clone()) {
            (SyncState::Synced | SyncState::Stale, Some(revision)) => current.mark_synced(revision),
            (_, revision) => current.set_revision(revision),
        }
        self.store.upsert(&current).await?;
        if previous.as_ref() != current.revision_tag() {
            self.cache.invalidate(id);
        }

        info!(node_id = %id, name = current.name(), "Renamed");
        self.publish_upserted(&current);
        Ok(current)
    }

    /// Returns the child folder called `name`, creating it remotely if
    /// it does not exist
    ///
    /// # Errors
    /// `SyncError::Validation` if a file already uses the name.
    pub async fn ensure_folder(&self, parent_id: &NodeId, name: &str) -> Result<FileNode, SyncError> {
        self.check_parent(parent_id).await?;

        if let Some(existing) = self.child_named(parent_id, name).await? {
            if existing.is_folder() {
                return Ok(existing);
            }
            return Err(DomainError::InvalidName(format!("{name} is not a folder")).into());
        }

        let parent_id = &self.restore_placeholders(parent_id).await?;
        let item = with_retry(&self.retry, "create_folder", || {
            self.remote.create_folder(parent_id, name)
        })
        .await?;
        let node = FileNode::from_remote(&item)?;
        self.store.upsert(&node).await?;

        info!(node_id = %node.id(), parent_id = %parent_id, name, "Folder created");
        self.publish_upserted(&node);
        Ok(node)
    }

    // ========================================================================
    // Conflicts
    // ========================================================================

    /// Applies an explicit decision to a conflicted node
    ///
    /// - `KeepLocal`: the remote revision becomes the new base and the node
    ///   returns to `PendingUpload`, so the next cycle pushes it over.
    /// - `KeepRemote`: staged content is dropped and the remote snapshot is
    ///   written as `Stale` (or the node removed when the remote deleted
    ///   it); cached content is invalidated.
    ///
    /// Returns the node as it stands afterwards, `None` if it was removed.
    pub async fn resolve_conflict(
        &self,
        id: &NodeId,
        resolution: Resolution,
    ) -> Result<Option<FileNode>, SyncError> {
        let record = self
            .store
            .get_conflict(id)
            .await?
            .ok_or_else(|| SyncError::NotFound(id.clone()))?;
        let node = self.node(id).await?;
        let same_item = record.remote.id == *id;

        let outcome = match resolution {
            Resolution::KeepLocal => {
                let mut node = node;
                if same_item {
                    node.set_revision(record.remote.revision_tag.clone());
                }
                node.transition_to(SyncState::PendingUpload)?;
                self.store.upsert(&node).await?;
                self.store.remove_conflict(id).await?;
                match self.store.clear_upload_failure(id).await {
                    Ok(()) | Err(StoreError::NotFound(_)) => {}
                    Err(err) => return Err(err.into()),
                }
                self.publish_upserted(&node);
                Some(node)
            }
            Resolution::KeepRemote => {
                self.store.discard_upload(id).await?;
                if record.remote_deleted() || !same_item {
                    self.remove_local(&node).await?;
                }
                if record.remote_deleted() {
                    None
                } else {
                    let mut adopted = FileNode::from_remote(&record.remote)?;
                    adopted.transition_to(SyncState::Stale)?;
                    self.store.upsert(&adopted).await?;
                    self.store.remove_conflict(id).await?;
                    self.cache.invalidate(adopted.id());
                    self.publish_upserted(&adopted);
                    Some(adopted)
                }
            }
        };

        info!(node_id = %id, %resolution, "Conflict resolved");
        self.events.publish(ChangeEvent::ConflictResolved {
            node_id: id.clone(),
            resolution,
        });
        Ok(outcome)
    }
}

//! FileNode entity and its sync state machine
//!
//! A `FileNode` mirrors one remote file or folder. The metadata store owns
//! every node; the sync coordinator is the only component that rewrites
//! them, local mutations included.
//!
//! ## State Machine
//!
//! ```text
//!   Synced ──createUpload──► PendingUpload ──upload ok──► Synced
//!     │                          │
//!     │ requestDelete            │ remote revision moved
//!     ▼                          ▼
//!   PendingDelete            Conflict ──keep_local──► PendingUpload
//!     │                          │
//!     │ remote delete ok         │ keep_remote
//!     ▼                          ▼
//!   (removed)                  Stale ──next cycle──► Synced
//! ```

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{NodeId, RevisionTag};
use super::remote_item::RemoteItem;

/// Mime type the provider uses for folders
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

// ============================================================================
// SyncState
// ============================================================================

/// Local reconciliation state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Local metadata matches the last confirmed remote revision
    Synced,
    /// Local content waits to be pushed to the remote
    PendingUpload,
    /// Local delete waits to be confirmed by the remote
    PendingDelete,
    /// Metadata may be behind the remote and waits for confirmation
    Stale,
    /// Local and remote changed concurrently; needs an explicit decision
    Conflict,
}

impl SyncState {
    /// All states, in display order
    pub const ALL: [SyncState; 5] = [
        SyncState::Synced,
        SyncState::PendingUpload,
        SyncState::PendingDelete,
        SyncState::Stale,
        SyncState::Conflict,
    ];

    /// Storage / wire representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Synced => "synced",
            SyncState::PendingUpload => "pending_upload",
            SyncState::PendingDelete => "pending_delete",
            SyncState::Stale => "stale",
            SyncState::Conflict => "conflict",
        }
    }

    /// True for the two local-origin states queued for the coordinator
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, SyncState::PendingUpload | SyncState::PendingDelete)
    }

    /// Whether a remote report may overwrite a node in this state
    #[must_use]
    pub fn accepts_remote(&self) -> bool {
        matches!(self, SyncState::Synced | SyncState::Stale)
    }

    /// Checks whether `self -> target` is a legal transition
    #[must_use]
    pub fn can_transition_to(&self, target: SyncState) -> bool {
        use SyncState::*;
        match (self, target) {
            (a, b) if *a == b => true,
            (Synced | Stale, _) => target != Conflict,
            (PendingUpload, Synced | PendingDelete | Conflict) => true,
            (Conflict, PendingUpload | Stale | PendingDelete) => true,
            _ => false,
        }
    }
}

impl Display for SyncState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SyncState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| DomainError::InvalidState {
                from: s.to_string(),
                to: "<parse>".to_string(),
            })
    }
}

// ============================================================================
// FileNode
// ============================================================================

/// A remote file or folder mirrored locally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    id: NodeId,
    parent_id: NodeId,
    name: String,
    mime_type: String,
    size_bytes: u64,
    revision_tag: Option<RevisionTag>,
    sync_state: SyncState,
    last_synced_at: Option<DateTime<Utc>>,
    modified_at: Option<DateTime<Utc>>,
}

fn validate_name(name: &str) -> Result<(), DomainError> {
    if name.trim().is_empty() {
        return Err(DomainError::InvalidName("Name cannot be empty".to_string()));
    }
    if name.contains('\0') {
        return Err(DomainError::InvalidName(format!(
            "Name contains a NUL byte: {name:?}"
        )));
    }
    Ok(())
}

impl FileNode {
    /// Creates a node with every field given explicitly
    ///
    /// Used by storage adapters to rebuild persisted rows.
    ///
    /// # Errors
    /// Returns error if the node is the root sentinel, is its own parent,
    /// or has an empty name.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: NodeId,
        parent_id: NodeId,
        name: String,
        mime_type: String,
        size_bytes: u64,
        revision_tag: Option<RevisionTag>,
        sync_state: SyncState,
        last_synced_at: Option<DateTime<Utc>>,
        modified_at: Option<DateTime<Utc>>,
    ) -> Result<Self, DomainError> {
        if id.is_root() {
            return Err(DomainError::RootImmutable);
        }
        if id == parent_id {
            return Err(DomainError::ParentCycle {
                node: id.to_string(),
                parent: parent_id.to_string(),
            });
        }
        validate_name(&name)?;
        let size_bytes = if mime_type == FOLDER_MIME_TYPE {
            0
        } else {
            size_bytes
        };
        Ok(Self {
            id,
            parent_id,
            name,
            mime_type,
            size_bytes,
            revision_tag,
            sync_state,
            last_synced_at,
            modified_at,
        })
    }

    /// A node created locally that still has to be uploaded
    ///
    /// # Errors
    /// Returns error if the name is empty.
    pub fn new_local_file(
        parent_id: NodeId,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        size_bytes: u64,
    ) -> Result<Self, DomainError> {
        Self::from_parts(
            NodeId::provisional(),
            parent_id,
            name.into(),
            mime_type.into(),
            size_bytes,
            None,
            SyncState::PendingUpload,
            None,
            Some(Utc::now()),
        )
    }

    /// A node reflecting a confirmed remote item
    ///
    /// # Errors
    /// Returns error if the remote item violates a domain invariant.
    pub fn from_remote(item: &RemoteItem) -> Result<Self, DomainError> {
        Self::from_parts(
            item.id.clone(),
            item.parent_id.clone(),
            item.name.clone(),
            item.mime_type.clone(),
            item.size_bytes,
            item.revision_tag.clone(),
            SyncState::Synced,
            Some(Utc::now()),
            item.modified_at,
        )
    }

    /// Node identifier
    #[must_use]
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Containing folder, or the root sentinel
    #[must_use]
    pub fn parent_id(&self) -> &NodeId {
        &self.parent_id
    }

    /// Display name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mime type as reported by the remote
    #[must_use]
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Content size in bytes; always zero for folders
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Last known remote revision. For `PendingUpload` nodes this is the
    /// base revision the local content was written against.
    #[must_use]
    pub fn revision_tag(&self) -> Option<&RevisionTag> {
        self.revision_tag.as_ref()
    }

    /// Current reconciliation state
    #[must_use]
    pub fn sync_state(&self) -> SyncState {
        self.sync_state
    }

    /// Time of the last successful reconciliation
    #[must_use]
    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        self.last_synced_at
    }

    /// Remote modification time, when known
    #[must_use]
    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        self.modified_at
    }

    /// Returns true for folders
    #[must_use]
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    /// Moves the node to a new state, enforcing the state machine
    ///
    /// # Errors
    /// Returns `DomainError::InvalidState` on an illegal transition.
    pub fn transition_to(&mut self, target: SyncState) -> Result<(), DomainError> {
        if !self.sync_state.can_transition_to(target) {
            return Err(DomainError::InvalidState {
                from: self.sync_state.to_string(),
                to: target.to_string(),
            });
        }
        self.sync_state = target;
        Ok(())
    }

    /// Records a confirmed remote revision and marks the node Synced
    pub fn mark_synced(&mut self, revision: RevisionTag) {
        self.revision_tag = Some(revision);
        self.sync_state = SyncState::Synced;
        self.last_synced_at = Some(Utc::now());
    }

    /// Replaces the base revision without touching the state
    pub fn set_revision(&mut self, revision: Option<RevisionTag>) {
        self.revision_tag = revision;
    }

    /// Renames the node
    ///
    /// # Errors
    /// Returns error if the new name is empty.
    pub fn rename(&mut self, name: impl Into<String>) -> Result<(), DomainError> {
        let name = name.into();
        validate_name(&name)?;
        self.name = name;
        Ok(())
    }

    /// Updates the content size (files only)
    pub fn set_size(&mut self, size_bytes: u64) {
        if !self.is_folder() {
            self.size_bytes = size_bytes;
        }
    }

    /// Returns a copy carrying a different id, used when a provisional
    /// node is re-keyed to its server id
    #[must_use]
    pub fn with_id(&self, id: NodeId) -> Self {
        Self { id, ..self.clone() }
    }

    /// Whether a remote item describes different metadata than this node
    #[must_use]
    pub fn differs_from(&self, item: &RemoteItem) -> bool {
        self.revision_tag.as_ref() != item.revision_tag.as_ref()
            || self.parent_id != item.parent_id
            || self.name != item.name
            || (!self.is_folder() && self.size_bytes != item.size_bytes)
    }
}

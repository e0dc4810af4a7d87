//! Remote item snapshot
//!
//! Raw metadata for one item exactly as the remote drive reported it,
//! either from a full listing or from the change stream. It is a
//! value object: the sync coordinator maps it onto `FileNode`s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::file_node::FOLDER_MIME_TYPE;
use super::newtypes::{NodeId, RevisionTag};

/// One item reported by the remote drive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteItem {
    /// Provider-assigned identifier
    pub id: NodeId,
    /// Containing folder (root sentinel for top-level items)
    pub parent_id: NodeId,
    /// Item name
    pub name: String,
    /// Provider mime type
    pub mime_type: String,
    /// Size in bytes (zero for folders and deletions)
    pub size_bytes: u64,
    /// Current revision (None for deleted items)
    pub revision_tag: Option<RevisionTag>,
    /// Last remote modification time
    pub modified_at: Option<DateTime<Utc>>,
    /// Whether the change stream reports this item as removed
    pub is_deleted: bool,
}

impl RemoteItem {
    /// A live file
    #[must_use]
    pub fn file(
        id: NodeId,
        parent_id: NodeId,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        size_bytes: u64,
        revision_tag: RevisionTag,
    ) -> Self {
        Self {
            id,
            parent_id,
            name: name.into(),
            mime_type: mime_type.into(),
            size_bytes,
            revision_tag: Some(revision_tag),
            modified_at: Some(Utc::now()),
            is_deleted: false,
        }
    }

    /// A live folder
    #[must_use]
    pub fn folder(
        id: NodeId,
        parent_id: NodeId,
        name: impl Into<String>,
        revision_tag: RevisionTag,
    ) -> Self {
        Self {
            id,
            parent_id,
            name: name.into(),
            mime_type: FOLDER_MIME_TYPE.to_string(),
            size_bytes: 0,
            revision_tag: Some(revision_tag),
            modified_at: Some(Utc::now()),
            is_deleted: false,
        }
    }

    /// A deletion marker from the change stream
    #[must_use]
    pub fn deleted(id: NodeId, parent_id: NodeId) -> Self {
        Self {
            id,
            parent_id,
            name: String::new(),
            mime_type: String::new(),
            size_bytes: 0,
            revision_tag: None,
            modified_at: None,
            is_deleted: true,
        }
    }

    /// Returns true for folders
    #[must_use]
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }
}

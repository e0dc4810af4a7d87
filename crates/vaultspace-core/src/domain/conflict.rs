//! Conflict records
//!
//! A conflict is raised when a node holds local changes that were never
//! confirmed by the remote while the remote moved on independently. The
//! engine never resolves it by itself; it keeps both sides until an
//! explicit [`Resolution`] is applied.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{NodeId, RevisionTag};
use super::remote_item::RemoteItem;

/// Explicit decision for a conflicted node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Keep the local content and push it over the remote version
    KeepLocal,
    /// Discard the local content and adopt the remote version
    KeepRemote,
}

impl Display for Resolution {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::KeepLocal => write!(f, "keep_local"),
            Resolution::KeepRemote => write!(f, "keep_remote"),
        }
    }
}

impl FromStr for Resolution {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" | "keep_local" | "keep-local" => Ok(Resolution::KeepLocal),
            "remote" | "keep_remote" | "keep-remote" => Ok(Resolution::KeepRemote),
            other => Err(DomainError::InvalidState {
                from: "conflict".to_string(),
                to: other.to_string(),
            }),
        }
    }
}

/// Both sides of a conflicted node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Local node in `Conflict` state
    pub node_id: NodeId,
    /// Base revision the local change was made against
    pub local_revision: Option<RevisionTag>,
    /// Latest remote snapshot (may be a deletion marker)
    pub remote: RemoteItem,
    /// When the conflict was first detected
    pub detected_at: DateTime<Utc>,
}

impl ConflictRecord {
    /// Creates a record detected now
    #[must_use]
    pub fn new(node_id: NodeId, local_revision: Option<RevisionTag>, remote: RemoteItem) -> Self {
        Self {
            node_id,
            local_revision,
            remote,
            detected_at: Utc::now(),
        }
    }

    /// True when the remote side deleted the item
    #[must_use]
    pub fn remote_deleted(&self) -> bool {
        self.remote.is_deleted
    }
}

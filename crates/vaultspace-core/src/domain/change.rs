//! Change notifications emitted whenever the local mirror is mutated

use serde::{Deserialize, Serialize};

use super::conflict::Resolution;
use super::file_node::SyncState;
use super::newtypes::NodeId;

/// A mutation applied to the metadata store
///
/// Delivered at least once to each subscriber that keeps up; there is no
/// ordering guarantee between events of unrelated nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeEvent {
    /// A node was inserted or its metadata changed
    Upserted {
        node_id: NodeId,
        parent_id: NodeId,
        state: SyncState,
    },
    /// A node (and, for folders, its subtree) was removed
    Removed { node_id: NodeId, parent_id: NodeId },
    /// A provisional node received its server id
    Rekeyed { from: NodeId, to: NodeId },
    /// A conflict was detected and awaits a decision
    ConflictDetected { node_id: NodeId },
    /// A conflict was resolved by an explicit decision
    ConflictResolved {
        node_id: NodeId,
        resolution: Resolution,
    },
    /// The subscriber missed events and should reload everything
    Resync,
}

impl ChangeEvent {
    /// The node the event is about, if any
    #[must_use]
    pub fn node_id(&self) -> Option<&NodeId> {
        match self {
            ChangeEvent::Upserted { node_id, .. }
            | ChangeEvent::Removed { node_id, .. }
            | ChangeEvent::ConflictDetected { node_id }
            | ChangeEvent::ConflictResolved { node_id, .. } => Some(node_id),
            ChangeEvent::Rekeyed { to, .. } => Some(to),
            ChangeEvent::Resync => None,
        }
    }
}

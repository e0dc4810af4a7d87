//! Diffing remote items against the local mirror
//!
//! Pure functions: no I/O, no clock. The coordinator loads the local nodes
//! a batch touches, asks [`diff`] for a [`Plan`], and applies it.
//!
//! ## Classification
//!
//! | Local state           | Remote live                      | Remote deleted |
//! |-----------------------|----------------------------------|----------------|
//! | absent                | New (or conflict with a provisional node of the same parent and name) | ignored |
//! | Synced / Stale        | Updated if metadata differs      | Deleted        |
//! | PendingUpload         | Conflict if the revision moved, else deferred | Conflict |
//! | PendingDelete         | deferred                         | Deleted        |
//! | Conflict              | conflict record refreshed        | conflict record refreshed |

use std::collections::{HashMap, HashSet};

use vaultspace_core::domain::{FileNode, NodeId, RemoteItem, SyncState};

/// What to do with one remote item
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Item not known locally
    Create(RemoteItem),
    /// Known item whose metadata or revision changed remotely
    Update { local: FileNode, remote: RemoteItem },
    /// Item removed remotely
    Delete(FileNode),
    /// Local change raced a remote change
    Conflict { local: FileNode, remote: RemoteItem },
    /// Local change waits for the push phase
    Defer(FileNode),
    /// Nothing to do
    Unchanged,
}

/// Ordered actions for one cycle
///
/// `actions` holds creates and updates first (parents before children),
/// then conflicts, then deletes. Deferred and unchanged items are only
/// counted.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Plan {
    pub actions: Vec<Action>,
    pub deferred: usize,
    pub unchanged: usize,
}

impl Plan {
    /// Number of actions of each kind: (creates, updates, deletes, conflicts)
    #[must_use]
    pub fn counts(&self) -> (usize, usize, usize, usize) {
        self.actions
            .iter()
            .fold((0, 0, 0, 0), |(c, u, d, x), action| match action {
                Action::Create(_) => (c + 1, u, d, x),
                Action::Update { .. } => (c, u + 1, d, x),
                Action::Delete(_) => (c, u, d + 1, x),
                Action::Conflict { .. } => (c, u, d, x + 1),
                Action::Defer(_) | Action::Unchanged => (c, u, d, x),
            })
    }
}

/// Classifies one remote item against the local node with the same id
#[must_use]
pub fn classify(local: Option<&FileNode>, remote: &RemoteItem) -> Action {
    let Some(local) = local else {
        return if remote.is_deleted {
            Action::Unchanged
        } else {
            Action::Create(remote.clone())
        };
    };

    let conflict = || Action::Conflict {
        local: local.clone(),
        remote: remote.clone(),
    };

    match (local.sync_state(), remote.is_deleted) {
        (SyncState::Synced | SyncState::Stale | SyncState::PendingDelete, true) => {
            Action::Delete(local.clone())
        }
        (SyncState::PendingUpload | SyncState::Conflict, true) => conflict(),
        (SyncState::Synced | SyncState::Stale, false) => {
            if local.differs_from(remote) {
                Action::Update {
                    local: local.clone(),
                    remote: remote.clone(),
                }
            } else {
                Action::Unchanged
            }
        }
        (SyncState::PendingUpload, false) => {
            if local.revision_tag() != remote.revision_tag.as_ref() {
                conflict()
            } else {
                Action::Defer(local.clone())
            }
        }
        (SyncState::PendingDelete, false) => Action::Defer(local.clone()),
        (SyncState::Conflict, false) => conflict(),
    }
}

/// Builds the plan for a batch of remote items
///
/// * `items` - change-stream batch or full listing; a later entry for the
///   same id supersedes an earlier one
/// * `local` - local nodes keyed by id; must contain every node the batch
///   names, and for a full listing every local node
/// * `provisional` - local creations not uploaded yet
/// * `full_listing` - when set, local nodes missing from `items` count as
///   deleted remotely
#[must_use]
pub fn diff(
    items: Vec<RemoteItem>,
    local: &HashMap<NodeId, FileNode>,
    provisional: &[FileNode],
    full_listing: bool,
) -> Plan {
    let items = dedup_latest(items);

    let mut upserts = Vec::new();
    let mut conflicts = Vec::new();
    let mut deletes = Vec::new();
    let mut plan = Plan::default();
    let mut claimed: HashSet<&NodeId> = HashSet::new();

    let absent: Vec<RemoteItem> = if full_listing {
        let seen: HashSet<&NodeId> = items.iter().map(|i| &i.id).collect();
        local
            .values()
            .filter(|node| !node.id().is_provisional() && !seen.contains(node.id()))
            .map(|node| RemoteItem::deleted(node.id().clone(), node.parent_id().clone()))
            .collect()
    } else {
        Vec::new()
    };

    for remote in items.iter().chain(absent.iter()) {
        let mut action = classify(local.get(&remote.id), remote);

        if let Action::Create(item) = &action {
            if let Some(twin) = provisional.iter().find(|p| {
                !claimed.contains(p.id()) && !item.is_folder() && is_same_slot(p, item)
            }) {
                claimed.insert(twin.id());
                action = Action::Conflict {
                    local: twin.clone(),
                    remote: item.clone(),
                };
            }
        }

        match action {
            Action::Create(_) | Action::Update { .. } => upserts.push(action),
            Action::Conflict { .. } => conflicts.push(action),
            Action::Delete(_) => deletes.push(action),
            Action::Defer(_) => plan.deferred += 1,
            Action::Unchanged => plan.unchanged += 1,
        }
    }

    // Deleted children of a deleted folder go with its cascade; conflicts
    // stay so the local changes below it survive
    let doomed: HashSet<NodeId> = deletes
        .iter()
        .filter_map(|a| match a {
            Action::Delete(node) => Some(node.id().clone()),
            _ => None,
        })
        .collect();
    let covered = |node: &FileNode| doomed.contains(node.parent_id());
    deletes.retain(|a| !matches!(a, Action::Delete(node) if covered(node)));

    sort_parents_first(&mut upserts);

    plan.actions = upserts;
    plan.actions.extend(conflicts);
    plan.actions.extend(deletes);
    plan
}

fn is_same_slot(node: &FileNode, item: &RemoteItem) -> bool {
    node.parent_id() == &item.parent_id && node.name() == item.name
}

fn dedup_latest(items: Vec<RemoteItem>) -> Vec<RemoteItem> {
    let mut index: HashMap<NodeId, usize> = HashMap::new();
    let mut out: Vec<RemoteItem> = Vec::with_capacity(items.len());
    for item in items {
        match index.get(&item.id) {
            Some(&i) => out[i] = item,
            None => {
                index.insert(item.id.clone(), out.len());
                out.push(item);
            }
        }
    }
    out
}

/// Stable sort of creates/updates so a parent in the batch lands first
fn sort_parents_first(upserts: &mut [Action]) {
    let parents: HashMap<NodeId, NodeId> = upserts
        .iter()
        .filter_map(|a| match a {
            Action::Create(item) | Action::Update { remote: item, .. } => {
                Some((item.id.clone(), item.parent_id.clone()))
            }
            _ => None,
        })
        .collect();

    let depth = |id: &NodeId| {
        let mut depth = 0usize;
        let mut current = id;
        while let Some(parent) = parents.get(current) {
            depth += 1;
            current = parent;
            // A cycle in remote data; the store rejects it on write
            if depth > parents.len() {
                break;
            }
        }
        depth
    };

    upserts.sort_by_cached_key(|a| match a {
        Action::Create(item) | Action::Update { remote: item, .. } => depth(&item.id),
        _ => 0,
    });
}

//! Sync coordinator
//!
//! The [`SyncCoordinator`] reconciles the metadata store with the remote
//! drive, one cycle at a time.
//!
//! ## Cycle
//!
//! ```text
//!  Idle ──► Listing ──► Diffing ──► Applying ──► Idle
//!    ▲         │           │           │
//!    │         └───────────┴───────────┴──► Error ──(backoff)──┐
//!    └─────────────────────────────────────────────────────────┘
//! ```
//!
//! 1. **Listing**: changes since the stored cursor, or a breadth-first full
//!    listing when there is no cursor (first run) or it expired
//! 2. **Diffing**: classify every remote item against the local node
//! 3. **Applying**: upsert new/updated nodes (invalidating cached content),
//!    raise conflicts, remove deleted subtrees, confirm stale nodes, then
//!    push local deletes and uploads
//! 4. **Bookkeeping**: persist the new cursor. When an incremental batch
//!    had items the store rejected (a child listed before its parent, a
//!    bad name), the cursor is cleared instead so the next cycle lists
//!    everything and picks them up.
//!
//! A failed step abandons the cycle before the cursor moves, so the same
//! batch is listed again next time. Replaying a batch is harmless: writes
//! are idempotent and unchanged revisions classify as no-ops.
//!
//! ## Retry Logic
//!
//! Remote calls go through [`with_retry`] with the configured policy.
//! Listing failures abort the cycle. Push failures of a single node are
//! recorded in the upload ledger and the cycle goes on, except
//! `Unauthorized`, which aborts.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::{self, Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use vaultspace_core::domain::{
    ByteRange, CacheEntry, ChangeEvent, ConflictRecord, FileNode, NodeId, RemoteItem, SyncCursor,
    SyncState,
};
use vaultspace_core::ports::{IMetadataStore, IRemoteDrive, StagedUpload, UploadReceipt};
use vaultspace_core::retry::{with_retry, RetryPolicy};
use vaultspace_core::{RemoteError, StoreError};
use vaultspace_stream::ContentCache;

use crate::diff::{self, classify, Action, Plan};
use crate::events::{EventBus, Subscription};
use crate::SyncError;

// ============================================================================
// SyncPhase
// ============================================================================

/// Where the coordinator is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Listing,
    Diffing,
    Applying,
    /// The last cycle failed; the scheduler returns to Idle after backoff
    Error,
}

impl Display for SyncPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Listing => "listing",
            SyncPhase::Diffing => "diffing",
            SyncPhase::Applying => "applying",
            SyncPhase::Error => "error",
        };
        f.write_str(s)
    }
}

// ============================================================================
// SyncReport
// ============================================================================

/// Summary of a completed reconciliation cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    /// Whether the cycle walked the whole remote tree
    pub full_listing: bool,
    /// Remote items new to the local mirror
    pub added: u32,
    /// Local nodes refreshed from the remote
    pub updated: u32,
    /// Local subtrees removed after a remote deletion
    pub removed: u32,
    /// Conflicts raised or refreshed
    pub conflicts: u32,
    /// Local changes left for a later cycle
    pub deferred: u32,
    /// Remote items that matched the local mirror
    pub unchanged: u32,
    /// Remote items rejected as invalid
    pub skipped: u32,
    /// Staged uploads pushed
    pub uploaded: u32,
    /// Local deletes confirmed remotely
    pub deleted_remotely: u32,
    /// Per-item failures that did not abort the cycle
    pub errors: Vec<String>,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
    /// When the cycle completed
    pub finished_at: Option<DateTime<Utc>>,
}

struct Listing {
    items: Vec<RemoteItem>,
    cursor: SyncCursor,
    full: bool,
}

// ============================================================================
// SyncCoordinator
// ============================================================================

/// Reconciles the metadata store with the remote drive
///
/// ## Dependencies
///
/// - `remote`: listing, change stream, uploads and deletes
/// - `store`: the local mirror, cursor, staged uploads and conflicts
/// - `cache`: content ranges to invalidate when a revision changes
/// - `events`: change notifications for subscribers
///
/// At most one cycle runs at a time; local mutations (see
/// [`local`](crate::local)) go through the same coordinator so that every
/// write to the mirror is announced on the bus.
pub struct SyncCoordinator {
    pub(crate) remote: Arc<dyn IRemoteDrive>,
    pub(crate) store: Arc<dyn IMetadataStore>,
    pub(crate) cache: Arc<ContentCache>,
    pub(crate) events: EventBus,
    pub(crate) retry: RetryPolicy,
    phase: watch::Sender<SyncPhase>,
    cycle: tokio::sync::Mutex<()>,
    last_report: Mutex<Option<SyncReport>>,
    last_error: Mutex<Option<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SyncCoordinator {
    pub fn new(
        remote: Arc<dyn IRemoteDrive>,
        store: Arc<dyn IMetadataStore>,
        cache: Arc<ContentCache>,
        events: EventBus,
        retry: RetryPolicy,
    ) -> Self {
        let (phase, _) = watch::channel(SyncPhase::Idle);
        Self {
            remote,
            store,
            cache,
            events,
            retry,
            phase,
            cycle: tokio::sync::Mutex::new(()),
            last_report: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    /// The metadata store this coordinator writes
    pub fn store(&self) -> &Arc<dyn IMetadataStore> {
        &self.store
    }

    /// The content cache this coordinator invalidates
    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    /// Subscribes to change notifications
    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    /// Current phase
    pub fn state(&self) -> SyncPhase {
        *self.phase.borrow()
    }

    /// Receiver notified on every phase change
    pub fn watch_state(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    /// Report of the last successful cycle
    pub fn last_report(&self) -> Option<SyncReport> {
        lock(&self.last_report).clone()
    }

    /// Error of the last failed cycle, cleared by the next success
    pub fn last_error(&self) -> Option<String> {
        lock(&self.last_error).clone()
    }

    /// Leaves the Error phase once the caller has backed off
    pub fn recover(&self) {
        self.phase.send_if_modified(|phase| {
            if *phase == SyncPhase::Error {
                *phase = SyncPhase::Idle;
                true
            } else {
                false
            }
        });
    }

    /// Forces the Idle phase, used after a cycle was cancelled mid-way
    pub(crate) fn reset_phase(&self) {
        self.set_phase(SyncPhase::Idle);
    }

    fn set_phase(&self, phase: SyncPhase) {
        debug!(%phase, "Sync phase");
        self.phase.send_replace(phase);
    }

    pub(crate) fn publish_upserted(&self, node: &FileNode) {
        self.events.publish(ChangeEvent::Upserted {
            node_id: node.id().clone(),
            parent_id: node.parent_id().clone(),
            state: node.sync_state(),
        });
    }

    // ========================================================================
    // Cycle
    // ========================================================================

    /// Runs one reconciliation cycle
    ///
    /// Waits for a cycle already in progress to finish first.
    ///
    /// # Errors
    /// Returns the error that abandoned the cycle; the cursor is unchanged.
    #[tracing::instrument(skip(self))]
    pub async fn run_cycle(&self) -> Result<SyncReport, SyncError> {
        let _guard = self.cycle.lock().await;
        let start = Instant::now();
        info!("Starting sync cycle");

        match self.cycle(start).await {
            Ok(report) => {
                self.set_phase(SyncPhase::Idle);
                info!(
                    full_listing = report.full_listing,
                    added = report.added,
                    updated = report.updated,
                    removed = report.removed,
                    conflicts = report.conflicts,
                    skipped = report.skipped,
                    uploaded = report.uploaded,
                    deleted_remotely = report.deleted_remotely,
                    errors = report.errors.len(),
                    duration_ms = report.duration_ms,
                    "Sync cycle completed"
                );
                *lock(&self.last_report) = Some(report.clone());
                *lock(&self.last_error) = None;
                Ok(report)
            }
            Err(err) => {
                self.set_phase(SyncPhase::Error);
                error!(error = %err, "Sync cycle aborted");
                *lock(&self.last_error) = Some(err.to_string());
                Err(err)
            }
        }
    }

    async fn cycle(&self, start: Instant) -> Result<SyncReport, SyncError> {
        self.set_phase(SyncPhase::Listing);
        let listing = self.list().await?;
        info!(
            items = listing.items.len(),
            full_listing = listing.full,
            "Remote listing returned"
        );

        self.set_phase(SyncPhase::Diffing);
        let plan = self.plan(listing.items, listing.full).await?;

        self.set_phase(SyncPhase::Applying);
        let mut report = SyncReport {
            full_listing: listing.full,
            deferred: plan.deferred as u32,
            unchanged: plan.unchanged as u32,
            ..SyncReport::default()
        };
        for action in plan.actions {
            self.apply(action, &mut report).await?;
        }
        self.confirm_stale().await?;
        self.push_deletes(&mut report).await?;
        self.push_uploads(&mut report).await?;

        if report.skipped > 0 && !listing.full {
            warn!(
                skipped = report.skipped,
                "Remote items skipped, next cycle performs a full listing"
            );
            self.store.clear_cursor().await?;
        } else {
            self.store.set_cursor(&listing.cursor).await?;
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        report.finished_at = Some(Utc::now());
        Ok(report)
    }

    // ========================================================================
    // Listing
    // ========================================================================

    async fn list(&self) -> Result<Listing, SyncError> {
        if let Some(cursor) = self.store.get_cursor().await? {
            match with_retry(&self.retry, "list_changes", || {
                self.remote.list_changes(&cursor)
            })
            .await
            {
                Ok(batch) => {
                    return Ok(Listing {
                        items: batch.items,
                        cursor: batch.new_cursor,
                        full: false,
                    })
                }
                Err(RemoteError::CursorExpired) => {
                    warn!("Sync cursor expired, performing full listing");
                    self.store.clear_cursor().await?;
                }
                Err(err) => return Err(err.into()),
            }
        }
        self.full_listing().await
    }

    /// Breadth-first walk from the root
    ///
    /// The cursor is taken before the walk, so changes made while walking
    /// are replayed by the next incremental cycle.
    async fn full_listing(&self) -> Result<Listing, SyncError> {
        let cursor = with_retry(&self.retry, "start_cursor", || self.remote.start_cursor()).await?;

        let mut items = Vec::new();
        let mut queue = VecDeque::from([NodeId::root()]);
        while let Some(parent) = queue.pop_front() {
            let children =
                with_retry(&self.retry, "list_all", || self.remote.list_all(&parent)).await?;
            for child in children.into_iter().filter(|c| !c.is_deleted) {
                if child.is_folder() {
                    queue.push_back(child.id.clone());
                }
                items.push(child);
            }
        }

        Ok(Listing {
            items,
            cursor,
            full: true,
        })
    }

    // ========================================================================
    // Diffing
    // ========================================================================

    async fn plan(&self, items: Vec<RemoteItem>, full: bool) -> Result<Plan, SyncError> {
        let mut local: HashMap<NodeId, FileNode> = HashMap::new();
        if full {
            for state in SyncState::ALL {
                for node in self.store.list_by_state(state).await? {
                    local.insert(node.id().clone(), node);
                }
            }
        } else {
            for item in &items {
                if local.contains_key(&item.id) {
                    continue;
                }
                if let Some(node) = self.store.get(&item.id).await? {
                    local.insert(item.id.clone(), node);
                }
            }
        }

        let provisional: Vec<FileNode> = self
            .store
            .list_by_state(SyncState::PendingUpload)
            .await?
            .into_iter()
            .filter(|n| n.id().is_provisional())
            .collect();

        let plan = diff::diff(items, &local, &provisional, full);
        let (creates, updates, deletes, conflicts) = plan.counts();
        debug!(
            creates,
            updates,
            deletes,
            conflicts,
            deferred = plan.deferred,
            unchanged = plan.unchanged,
            "Diff computed"
        );
        Ok(plan)
    }

    // ========================================================================
    // Applying remote changes
    // ========================================================================

    /// Applies one planned action
    ///
    /// The node is read again first: a local mutation may have landed
    /// since the plan was computed, so the item is classified against the
    /// current state.
    async fn apply(&self, action: Action, report: &mut SyncReport) -> Result<(), SyncError> {
        let remote = match action {
            // The local side of a provisional twin has a different id
            Action::Conflict { local, remote } if local.id() != &remote.id => {
                return self.raise_conflict(local, remote, report).await;
            }
            Action::Create(remote)
            | Action::Update { remote, .. }
            | Action::Conflict { remote, .. } => remote,
            Action::Delete(node) => {
                RemoteItem::deleted(node.id().clone(), node.parent_id().clone())
            }
            Action::Defer(_) | Action::Unchanged => return Ok(()),
        };

        let current = self.store.get(&remote.id).await?;
        match classify(current.as_ref(), &remote) {
            Action::Create(item) => {
                if self.write_remote(None, &item, report).await? {
                    report.added += 1;
                }
            }
            Action::Update { local, remote } => {
                if self.write_remote(Some(&local), &remote, report).await? {
                    report.updated += 1;
                }
            }
            Action::Conflict { local, remote } => {
                self.raise_conflict(local, remote, report).await?;
            }
            Action::Delete(node) => {
                if self.apply_remote_delete(&node, report).await? {
                    report.removed += 1;
                }
            }
            Action::Defer(_) => report.deferred += 1,
            Action::Unchanged => report.unchanged += 1,
        }
        Ok(())
    }

    /// Writes a remote snapshot as a Synced node; returns whether it landed
    ///
    /// Remote data that breaks a tree invariant is skipped and reported,
    /// not fatal.
    async fn write_remote(
        &self,
        previous: Option<&FileNode>,
        item: &RemoteItem,
        report: &mut SyncReport,
    ) -> Result<bool, SyncError> {
        let node = match FileNode::from_remote(item) {
            Ok(node) => node,
            Err(err) => {
                warn!(node_id = %item.id, error = %err, "Skipping invalid remote item");
                report.skipped += 1;
                report.errors.push(format!("{}: {err}", item.id));
                return Ok(false);
            }
        };

        match self.store.upsert(&node).await {
            Ok(()) => {}
            Err(StoreError::Validation(err)) => {
                warn!(node_id = %item.id, error = %err, "Remote item rejected by store");
                report.skipped += 1;
                report.errors.push(format!("{}: {err}", item.id));
                return Ok(false);
            }
            Err(err) => return Err(err.into()),
        }

        if previous.and_then(FileNode::revision_tag) != node.revision_tag() {
            let freed = self.cache.invalidate(node.id());
            if freed > 0 {
                debug!(node_id = %node.id(), freed, "Invalidated cached content");
            }
        }

        debug!(node_id = %node.id(), name = node.name(), "Applied remote item");
        self.publish_upserted(&node);
        Ok(true)
    }

    async fn raise_conflict(
        &self,
        local: FileNode,
        remote: RemoteItem,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let Some(mut node) = self.store.get(local.id()).await? else {
            return Ok(());
        };

        let newly = node.sync_state() != SyncState::Conflict;
        if newly {
            if node.transition_to(SyncState::Conflict).is_err() {
                report.deferred += 1;
                return Ok(());
            }
            self.store.upsert(&node).await?;
        }

        let record = ConflictRecord::new(node.id().clone(), node.revision_tag().cloned(), remote);
        self.store.save_conflict(&record).await?;
        report.conflicts += 1;

        if newly {
            info!(
                node_id = %node.id(),
                remote_id = %record.remote.id,
                remote_deleted = record.remote_deleted(),
                "Conflict detected"
            );
            self.publish_upserted(&node);
            self.events.publish(ChangeEvent::ConflictDetected {
                node_id: node.id().clone(),
            });
        }
        Ok(())
    }

    /// Applies a remote deletion; returns whether the node was removed
    ///
    /// Descendants holding local changes (pending uploads and conflicts)
    /// are not dropped with the folder. Each gets a remote-deleted
    /// conflict, and the folders above it stay behind as placeholders
    /// (`Stale` without a revision) until the conflicts are resolved.
    /// Everything else in the subtree is removed.
    async fn apply_remote_delete(
        &self,
        node: &FileNode,
        report: &mut SyncReport,
    ) -> Result<bool, SyncError> {
        if !node.is_folder() || node.sync_state() == SyncState::PendingDelete {
            return self.remove_local(node).await;
        }

        let subtree = self.subtree(node.id()).await?;
        let protected: Vec<&FileNode> = subtree
            .iter()
            .filter(|n| matches!(n.sync_state(), SyncState::PendingUpload | SyncState::Conflict))
            .collect();
        if protected.is_empty() {
            return self.remove_local(node).await;
        }

        let parents: HashMap<&NodeId, &NodeId> =
            subtree.iter().map(|n| (n.id(), n.parent_id())).collect();
        let mut keep: HashSet<NodeId> = HashSet::from([node.id().clone()]);
        for local in &protected {
            let mut current = local.id();
            while keep.insert(current.clone()) {
                match parents.get(current) {
                    Some(&parent) => current = parent,
                    None => break,
                }
            }
        }

        for local in &protected {
            if local.sync_state() == SyncState::Conflict {
                let record = self.store.get_conflict(local.id()).await?;
                if record.is_some_and(|r| r.remote_deleted()) {
                    continue;
                }
            }
            let remote = RemoteItem::deleted(local.id().clone(), local.parent_id().clone());
            self.raise_conflict((*local).clone(), remote, report).await?;
        }

        for child in subtree
            .iter()
            .filter(|n| !keep.contains(n.id()) && keep.contains(n.parent_id()))
        {
            if self.remove_local(child).await? {
                report.removed += 1;
            }
        }

        for folder in std::iter::once(node)
            .chain(subtree.iter())
            .filter(|n| n.is_folder() && keep.contains(n.id()))
            .filter(|n| matches!(n.sync_state(), SyncState::Synced | SyncState::Stale))
        {
            let mut placeholder = folder.clone();
            placeholder.set_revision(None);
            placeholder.transition_to(SyncState::Stale)?;
            self.store.upsert(&placeholder).await?;
            self.publish_upserted(&placeholder);
        }

        info!(
            node_id = %node.id(),
            protected = protected.len(),
            "Remote folder deleted, keeping local changes"
        );
        report.deferred += 1;
        Ok(false)
    }

    /// Every node below `id`, parents before children
    async fn subtree(&self, id: &NodeId) -> Result<Vec<FileNode>, SyncError> {
        let mut nodes = Vec::new();
        let mut queue = VecDeque::from([id.clone()]);
        while let Some(parent) = queue.pop_front() {
            for child in self.store.list_children(&parent).await? {
                if child.is_folder() {
                    queue.push_back(child.id().clone());
                }
                nodes.push(child);
            }
        }
        Ok(nodes)
    }

    /// Removes a node's subtree and its cached content; returns whether
    /// anything was removed
    pub(crate) async fn remove_local(&self, node: &FileNode) -> Result<bool, SyncError> {
        let removed = self.store.delete(node.id()).await?;
        for id in &removed {
            self.cache.invalidate(id);
        }
        if removed.is_empty() {
            return Ok(false);
        }
        debug!(node_id = %node.id(), removed = removed.len(), "Removed local subtree");
        self.events.publish(ChangeEvent::Removed {
            node_id: node.id().clone(),
            parent_id: node.parent_id().clone(),
        });
        self.prune_placeholders(node.parent_id()).await?;
        Ok(true)
    }

    /// Drops placeholder folders left empty, walking up from `parent_id`
    async fn prune_placeholders(&self, parent_id: &NodeId) -> Result<(), SyncError> {
        let mut current = parent_id.clone();
        while !current.is_root() {
            let Some(folder) = self.store.get(&current).await? else {
                break;
            };
            if !is_placeholder(&folder) || !self.store.list_children(&current).await?.is_empty() {
                break;
            }
            self.store.delete(&current).await?;
            debug!(node_id = %current, "Pruned placeholder folder");
            self.events.publish(ChangeEvent::Removed {
                node_id: current.clone(),
                parent_id: folder.parent_id().clone(),
            });
            current = folder.parent_id().clone();
        }
        Ok(())
    }

    /// Recreates remotely the placeholder folders at and above
    /// `parent_id`, top down
    ///
    /// Returns the id `parent_id` carries afterwards.
    pub(crate) async fn restore_placeholders(
        &self,
        parent_id: &NodeId,
    ) -> Result<NodeId, SyncError> {
        let mut chain = Vec::new();
        let mut current = parent_id.clone();
        while !current.is_root() {
            let Some(folder) = self.store.get(&current).await? else {
                break;
            };
            if !is_placeholder(&folder) {
                break;
            }
            current = folder.parent_id().clone();
            chain.push(folder);
        }

        for folder in chain.into_iter().rev() {
            let item = with_retry(&self.retry, "create_folder", || {
                self.remote.create_folder(&current, folder.name())
            })
            .await?;
            let revision = item.revision_tag.clone().ok_or_else(|| {
                RemoteError::InvalidResponse(format!("folder {} has no revision", item.id))
            })?;
            let restored = self.store.rekey(folder.id(), &item.id, &revision).await?;
            info!(node_id = %folder.id(), remote_id = %item.id, "Recreated remote folder");
            self.events.publish(ChangeEvent::Rekeyed {
                from: folder.id().clone(),
                to: restored.id().clone(),
            });
            self.publish_upserted(&restored);
            current = restored.id().clone();
        }
        Ok(current)
    }

    /// Stale nodes hold a remote snapshot adopted outside a cycle; a
    /// completed listing that did not contradict them confirms them
    async fn confirm_stale(&self) -> Result<(), SyncError> {
        for node in self.store.list_by_state(SyncState::Stale).await? {
            if node.revision_tag().is_none() {
                continue;
            }
            match self.store.mark_pending(node.id(), SyncState::Synced).await {
                Ok(node) => self.publish_upserted(&node),
                Err(StoreError::NotFound(_) | StoreError::Validation(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    // ========================================================================
    // Pushing local changes
    // ========================================================================

    async fn push_deletes(&self, report: &mut SyncReport) -> Result<(), SyncError> {
        for node in self.store.list_by_state(SyncState::PendingDelete).await? {
            if !node.id().is_provisional() {
                let result =
                    with_retry(&self.retry, "delete", || self.remote.delete(node.id())).await;
                match result {
                    Ok(()) | Err(RemoteError::NotFound(_)) => {}
                    Err(err @ RemoteError::Unauthorized(_)) => return Err(err.into()),
                    Err(err) => {
                        warn!(node_id = %node.id(), error = %err, "Remote delete failed, will retry");
                        report.errors.push(format!("delete {}: {err}", node.id()));
                        continue;
                    }
                }
            }
            if self.remove_local(&node).await? {
                report.deleted_remotely += 1;
            }
        }
        Ok(())
    }

    async fn push_uploads(&self, report: &mut SyncReport) -> Result<(), SyncError> {
        for node in self.store.list_by_state(SyncState::PendingUpload).await? {
            let Some(staged) = self.store.staged_upload(node.id()).await? else {
                warn!(node_id = %node.id(), "Pending upload has no staged content");
                report.deferred += 1;
                continue;
            };
            if staged.is_blocked() || node.parent_id().is_provisional() {
                debug!(node_id = %node.id(), "Upload skipped this cycle");
                report.deferred += 1;
                continue;
            }

            match self.push_upload(&node, &staged).await {
                Ok(()) => report.uploaded += 1,
                Err(SyncError::Remote(err)) => {
                    let retryable = err.is_transient();
                    self.store
                        .record_upload_failure(node.id(), &err.to_string(), retryable)
                        .await?;
                    warn!(
                        node_id = %node.id(),
                        attempts = staged.attempts + 1,
                        retryable,
                        error = %err,
                        "Upload failed"
                    );
                    if matches!(err, RemoteError::Unauthorized(_)) {
                        return Err(err.into());
                    }
                    report.errors.push(format!("upload {}: {err}", node.id()));
                }
                Err(SyncError::Store(StoreError::NotFound(id))) => {
                    warn!(node_id = %id, "Node vanished during upload");
                    report.errors.push(format!("upload {id}: node removed"));
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    async fn upload_new(&self, node: &FileNode, data: &Bytes) -> Result<UploadReceipt, SyncError> {
        let receipt = with_retry(&self.retry, "upload", || {
            self.remote
                .upload(data.clone(), node.parent_id(), node.name(), node.mime_type())
        })
        .await?;
        Ok(receipt)
    }

    /// Pushes one staged upload and records the server revision
    async fn push_upload(&self, node: &FileNode, staged: &StagedUpload) -> Result<(), SyncError> {
        let moved;
        let node = if &self.restore_placeholders(node.parent_id()).await? == node.parent_id() {
            node
        } else {
            moved = self
                .store
                .get(node.id())
                .await?
                .ok_or_else(|| StoreError::NotFound(node.id().clone()))?;
            &moved
        };

        let receipt = if node.id().is_provisional() {
            self.upload_new(node, &staged.data).await?
        } else {
            let result = with_retry(&self.retry, "update_content", || {
                self.remote.update_content(node.id(), staged.data.clone())
            })
            .await;
            match result {
                Ok(receipt) => receipt,
                Err(RemoteError::NotFound(_)) => {
                    info!(node_id = %node.id(), "Remote file gone, uploading as a new file");
                    self.upload_new(node, &staged.data).await?
                }
                Err(err) => return Err(err.into()),
            }
        };

        // Content staged again while the upload ran stays pending
        let newer = self
            .store
            .staged_upload(node.id())
            .await?
            .filter(|s| s.staged_at != staged.staged_at);

        let synced = if &receipt.remote_id != node.id() {
            let synced = match self
                .store
                .rekey(node.id(), &receipt.remote_id, &receipt.revision_tag)
                .await
            {
                Ok(synced) => synced,
                Err(StoreError::NotFound(_)) => {
                    warn!(
                        node_id = %node.id(),
                        remote_id = %receipt.remote_id,
                        "Local node removed during upload, deleting remote copy"
                    );
                    if let Err(err) = self.remote.delete(&receipt.remote_id).await {
                        warn!(remote_id = %receipt.remote_id, error = %err, "Remote cleanup failed");
                    }
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            };
            self.events.publish(ChangeEvent::Rekeyed {
                from: node.id().clone(),
                to: synced.id().clone(),
            });
            match newer {
                Some(newer) => {
                    let mut pending = synced;
                    pending.transition_to(SyncState::PendingUpload)?;
                    pending.set_size(newer.data.len() as u64);
                    self.store.stage_upload(&pending, newer.data).await?;
                    pending
                }
                None => synced,
            }
        } else {
            let mut current = self
                .store
                .get(node.id())
                .await?
                .ok_or_else(|| StoreError::NotFound(node.id().clone()))?;
            if newer.is_none() && current.sync_state() == SyncState::PendingUpload {
                current.mark_synced(receipt.revision_tag.clone());
                current.set_size(staged.data.len() as u64);
            } else {
                current.set_revision(Some(receipt.revision_tag.clone()));
            }
            self.store.upsert(&current).await?;
            if newer.is_none() {
                self.store.discard_upload(node.id()).await?;
            }
            current
        };

        info!(
            node_id = %synced.id(),
            revision = %receipt.revision_tag,
            bytes = staged.data.len(),
            "Upload complete"
        );

        self.write_through(synced.id(), &staged.data, &receipt);
        self.publish_upserted(&synced);
        Ok(())
    }

    /// Replaces cached content with the bytes just uploaded
    fn write_through(&self, id: &NodeId, data: &Bytes, receipt: &UploadReceipt) {
        self.cache.invalidate(id);
        if data.is_empty() {
            return;
        }
        let range = ByteRange::new(0, data.len() as u64);
        match range.and_then(|range| {
            CacheEntry::new(id.clone(), range, data.clone(), receipt.revision_tag.clone())
        }) {
            Ok(entry) => self.cache.put(entry),
            Err(err) => debug!(node_id = %id, error = %err, "Upload not cached"),
        }
    }
}

/// A folder deleted remotely but kept locally for the changes below it
pub(crate) fn is_placeholder(node: &FileNode) -> bool {
    node.is_folder() && node.sync_state() == SyncState::Stale && node.revision_tag().is_none()
}

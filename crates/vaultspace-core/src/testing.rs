//! In-memory remote drive for tests
//!
//! [`InMemoryDrive`] implements [`IRemoteDrive`] over a hash map. Tests use
//! it to play the remote side: it records a change log addressed by
//! cursors, counts calls per operation, injects failures, and can slow
//! down range fetches to widen race windows.
//!
//! Mutations made through the `remote_*` helpers behave like edits from
//! another client: they bump revisions and append to the change log.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;

use crate::domain::{NodeId, RemoteItem, RevisionTag, SyncCursor, FOLDER_MIME_TYPE};
use crate::error::RemoteError;
use crate::ports::{ChangeBatch, IRemoteDrive, UploadReceipt};

/// Operations that can be counted and failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriveOp {
    StartCursor,
    ListChanges,
    ListAll,
    FetchRange,
    Upload,
    UpdateContent,
    Delete,
    Rename,
    CreateFolder,
}

#[derive(Default)]
struct DriveState {
    items: HashMap<NodeId, RemoteItem>,
    content: HashMap<NodeId, Bytes>,
    log: Vec<RemoteItem>,
    /// Cursors from an older epoch are rejected as expired
    epoch: u32,
    failures: HashMap<DriveOp, Vec<RemoteError>>,
}

/// Scriptable in-memory `IRemoteDrive`
#[derive(Default)]
pub struct InMemoryDrive {
    state: Mutex<DriveState>,
    calls: Mutex<HashMap<DriveOp, usize>>,
    next_id: AtomicUsize,
    next_rev: AtomicU64,
    fetch_delay_ms: AtomicU64,
}

impl InMemoryDrive {
    /// Empty drive
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DriveState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn mint_id(&self) -> NodeId {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        NodeId::from_raw(format!("remote{n}"))
    }

    fn mint_rev(&self) -> RevisionTag {
        let n = self.next_rev.fetch_add(1, Ordering::SeqCst) + 1;
        RevisionTag::from_raw(format!("v{n}"))
    }

    fn record_call(&self, op: DriveOp) -> Result<(), RemoteError> {
        *self
            .calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(op)
            .or_insert(0) += 1;
        let mut state = self.lock();
        if let Some(queue) = state.failures.get_mut(&op) {
            if !queue.is_empty() {
                return Err(queue.remove(0));
            }
        }
        Ok(())
    }

    /// Number of times `op` was invoked
    #[must_use]
    pub fn calls(&self, op: DriveOp) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&op)
            .copied()
            .unwrap_or(0)
    }

    /// Makes the next calls of `op` fail with `error`, `times` times
    pub fn fail_next(&self, op: DriveOp, error: RemoteError, times: usize) {
        let mut state = self.lock();
        let queue = state.failures.entry(op).or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    /// Adds latency to every range fetch
    pub fn set_fetch_delay(&self, delay: Duration) {
        self.fetch_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Rejects every cursor issued so far
    pub fn expire_cursors(&self) {
        self.lock().epoch += 1;
    }

    /// Current content of a file
    #[must_use]
    pub fn content(&self, id: &NodeId) -> Option<Bytes> {
        self.lock().content.get(id).cloned()
    }

    /// Current metadata of an item
    #[must_use]
    pub fn item(&self, id: &NodeId) -> Option<RemoteItem> {
        self.lock().items.get(id).cloned()
    }

    /// Number of live items
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// True when the drive holds no items
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds a folder as another client would
    pub fn remote_add_folder(&self, parent_id: &NodeId, name: &str) -> RemoteItem {
        self.remote_add_folder_with_id(self.mint_id(), parent_id, name)
    }

    /// Adds a folder with a chosen id
    pub fn remote_add_folder_with_id(&self, id: NodeId, parent_id: &NodeId, name: &str) -> RemoteItem {
        let item = RemoteItem::folder(id, parent_id.clone(), name, self.mint_rev());
        let mut state = self.lock();
        state.items.insert(item.id.clone(), item.clone());
        state.log.push(item.clone());
        item
    }

    /// Adds a file as another client would
    pub fn remote_add_file(&self, parent_id: &NodeId, name: &str, data: &[u8]) -> RemoteItem {
        self.remote_add_file_with_id(self.mint_id(), parent_id, name, data)
    }

    /// Adds a file with a chosen id
    pub fn remote_add_file_with_id(
        &self,
        id: NodeId,
        parent_id: &NodeId,
        name: &str,
        data: &[u8],
    ) -> RemoteItem {
        let item = RemoteItem::file(
            id,
            parent_id.clone(),
            name,
            "application/octet-stream",
            data.len() as u64,
            self.mint_rev(),
        );
        let mut state = self.lock();
        state.items.insert(item.id.clone(), item.clone());
        state
            .content
            .insert(item.id.clone(), Bytes::copy_from_slice(data));
        state.log.push(item.clone());
        item
    }

    /// Replaces a file's content as another client would
    pub fn remote_update_file(&self, id: &NodeId, data: &[u8]) -> Option<RemoteItem> {
        let rev = self.mint_rev();
        let mut state = self.lock();
        let item = state.items.get_mut(id)?;
        item.revision_tag = Some(rev);
        item.size_bytes = data.len() as u64;
        let item = item.clone();
        state.content.insert(id.clone(), Bytes::copy_from_slice(data));
        state.log.push(item.clone());
        Some(item)
    }

    /// Moves an item under a new parent as another client would
    pub fn remote_move(&self, id: &NodeId, new_parent: &NodeId) -> Option<RemoteItem> {
        let rev = self.mint_rev();
        let mut state = self.lock();
        let item = state.items.get_mut(id)?;
        item.parent_id = new_parent.clone();
        item.revision_tag = Some(rev);
        let item = item.clone();
        state.log.push(item.clone());
        Some(item)
    }

    /// Deletes an item and its subtree as another client would
    pub fn remote_delete(&self, id: &NodeId) -> bool {
        let mut state = self.lock();
        Self::delete_subtree(&mut state, id)
    }

    fn delete_subtree(state: &mut DriveState, id: &NodeId) -> bool {
        let Some(item) = state.items.remove(id) else {
            return false;
        };
        state.content.remove(id);
        let children: Vec<NodeId> = state
            .items
            .values()
            .filter(|i| &i.parent_id == id)
            .map(|i| i.id.clone())
            .collect();
        for child in children {
            Self::delete_subtree(state, &child);
        }
        state
            .log
            .push(RemoteItem::deleted(item.id.clone(), item.parent_id.clone()));
        true
    }

    fn make_cursor(state: &DriveState) -> SyncCursor {
        SyncCursor::from_raw(format!("c{}-{}", state.epoch, state.log.len()))
    }

    /// Splits a cursor into (epoch, log offset)
    fn parse_cursor(cursor: &SyncCursor) -> Result<(u32, usize), RemoteError> {
        cursor
            .as_str()
            .strip_prefix('c')
            .and_then(|rest| rest.split_once('-'))
            .and_then(|(epoch, offset)| Some((epoch.parse().ok()?, offset.parse().ok()?)))
            .ok_or_else(|| RemoteError::InvalidResponse(format!("bad cursor {cursor}")))
    }
}

#[async_trait::async_trait]
impl IRemoteDrive for InMemoryDrive {
    async fn start_cursor(&self) -> Result<SyncCursor, RemoteError> {
        self.record_call(DriveOp::StartCursor)?;
        Ok(Self::make_cursor(&self.lock()))
    }

    async fn list_changes(&self, cursor: &SyncCursor) -> Result<ChangeBatch, RemoteError> {
        self.record_call(DriveOp::ListChanges)?;
        let (epoch, offset) = Self::parse_cursor(cursor)?;
        let state = self.lock();
        if epoch != state.epoch || offset > state.log.len() {
            return Err(RemoteError::CursorExpired);
        }
        Ok(ChangeBatch {
            items: state.log[offset..].to_vec(),
            new_cursor: Self::make_cursor(&state),
        })
    }

    async fn list_all(&self, parent_id: &NodeId) -> Result<Vec<RemoteItem>, RemoteError> {
        self.record_call(DriveOp::ListAll)?;
        let state = self.lock();
        let mut children: Vec<RemoteItem> = state
            .items
            .values()
            .filter(|i| &i.parent_id == parent_id)
            .cloned()
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(children)
    }

    async fn fetch_range(
        &self,
        file_id: &NodeId,
        start: u64,
        end: u64,
    ) -> Result<Bytes, RemoteError> {
        self.record_call(DriveOp::FetchRange)?;
        let delay = self.fetch_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let state = self.lock();
        let data = state
            .content
            .get(file_id)
            .ok_or_else(|| RemoteError::NotFound(file_id.to_string()))?;
        let len = data.len() as u64;
        let from = start.min(len) as usize;
        let to = end.min(len) as usize;
        Ok(data.slice(from..to.max(from)))
    }

    async fn upload(
        &self,
        data: Bytes,
        parent_id: &NodeId,
        name: &str,
        mime_type: &str,
    ) -> Result<UploadReceipt, RemoteError> {
        self.record_call(DriveOp::Upload)?;
        let id = self.mint_id();
        let rev = self.mint_rev();
        let mut state = self.lock();
        if !parent_id.is_root() && !state.items.contains_key(parent_id) {
            return Err(RemoteError::NotFound(parent_id.to_string()));
        }
        let mut item = RemoteItem::file(
            id.clone(),
            parent_id.clone(),
            name,
            mime_type,
            data.len() as u64,
            rev.clone(),
        );
        if mime_type == FOLDER_MIME_TYPE {
            item.size_bytes = 0;
        }
        state.items.insert(id.clone(), item.clone());
        state.content.insert(id.clone(), data);
        state.log.push(item);
        Ok(UploadReceipt {
            remote_id: id,
            revision_tag: rev,
        })
    }

    async fn update_content(
        &self,
        file_id: &NodeId,
        data: Bytes,
    ) -> Result<UploadReceipt, RemoteError> {
        self.record_call(DriveOp::UpdateContent)?;
        let rev = self.mint_rev();
        let mut state = self.lock();
        let item = state
            .items
            .get_mut(file_id)
            .ok_or_else(|| RemoteError::NotFound(file_id.to_string()))?;
        item.revision_tag = Some(rev.clone());
        item.size_bytes = data.len() as u64;
        let item = item.clone();
        state.content.insert(file_id.clone(), data);
        state.log.push(item);
        Ok(UploadReceipt {
            remote_id: file_id.clone(),
            revision_tag: rev,
        })
    }

    async fn delete(&self, remote_id: &NodeId) -> Result<(), RemoteError> {
        self.record_call(DriveOp::Delete)?;
        let mut state = self.lock();
        if Self::delete_subtree(&mut state, remote_id) {
            Ok(())
        } else {
            Err(RemoteError::NotFound(remote_id.to_string()))
        }
    }

    async fn rename(&self, remote_id: &NodeId, new_name: &str) -> Result<RemoteItem, RemoteError> {
        self.record_call(DriveOp::Rename)?;
        let rev = self.mint_rev();
        let mut state = self.lock();
        let item = state
            .items
            .get_mut(remote_id)
            .ok_or_else(|| RemoteError::NotFound(remote_id.to_string()))?;
        item.name = new_name.to_string();
        item.revision_tag = Some(rev);
        let item = item.clone();
        state.log.push(item.clone());
        Ok(item)
    }

    async fn create_folder(
        &self,
        parent_id: &NodeId,
        name: &str,
    ) -> Result<RemoteItem, RemoteError> {
        self.record_call(DriveOp::CreateFolder)?;
        {
            let state = self.lock();
            if !parent_id.is_root() && !state.items.contains_key(parent_id) {
                return Err(RemoteError::NotFound(parent_id.to_string()));
            }
        }
        Ok(self.remote_add_folder(parent_id, name))
    }
}

//! Remote drive stand-in for running without a provider connection.

use async_trait::async_trait;
use bytes::Bytes;
use vaultspace_core::domain::{NodeId, RemoteItem, SyncCursor};
use vaultspace_core::ports::{ChangeBatch, IRemoteDrive, UploadReceipt};
use vaultspace_core::RemoteError;

/// An `IRemoteDrive` that is never reachable
///
/// Every call fails with `RemoteError::TransientIo`, so anything that only
/// touches the local store (listings, search, conflict decisions, the
/// upload ledger) keeps working while sync cycles fail and back off.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineDrive;

fn offline<T>() -> Result<T, RemoteError> {
    Err(RemoteError::TransientIo("remote drive is offline".to_string()))
}

#[async_trait]
impl IRemoteDrive for OfflineDrive {
    async fn start_cursor(&self) -> Result<SyncCursor, RemoteError> {
        offline()
    }

    async fn list_changes(&self, _cursor: &SyncCursor) -> Result<ChangeBatch, RemoteError> {
        offline()
    }

    async fn list_all(&self, _parent_id: &NodeId) -> Result<Vec<RemoteItem>, RemoteError> {
        offline()
    }

    async fn fetch_range(
        &self,
        _file_id: &NodeId,
        _start: u64,
        _end: u64,
    ) -> Result<Bytes, RemoteError> {
        offline()
    }

    async fn upload(
        &self,
        _data: Bytes,
        _parent_id: &NodeId,
        _name: &str,
        _mime_type: &str,
    ) -> Result<UploadReceipt, RemoteError> {
        offline()
    }

    async fn update_content(
        &self,
        _file_id: &NodeId,
        _data: Bytes,
    ) -> Result<UploadReceipt, RemoteError> {
        offline()
    }

    async fn delete(&self, _remote_id: &NodeId) -> Result<(), RemoteError> {
        offline()
    }

    async fn rename(&self, _remote_id: &NodeId, _new_name: &str) -> Result<RemoteItem, RemoteError> {
        offline()
    }

    async fn create_folder(
        &self,
        _parent_id: &NodeId,
        _name: &str,
    ) -> Result<RemoteItem, RemoteError> {
        offline()
    }
}

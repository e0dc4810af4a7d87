//! VaultSpace Sync - Reconciliation between the local mirror and the remote
//!
//! Provides:
//! - Incremental sync over the remote change stream, with a full listing on
//!   first run and after cursor expiry
//! - Conflict detection for local changes that raced a remote update
//! - Push of locally staged uploads, deletes and renames
//! - Change notifications for the UI
//!
//! ## Modules
//!
//! - [`coordinator`] - Cycle state machine (Idle → Listing → Diffing → Applying)
//! - [`diff`] - Pure classification of remote items against local nodes
//! - [`local`] - Local-origin mutations funneled through the coordinator
//! - [`events`] - Broadcast change bus with lag detection
//! - [`scheduler`] - Periodic and on-demand cycles with backoff

pub mod coordinator;
pub mod diff;
pub mod events;
pub mod local;
pub mod scheduler;

use std::time::Duration;

use thiserror::Error;
use vaultspace_core::domain::{DomainError, NodeId};
use vaultspace_core::{RemoteError, StoreError, VaultError};

pub use coordinator::{SyncCoordinator, SyncPhase, SyncReport};
pub use diff::{Action, Plan};
pub use events::{EventBus, Subscription};
pub use scheduler::{SchedulerHandle, SyncScheduler};

/// Errors that can occur during synchronization operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote drive failed after the retry budget
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// The metadata store failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A domain invariant would be violated
    #[error("Validation error: {0}")]
    Validation(#[from] DomainError),

    /// The node does not exist locally
    #[error("Node not found: {0}")]
    NotFound(NodeId),

    /// The node is in conflict and needs an explicit resolution first
    #[error("Conflict on node {0}")]
    Conflict(NodeId),
}

impl SyncError {
    /// Minimum wait the provider asked for, if this is a throttling error
    #[must_use]
    pub fn retry_hint(&self) -> Option<Duration> {
        match self {
            SyncError::Remote(e) => e.retry_hint(),
            _ => None,
        }
    }
}

impl From<SyncError> for VaultError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Remote(e) => e.into(),
            SyncError::Store(e) => e.into(),
            SyncError::Validation(e) => e.into(),
            SyncError::NotFound(id) => VaultError::NotFound(id.to_string()),
            SyncError::Conflict(id) => VaultError::Conflict(id),
        }
    }
}

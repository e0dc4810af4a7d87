//! Error taxonomy
//!
//! - [`RemoteError`] - failures reported across the remote drive boundary
//! - [`StoreError`] - failures of the metadata store port
//! - [`VaultError`] - what the engine surfaces to its callers
//!
//! Components that own a retry budget (sync coordinator, range fetcher)
//! classify with [`RemoteError::is_transient`]; everything above them only
//! propagates.

use std::time::Duration;

use thiserror::Error;

use crate::domain::{DomainError, NodeId};

/// Errors returned by an `IRemoteDrive` implementation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Credentials were rejected (HTTP 401/403)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The item does not exist remotely (HTTP 404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// The provider throttled the request (HTTP 429)
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited {
        /// Provider-supplied minimum wait, if any
        retry_after: Option<Duration>,
    },

    /// Network or server failure (timeouts, 5xx, resets)
    #[error("Transient I/O error: {0}")]
    TransientIo(String),

    /// The change cursor is no longer accepted (HTTP 410)
    #[error("Sync cursor expired")]
    CursorExpired,

    /// The provider answered with something that could not be parsed
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// Whether the operation may succeed if simply retried
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteError::TransientIo(_)
                | RemoteError::RateLimited { .. }
                | RemoteError::InvalidResponse(_)
        )
    }

    /// Minimum wait mandated by the provider
    #[must_use]
    pub fn retry_hint(&self) -> Option<Duration> {
        match self {
            RemoteError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Errors returned by an `IMetadataStore` implementation
#[derive(Debug, Error)]
pub enum StoreError {
    /// The write would violate a tree or state invariant
    #[error("Validation failed: {0}")]
    Validation(#[from] DomainError),

    /// The node does not exist
    #[error("Node not found: {0}")]
    NotFound(NodeId),

    /// The storage backend failed
    #[error("Storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Errors surfaced by the engine to the UI and player
#[derive(Debug, Error)]
pub enum VaultError {
    /// Invariant violation; fatal to the offending call, never retried
    #[error("Validation error: {0}")]
    Validation(String),

    /// Network/remote failure that outlived the local retry budget
    #[error("Transient I/O error: {0}")]
    TransientIo(String),

    /// Remote credentials were rejected
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Requested node does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Provider throttling outlived the local retry budget
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited {
        /// Provider-supplied minimum wait, if any
        retry_after: Option<Duration>,
    },

    /// The node is in conflict and needs an explicit resolution
    #[error("Conflict on node {0}")]
    Conflict(NodeId),

    /// Local storage failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,
}

impl VaultError {
    /// Whether the caller may retry the same request later
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VaultError::TransientIo(_) | VaultError::RateLimited { .. }
        )
    }
}

impl From<RemoteError> for VaultError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Unauthorized(msg) => VaultError::Unauthorized(msg),
            RemoteError::NotFound(msg) => VaultError::NotFound(msg),
            RemoteError::RateLimited { retry_after } => VaultError::RateLimited { retry_after },
            RemoteError::TransientIo(msg) => VaultError::TransientIo(msg),
            RemoteError::CursorExpired => {
                VaultError::TransientIo("sync cursor expired".to_string())
            }
            RemoteError::InvalidResponse(msg) => VaultError::TransientIo(msg),
        }
    }
}

impl From<StoreError> for VaultError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(e) => VaultError::Validation(e.to_string()),
            StoreError::NotFound(id) => VaultError::NotFound(id.to_string()),
            StoreError::Backend(e) => VaultError::Storage(format!("{e:#}")),
        }
    }
}

impl From<DomainError> for VaultError {
    fn from(err: DomainError) -> Self {
        VaultError::Validation(err.to_string())
    }
}

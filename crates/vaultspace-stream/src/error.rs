//! Error types for content streaming.

use thiserror::Error;
use vaultspace_core::domain::{ByteRange, DomainError, NodeId};
use vaultspace_core::{RemoteError, VaultError};

/// Errors that can occur while reading file content.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("invalid range: {0}")]
    InvalidRange(#[from] DomainError),

    /// The remote fetch failed after the retry budget; the range is kept so
    /// the caller can ask again.
    #[error("fetch of {file_id} [{}, {}) failed: {source}", range.start(), range.end())]
    Fetch {
        file_id: NodeId,
        range: ByteRange,
        source: RemoteError,
    },

    #[error("read cancelled")]
    Cancelled,

    #[error("no known revision for {0}")]
    NoRevision(NodeId),
}

impl From<StreamError> for VaultError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::InvalidRange(e) => VaultError::Validation(e.to_string()),
            StreamError::Fetch {
                source: RemoteError::Unauthorized(msg),
                ..
            } => VaultError::Unauthorized(msg),
            StreamError::Fetch {
                source: RemoteError::NotFound(msg),
                ..
            } => VaultError::NotFound(msg),
            e @ StreamError::Fetch { .. } => VaultError::TransientIo(e.to_string()),
            StreamError::Cancelled => VaultError::Cancelled,
            StreamError::NoRevision(id) => {
                VaultError::NotFound(format!("{id} has no remote content yet"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_failure_surfaces_as_transient() {
        let err = StreamError::Fetch {
            file_id: NodeId::new("f1").unwrap(),
            range: ByteRange::new(0, 50).unwrap(),
            source: RemoteError::RateLimited { retry_after: None },
        };
        assert!(err.to_string().contains("[0, 50)"));

        let vault: VaultError = err.into();
        assert!(matches!(vault, VaultError::TransientIo(_)));
        assert!(vault.is_retryable());
    }

    #[test]
    fn test_not_found_kept_distinct() {
        let err = StreamError::Fetch {
            file_id: NodeId::new("f1").unwrap(),
            range: ByteRange::new(0, 1).unwrap(),
            source: RemoteError::NotFound("f1".into()),
        };
        assert!(matches!(VaultError::from(err), VaultError::NotFound(_)));
        assert!(matches!(
            VaultError::from(StreamError::Cancelled),
            VaultError::Cancelled
        ));
    }
}

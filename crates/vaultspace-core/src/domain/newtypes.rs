//! Type-safe identifiers used throughout the domain
//!
//! All three newtypes wrap opaque provider strings. They are validated on
//! construction and serialize transparently as plain strings.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::DomainError;

// ============================================================================
// NodeId
// ============================================================================

/// Identifier of a file or folder
///
/// Remote-assigned ids are opaque strings. Nodes created locally and not yet
/// uploaded carry a provisional id with the `local-` prefix until the first
/// successful upload re-keys them to the server id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

/// Id of the root sentinel folder
const ROOT_ID: &str = "root";

/// Prefix marking ids that have never been seen by the remote
const PROVISIONAL_PREFIX: &str = "local-";

impl NodeId {
    /// Wraps a value already known to be valid
    #[allow(dead_code)]
    pub(crate) fn from_raw(value: String) -> Self {
        Self(value)
    }

    /// Create a new NodeId
    ///
    /// # Errors
    /// Returns error if the id is empty or contains whitespace or path separators
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        if id.is_empty() {
            return Err(DomainError::InvalidId("Node id cannot be empty".to_string()));
        }
        if id.chars().any(|c| c.is_whitespace() || c == '/' || c == '\\') {
            return Err(DomainError::InvalidId(format!(
                "Node id contains invalid characters: {id}"
            )));
        }
        Ok(Self(id))
    }

    /// The root sentinel that every top-level node points at
    #[must_use]
    pub fn root() -> Self {
        Self(ROOT_ID.to_string())
    }

    /// A fresh provisional id for a locally created node
    #[must_use]
    pub fn provisional() -> Self {
        Self(format!("{PROVISIONAL_PREFIX}{}", Uuid::new_v4()))
    }

    /// Returns true for the root sentinel
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == ROOT_ID
    }

    /// Returns true if the id was minted locally and never uploaded
    #[must_use]
    pub fn is_provisional(&self) -> bool {
        self.0.starts_with(PROVISIONAL_PREFIX)
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for NodeId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

// ============================================================================
// RevisionTag
// ============================================================================

/// Opaque version marker assigned by the remote
///
/// Changes whenever the remote content changes. Only equality is meaningful;
/// revision tags are never ordered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RevisionTag(String);

impl RevisionTag {
    /// Wraps a value already known to be valid
    #[allow(dead_code)]
    pub(crate) fn from_raw(value: String) -> Self {
        Self(value)
    }

    /// Create a new RevisionTag
    ///
    /// # Errors
    /// Returns error if the tag is empty
    pub fn new(tag: impl Into<String>) -> Result<Self, DomainError> {
        let tag = tag.into();
        if tag.trim().is_empty() {
            return Err(DomainError::InvalidRevision(
                "Revision tag cannot be empty".to_string(),
            ));
        }
        Ok(Self(tag))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RevisionTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RevisionTag {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for RevisionTag {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RevisionTag> for String {
    fn from(tag: RevisionTag) -> Self {
        tag.0
    }
}

// ============================================================================
// SyncCursor
// ============================================================================

/// Position in the remote change stream
///
/// A single cursor exists per vault. It is persisted next to the metadata
/// and only advanced once a reconciliation cycle has fully applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SyncCursor(String);

impl SyncCursor {
    /// Wraps a value already known to be valid
    #[allow(dead_code)]
    pub(crate) fn from_raw(value: String) -> Self {
        Self(value)
    }

    /// Create a new SyncCursor
    ///
    /// # Errors
    /// Returns error if the cursor is empty
    pub fn new(cursor: impl Into<String>) -> Result<Self, DomainError> {
        let cursor = cursor.into();
        if cursor.is_empty() {
            return Err(DomainError::InvalidCursor(
                "Sync cursor cannot be empty".to_string(),
            ));
        }
        Ok(Self(cursor))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SyncCursor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for SyncCursor {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SyncCursor> for String {
    fn from(cursor: SyncCursor) -> Self {
        cursor.0
    }
}

//! Domain error types
//!
//! Invariant violations raised by domain constructors and by the metadata
//! store when a mutation would break the tree shape.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid node identifier
    #[error("Invalid node id: {0}")]
    InvalidId(String),

    /// Invalid revision tag
    #[error("Invalid revision tag: {0}")]
    InvalidRevision(String),

    /// Invalid sync cursor
    #[error("Invalid sync cursor: {0}")]
    InvalidCursor(String),

    /// Invalid file or folder name
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// Byte range with start after end
    #[error("Invalid byte range [{start}, {end})")]
    InvalidRange {
        /// Inclusive start offset
        start: u64,
        /// Exclusive end offset
        end: u64,
    },

    /// The parent of a node does not exist
    #[error("Parent {parent} of node {node} does not exist")]
    MissingParent {
        /// The node being written
        node: String,
        /// The unresolved parent id
        parent: String,
    },

    /// Writing the node would make it its own ancestor
    #[error("Node {node} cannot be placed under {parent}: parent cycle")]
    ParentCycle {
        /// The node being written
        node: String,
        /// The requested parent
        parent: String,
    },

    /// The root sentinel cannot be stored, moved or deleted
    #[error("The root folder cannot be modified")]
    RootImmutable,

    /// The node is not a folder but was used as one
    #[error("Node {0} is not a folder")]
    NotAFolder(String),

    /// Invalid state transition attempt
    #[error("Invalid state transition from {from} to {to}")]
    InvalidState {
        /// The current state
        from: String,
        /// The attempted target state
        to: String,
    },
}

//! Domain entities and business logic
//!
//! This module contains the core domain types for VaultSpace:
//! - Newtypes for remote identifiers, revision tags and the sync cursor
//! - The mirrored `FileNode` and its `SyncState` machine
//! - Cached content ranges (`CacheEntry`, `ByteRange`)
//! - Snapshots of remote items as reported by the provider
//! - Conflict records and change notifications
//! - Domain-specific error types

pub mod cache_entry;
pub mod change;
pub mod conflict;
pub mod errors;
pub mod file_node;
pub mod newtypes;
pub mod remote_item;

// Re-export commonly used types
pub use cache_entry::{ByteRange, CacheEntry};
pub use change::ChangeEvent;
pub use conflict::{ConflictRecord, Resolution};
pub use errors::DomainError;
pub use file_node::{FileNode, SyncState, FOLDER_MIME_TYPE};
pub use newtypes::*;
pub use remote_item::RemoteItem;

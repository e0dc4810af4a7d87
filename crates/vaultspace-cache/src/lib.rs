//! VaultSpace Cache - Local metadata persistence
//!
//! SQLite-based store for:
//! - The mirrored file/folder tree
//! - The change-stream cursor
//! - Local content staged for upload
//! - Open conflicts
//!
//! ## Architecture
//!
//! This crate implements the `IMetadataStore` port from `vaultspace-core`
//! using SQLite as the storage backend. It is a driven (secondary) adapter
//! in the hexagonal architecture.
//!
//! ## Key Components
//!
//! - [`DatabasePool`] - Connection pool with migration support
//! - [`SqliteMetadataStore`] - Full `IMetadataStore` implementation
//! - [`CacheError`] - Error types for database operations
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use vaultspace_cache::{DatabasePool, SqliteMetadataStore};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = DatabasePool::new(Path::new("/home/user/.local/share/vaultspace/vault.db")).await?;
//! let store = SqliteMetadataStore::new(pool.pool().clone());
//! // Use store as IMetadataStore...
//! # Ok(())
//! # }
//! ```

pub mod pool;
pub mod repository;

pub use pool::DatabasePool;
pub use repository::SqliteMetadataStore;

use vaultspace_core::StoreError;

/// Errors that can occur during database operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Serialization or deserialization of domain types failed
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for CacheError {
    fn from(e: sqlx::Error) -> Self {
        CacheError::QueryFailed(e.to_string())
    }
}

impl From<CacheError> for StoreError {
    fn from(e: CacheError) -> Self {
        StoreError::Backend(anyhow::Error::new(e))
    }
}

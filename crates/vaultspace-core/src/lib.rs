//! VaultSpace Core - Domain logic and business rules
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `FileNode`, `CacheEntry`, `SyncCursor`, `ConflictRecord`, `ChangeEvent`
//! - **Port definitions** - Traits for adapters: `IRemoteDrive`, `IMetadataStore`
//! - **Error taxonomy** - `VaultError` and the per-boundary errors that feed it
//! - **Retry helpers** - Exponential backoff honouring provider rate-limit hints
//! - **Configuration** - YAML-backed engine settings
//!
//! # Architecture
//!
//! The domain module contains pure data and invariants with no I/O.
//! Ports define trait interfaces that adapter crates implement
//! (`vaultspace-cache` for the metadata store, a provider client for the
//! remote drive). The engine crates (`vaultspace-stream`, `vaultspace-sync`,
//! `vaultspace-vault`) only ever talk to ports.

pub mod config;
pub mod domain;
pub mod error;
pub mod ports;
pub mod retry;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use error::{RemoteError, StoreError, VaultError};

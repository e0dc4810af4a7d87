//! VaultSpace Vault - Engine wiring and the public facade
//!
//! ```text
//!              UI / player
//!                   │
//!                 Vault ───────────────► Subscription (ChangeEvent)
//!            ┌──────┴───────┐
//!   listings │              │ bytes
//!            ▼              ▼
//!    IMetadataStore    RangeFetcher ──► ContentCache
//!            ▲              │
//!            │              ▼
//!     SyncCoordinator ──► IRemoteDrive
//!            ▲
//!      SyncScheduler
//! ```
//!
//! [`EngineContext`] owns every piece of process-wide state (database
//! pool, content cache, in-flight fetch table, scheduler) and hands out
//! [`Vault`] handles. Nothing here is global: two contexts over two
//! databases are independent.

pub mod context;
pub mod facade;
pub mod offline;

pub use context::EngineContext;
pub use facade::{Vault, VaultStatus};
pub use offline::OfflineDrive;

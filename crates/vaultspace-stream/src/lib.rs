//! VaultSpace Stream - Content cache and range reads
//!
//! Serves byte ranges of remote files for the media player and for
//! downloads, without ever downloading whole files.
//!
//! ## Architecture
//!
//! ```text
//! Reader::read_range ─► RangeFetcher ─► ContentCache ─(miss)─► IRemoteDrive
//!                            │                ▲
//!                            └── put ─────────┘
//! ```
//!
//! ## Key Components
//!
//! - [`ContentCache`] - Byte-budgeted range cache with per-file slots
//! - [`DiskStore`] - Advisory on-disk mirror of cached ranges
//! - [`RangeFetcher`] - Cache-first fetching with request coalescing
//! - [`Reader`] - Per-file random-access handle
//! - [`PrefetchPolicy`] - Fetch sizing from bitrate hints

pub mod cache;
pub mod disk;
pub mod error;
pub mod fetcher;
pub mod prefetch;
pub mod reader;

pub use cache::{CacheUsage, ContentCache};
pub use disk::DiskStore;
pub use error::StreamError;
pub use fetcher::{ContentRef, RangeFetcher};
pub use prefetch::PrefetchPolicy;
pub use reader::Reader;

//! Port definitions (hexagonal architecture interfaces)
//!
//! ## Ports Overview
//!
//! - [`IRemoteDrive`] - Cloud drive listing, change stream, ranges, uploads
//! - [`IMetadataStore`] - Persistent mirror of remote metadata and local intents

pub mod metadata_store;
pub mod remote_drive;

pub use metadata_store::{IMetadataStore, StagedUpload};
pub use remote_drive::{ChangeBatch, IRemoteDrive, UploadReceipt};

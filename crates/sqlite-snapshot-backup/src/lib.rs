//! # sqlite-snapshot-backup
//!
//! Snapshot backups for embedded stores: full backups of a JSON payload and
//! incremental backups of logged row changes.
//!
//! ## Core Types
//!
//! - **[`BackupEngine`]**: Creates, lists, prunes and restores backups
//! - **[`BackupConfig`]**: Retention, compression and auto-backup threshold
//! - **[`ChangeRecord`]**: One logged row mutation
//! - **[`BackupArtifact`]**: Metadata stored next to every payload
//!
//! ## On-disk layout
//!
//! ```text
//! backups/
//!   backup-index.json
//!   full-backup-2024-03-01T12-30-45-123Z.json.gz
//!   full-backup-2024-03-01T12-30-45-123Z.json.gz.meta
//!   incremental-backup-2024-03-01T12-31-02-9Z.json.gz
//!   incremental-backup-2024-03-01T12-31-02-9Z.json.gz.meta
//! ```
//!
//! Payloads are canonical JSON (sorted keys) compressed with gzip; the
//! checksum is the SHA-256 of the uncompressed canonical form.

mod artifact;
mod change_log;
mod codec;
mod config;
mod engine;
mod error;
pub mod retention;
pub mod timestamp;

pub use artifact::{BackupArtifact, BackupEntry, BackupIndex, BackupKind, INDEX_FILE};
pub use change_log::{ChangeOperation, ChangeRecord};
pub use codec::{canonical_json, checksum};
pub use config::BackupConfig;
pub use engine::BackupEngine;
pub use error::{Error, Result};

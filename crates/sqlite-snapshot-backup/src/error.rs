//! Error types for the sqlite-snapshot-backup crate.

use std::path::PathBuf;

/// Errors that can occur while creating, listing or restoring backups.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Filesystem failure while reading, writing or deleting backup files.
   #[error("Backup IO error: {0}")]
   Io(#[from] std::io::Error),

   /// Payload or metadata could not be (de)serialized.
   #[error("Backup serialization error: {0}")]
   Json(#[from] serde_json::Error),

   /// Compression level outside 0..=9.
   #[error("compression level {0} is out of range (0-9)")]
   InvalidCompressionLevel(u32),

   /// The file is an incremental backup; replaying change chains is not supported.
   #[error("cannot restore incremental backup {}: only full backups can be restored", .0.display())]
   IncrementalRestoreUnsupported(PathBuf),

   /// A timestamp could not be formatted or parsed.
   #[error("invalid backup timestamp: {0}")]
   Timestamp(String),

   /// The background compression task failed.
   #[error("backup task failed: {0}")]
   Task(#[from] tokio::task::JoinError),
}

/// A type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;

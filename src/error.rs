use std::path::PathBuf;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by [`SyncEngine`](crate::SyncEngine).
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Statement, transaction, validation or sync failure.
   #[error(transparent)]
   Toolkit(#[from] sqlx_sqlite_toolkit::Error),

   /// Connection management failure.
   #[error(transparent)]
   ConnectionManager(#[from] sqlx_sqlite_conn_mgr::Error),

   /// Backup creation, listing or restore failure.
   #[error(transparent)]
   Backup(#[from] sqlite_snapshot_backup::Error),

   /// I/O error when copying or swapping store files.
   #[error("io error: {0}")]
   Io(#[from] std::io::Error),

   /// No backup directory was configured.
   #[error("backups are not configured for this engine")]
   BackupsDisabled,

   /// A store file failed `PRAGMA integrity_check`.
   #[error("store file {} failed integrity check: {reason}", path.display())]
   CorruptStoreFile { path: PathBuf, reason: String },

   /// A restored backup payload is not a snapshot.
   #[error("backup payload is not a valid snapshot: {0}")]
   InvalidBackupPayload(String),
}

impl Error {
   /// Machine-readable code, delegating to the toolkit for its variants.
   pub fn error_code(&self) -> String {
      match self {
         Error::Toolkit(e) => e.error_code(),
         Error::ConnectionManager(sqlx_sqlite_conn_mgr::Error::DatabaseClosed) => {
            "DATABASE_CLOSED".to_string()
         }
         Error::ConnectionManager(_) => "CONNECTION_ERROR".to_string(),
         Error::Backup(sqlite_snapshot_backup::Error::IncrementalRestoreUnsupported(_)) => {
            "INCREMENTAL_RESTORE_UNSUPPORTED".to_string()
         }
         Error::Backup(_) => "BACKUP_ERROR".to_string(),
         Error::Io(_) => "IO_ERROR".to_string(),
         Error::BackupsDisabled => "BACKUPS_DISABLED".to_string(),
         Error::CorruptStoreFile { .. } => "CORRUPT_STORE_FILE".to_string(),
         Error::InvalidBackupPayload(_) => "INVALID_BACKUP_PAYLOAD".to_string(),
      }
   }
}

use sqlite_snapshot_backup::Error as BackupError;

use crate::retry::LockContention;

/// Result type alias for toolkit operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for SQLite toolkit operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Error from SQLx operations.
   #[error(transparent)]
   Sqlx(#[from] sqlx::Error),

   /// Error from the connection manager.
   #[error(transparent)]
   ConnectionManager(#[from] sqlx_sqlite_conn_mgr::Error),

   /// Lock contention outlasted the retry budget.
   #[error("database stayed locked after {attempts} attempts: {source}")]
   TransientLock {
      attempts: u32,
      #[source]
      source: Box<Error>,
   },

   /// The validator rejected one or more rows. Nothing was written.
   #[error("validation failed: {}", .0.join("; "))]
   Validation(Vec<String>),

   /// Uniqueness, foreign key, NOT NULL or CHECK constraint violation.
   #[error("integrity violation: {0}")]
   Integrity(String),

   /// Snapshot references a table with no registered schema.
   #[error("no schema registered for table '{0}'")]
   UnknownTable(String),

   /// A schema names a parent that has not been registered yet.
   #[error("table '{table}' depends on unregistered parent '{parent}'")]
   UnknownParentTable { table: String, parent: String },

   /// Schema definition is inconsistent.
   #[error("invalid schema for table '{table}': {reason}")]
   InvalidSchema { table: String, reason: String },

   /// A row has no value for its table's primary key.
   #[error("row in table '{0}' has no primary key value")]
   MissingPrimaryKey(String),

   /// A row is not a JSON object or cannot be converted.
   #[error("invalid row for table '{table}': {reason}")]
   InvalidRow { table: String, reason: String },

   /// SQLite type that cannot be mapped to JSON.
   #[error("unsupported datatype: {0}")]
   UnsupportedDatatype(String),

   /// Multiple rows returned from fetchOne query.
   #[error("fetchOne() query returned {0} rows, expected 0 or 1")]
   MultipleRowsReturned(usize),

   /// Transaction has already been committed or rolled back.
   #[error("transaction has already been finalized (committed or rolled back)")]
   TransactionAlreadyFinalized,

   /// Error from the backup engine.
   #[error(transparent)]
   Backup(#[from] BackupError),

   /// JSON conversion of a record failed.
   #[error(transparent)]
   Json(#[from] serde_json::Error),

   /// I/O error when accessing database files.
   #[error("io error: {0}")]
   Io(#[from] std::io::Error),

   /// Generic error for operations that don't fit other categories.
   #[error("{0}")]
   Other(String),
}

impl Error {
   /// Extract a structured error code from the error type.
   ///
   /// This provides machine-readable error codes for error handling.
   pub fn error_code(&self) -> String {
      match self {
         Error::Sqlx(e) => {
            if let Some(code) = e.as_database_error().and_then(|db_err| db_err.code()) {
               return format!("SQLITE_{}", code);
            }
            "SQLX_ERROR".to_string()
         }
         Error::ConnectionManager(_) => "CONNECTION_ERROR".to_string(),
         Error::TransientLock { .. } => "TRANSIENT_LOCK".to_string(),
         Error::Validation(_) => "VALIDATION_FAILED".to_string(),
         Error::Integrity(_) => "INTEGRITY_VIOLATION".to_string(),
         Error::UnknownTable(_) => "UNKNOWN_TABLE".to_string(),
         Error::UnknownParentTable { .. } => "UNKNOWN_PARENT_TABLE".to_string(),
         Error::InvalidSchema { .. } => "INVALID_SCHEMA".to_string(),
         Error::MissingPrimaryKey(_) => "MISSING_PRIMARY_KEY".to_string(),
         Error::InvalidRow { .. } => "INVALID_ROW".to_string(),
         Error::UnsupportedDatatype(_) => "UNSUPPORTED_DATATYPE".to_string(),
         Error::MultipleRowsReturned(_) => "MULTIPLE_ROWS_RETURNED".to_string(),
         Error::TransactionAlreadyFinalized => "TRANSACTION_ALREADY_FINALIZED".to_string(),
         Error::Backup(_) => "BACKUP_ERROR".to_string(),
         Error::Json(_) => "JSON_ERROR".to_string(),
         Error::Io(_) => "IO_ERROR".to_string(),
         Error::Other(_) => "ERROR".to_string(),
      }
   }

   /// Moves constraint violations out of [`Error::Sqlx`] into
   /// [`Error::Integrity`]; everything else passes through.
   pub(crate) fn classify(self) -> Self {
      if let Error::Sqlx(sqlx::Error::Database(db_err)) = &self
         && is_constraint_violation(db_err.as_ref())
      {
         return Error::Integrity(db_err.message().to_string());
      }
      self
   }
}

impl LockContention for Error {
   fn is_lock_contention(&self) -> bool {
      match self {
         Error::Sqlx(e) => e.is_lock_contention(),
         Error::ConnectionManager(sqlx_sqlite_conn_mgr::Error::Sqlx(e)) => e.is_lock_contention(),
         _ => false,
      }
   }
}

/// SQLITE_CONSTRAINT (19) and its extended codes.
fn is_constraint_violation(db_err: &dyn sqlx::error::DatabaseError) -> bool {
   if let Some(code) = db_err.code()
      && let Ok(code) = code.parse::<i32>()
   {
      return code & 0xff == 19;
   }
   matches!(
      db_err.kind(),
      sqlx::error::ErrorKind::UniqueViolation
         | sqlx::error::ErrorKind::ForeignKeyViolation
         | sqlx::error::ErrorKind::NotNullViolation
         | sqlx::error::ErrorKind::CheckViolation
   )
}

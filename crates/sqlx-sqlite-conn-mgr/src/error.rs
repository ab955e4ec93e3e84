//! Error types for sqlx-sqlite-conn-mgr

use thiserror::Error;

/// Errors that may occur when working with sqlx-sqlite-conn-mgr
#[derive(Error, Debug)]
pub enum Error {
   /// IO error when accessing database files. Standard library IO errors
   /// are converted to this variant.
   #[error("IO error: {0}")]
   Io(#[from] std::io::Error),

   /// Error from the sqlx library. Standard sqlx errors are converted to this variant
   #[error("Sqlx error: {0}")]
   Sqlx(#[from] sqlx::Error),

   /// A journal profile pragma failed for a reason other than lock contention
   #[error("failed to apply `PRAGMA {pragma}`: {source}")]
   Profile {
      pragma: String,
      #[source]
      source: sqlx::Error,
   },

   /// Database has been closed and cannot be used
   #[error("Database has been closed")]
   DatabaseClosed,
}

/// A type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Returns true when a sqlx error carries SQLite's busy/locked signature.
///
/// Matches the primary result codes SQLITE_BUSY (5) and SQLITE_LOCKED (6),
/// including their extended codes, and falls back to the message text for
/// errors that lost their code on the way up.
pub fn is_lock_contention(err: &sqlx::Error) -> bool {
   match err {
      sqlx::Error::Database(db_err) => {
         if let Some(code) = db_err.code()
            && let Ok(code) = code.parse::<i32>()
         {
            let primary = code & 0xff;
            if primary == 5 || primary == 6 {
               return true;
            }
         }
         message_signals_contention(db_err.message())
      }
      other => message_signals_contention(&other.to_string()),
   }
}

fn message_signals_contention(message: &str) -> bool {
   let lower = message.to_ascii_lowercase();
   lower.contains("database is locked")
      || lower.contains("database table is locked")
      || lower.contains("database is busy")
      || lower.contains("sqlite_busy")
}

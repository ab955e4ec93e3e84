//! Whole-file store copies

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection, Row};
use sqlx_sqlite_conn_mgr::{shm_path, wal_path};
use tracing::{debug, trace};

use crate::{Error, Result};

/// Opens `path` read-only and runs `PRAGMA integrity_check`.
///
/// Fails with [`Error::CorruptStoreFile`] unless SQLite reports a single
/// `ok`. A missing file is an error, never created.
pub(crate) async fn check_integrity(path: &Path) -> Result<()> {
   tokio::fs::metadata(path).await?;
   let corrupt = |reason: String| Error::CorruptStoreFile {
      path: path.to_path_buf(),
      reason,
   };

   let mut conn = SqliteConnectOptions::new()
      .filename(path)
      .read_only(true)
      .create_if_missing(false)
      .connect()
      .await
      .map_err(|e| corrupt(e.to_string()))?;

   let outcome = sqlx::query("PRAGMA integrity_check")
      .fetch_all(&mut conn)
      .await
      .map(|rows| {
         rows
            .iter()
            .filter_map(|row| row.try_get::<String, _>(0).ok())
            .collect::<Vec<_>>()
      });
   let _ = conn.close().await;

   // Files that are not databases at all fail here rather than report
   let messages = outcome.map_err(|e| corrupt(e.to_string()))?;

   if messages.len() == 1 && messages[0] == "ok" {
      trace!(path = %path.display(), "Integrity check passed");
      Ok(())
   } else {
      Err(corrupt(messages.join("; ")))
   }
}

/// Replaces the closed store at `target` with a copy of `source`.
///
/// The copy lands next to `target` first and is renamed over it, so a
/// failed copy leaves `target` as it was. Stale journals of the old file
/// are removed.
pub(crate) async fn swap_in(source: &Path, target: &Path) -> Result<()> {
   let staged = staging_path(target);
   if let Err(e) = tokio::fs::copy(source, &staged).await {
      let _ = tokio::fs::remove_file(&staged).await;
      return Err(e.into());
   }

   remove_if_exists(&wal_path(target)).await?;
   remove_if_exists(&shm_path(target)).await?;
   tokio::fs::rename(&staged, target).await?;

   debug!(source = %source.display(), target = %target.display(), "Store file replaced");
   Ok(())
}

fn staging_path(target: &Path) -> PathBuf {
   let mut os = target.as_os_str().to_owned();
   os.push(".restore");
   PathBuf::from(os)
}

async fn remove_if_exists(path: &Path) -> Result<()> {
   match tokio::fs::remove_file(path).await {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e.into()),
   }
}

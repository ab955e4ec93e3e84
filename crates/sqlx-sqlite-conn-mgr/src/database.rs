//! SQLite database with a single writer and an optional read-only pool

use std::collections::HashMap;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, warn};

use crate::checkpoint::{CheckpointOutcome, CheckpointReason, run_checkpoint, shm_path, wal_path};
use crate::config::SqliteDatabaseConfig;
use crate::governor::OperationQueue;
use crate::maintenance::{MaintenanceSender, MaintenanceSignal, spawn_worker};
use crate::profile::JournalProfile;
use crate::state::{ConnectionState, ConnectionStats};
use crate::write_guard::WriteGuard;
use crate::{Error, Result};

/// Live databases keyed by resolved path, so a file only ever has one writer
/// in this process.
fn registry() -> &'static Mutex<HashMap<PathBuf, Weak<SqliteDatabase>>> {
   static REGISTRY: OnceLock<Mutex<HashMap<PathBuf, Weak<SqliteDatabase>>>> = OnceLock::new();
   REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// SQLite database with a single write connection and optional concurrent readers.
///
/// ## Architecture
///
/// - **`write_conn`**: Single-connection pool (max_connections=1) for serialized writes.
///   The journal profile for the deployment mode is applied to it at connect time.
/// - **`read_pool`**: Optional pool of read-only connections. Disabled when
///   `max_read_connections` is 0.
/// - **`state`**: Write counters, checkpoint clock and transaction depth.
/// - **`queue`**: Advisory FIFO admission queue for logical operations.
///
/// Checkpoints and idle maintenance run on a background worker fed through
/// `maintenance`; the write path only sends signals.
///
/// ## Usage Pattern
///
/// ```text
/// 1. Connect (creates the file, applies the profile, registers the instance)
/// 2. Reads: read_pool() when present, otherwise the writer
/// 3. Writes: acquire_writer(), then record_write() / notify_commit()
/// 4. close() for a final checkpoint and cleanup
/// ```
#[derive(Debug)]
pub struct SqliteDatabase {
   read_pool: Option<Pool<Sqlite>>,
   write_conn: Pool<Sqlite>,
   state: Arc<ConnectionState>,
   config: SqliteDatabaseConfig,
   queue: OperationQueue,
   maintenance: MaintenanceSender,
   closed: AtomicBool,
   path: PathBuf,
}

impl SqliteDatabase {
   /// Opens (or creates) the database at `path`.
   ///
   /// If this process already has the same file open, the existing instance
   /// is returned and `custom_config` is ignored.
   pub async fn connect(
      path: impl AsRef<Path>,
      custom_config: Option<SqliteDatabaseConfig>,
   ) -> Result<Arc<Self>> {
      let config = custom_config.unwrap_or_default();
      let path = resolve_path(path.as_ref()).await?;

      let mut instances = registry().lock().await;
      if let Some(existing) = instances.get(&path).and_then(Weak::upgrade)
         && !existing.is_closed()
      {
         debug!(path = %path.display(), "Reusing open database instance");
         return Ok(existing);
      }

      let write_options = SqliteConnectOptions::new()
         .filename(&path)
         .create_if_missing(true)
         .busy_timeout(config.busy_timeout);

      let state = Arc::new(ConnectionState::new(config.mode, config.busy_timeout));
      let profile = JournalProfile::for_mode(config.mode);

      // Every writer connection gets the profile, including ones the pool
      // opens to replace a dropped connection
      let hook_state = Arc::clone(&state);
      let hook_path = path.clone();
      let write_conn = SqlitePoolOptions::new()
         .max_connections(1)
         .idle_timeout(None)
         .max_lifetime(None)
         .after_connect(move |conn, _meta| {
            let state = Arc::clone(&hook_state);
            let path = hook_path.clone();
            Box::pin(async move {
               let drift = profile
                  .apply(conn)
                  .await
                  .map_err(|e| sqlx::Error::Configuration(Box::new(e)))?;
               if !drift.is_empty() {
                  warn!(path = %path.display(), ?drift, "Journal profile partially applied");
                  state.record_drift(drift);
               }
               Ok(())
            })
         })
         .connect_with(write_options)
         .await
         .map_err(unwrap_profile_error)?;

      let read_pool = if config.max_read_connections > 0 {
         let read_options = SqliteConnectOptions::new()
            .filename(&path)
            .read_only(true)
            .busy_timeout(config.busy_timeout);

         Some(
            SqlitePoolOptions::new()
               .max_connections(config.max_read_connections)
               .idle_timeout(config.idle_timeout)
               .connect_with(read_options)
               .await?,
         )
      } else {
         None
      };

      let (tx, rx) = mpsc::unbounded_channel();
      let idle_delay = config
         .auto_maintenance
         .then_some(config.idle_maintenance_delay);
      let queue = OperationQueue::new(config.max_concurrent_operations, idle_delay, tx.clone());

      let db = Arc::new(Self {
         read_pool,
         write_conn,
         state,
         config,
         queue,
         maintenance: tx,
         closed: AtomicBool::new(false),
         path: path.clone(),
      });

      spawn_worker(Arc::downgrade(&db), rx);
      instances.insert(path, Arc::downgrade(&db));

      debug!(
         path = %db.path.display(),
         mode = ?db.config.mode,
         read_pool = db.read_pool.is_some(),
         "Database connected"
      );

      Ok(db)
   }

   /// Read-only pool, or `None` when the read handle is disabled.
   pub fn read_pool(&self) -> Result<Option<&Pool<Sqlite>>> {
      if self.is_closed() {
         return Err(Error::DatabaseClosed);
      }
      Ok(self.read_pool.as_ref())
   }

   /// Waits for exclusive access to the write connection.
   pub async fn acquire_writer(&self) -> Result<WriteGuard> {
      if self.is_closed() {
         return Err(Error::DatabaseClosed);
      }
      let conn = self.write_conn.acquire().await?;
      Ok(WriteGuard::new(conn))
   }

   /// Runs `op` through the admission queue.
   pub async fn queue_operation<F>(&self, op: F) -> Result<F::Output>
   where
      F: Future,
   {
      self.queue.run(op).await
   }

   /// Counts a write and lets the checkpoint scheduler look at it.
   ///
   /// Never waits on the scheduler.
   pub fn record_write(&self) {
      self.state.record_write();
      let _ = self.maintenance.send(MaintenanceSignal::Write);
   }

   /// Tells the scheduler a transaction committed. In local mode this forces
   /// a truncating checkpoint once the writer is free.
   pub fn notify_commit(&self) {
      let _ = self.maintenance.send(MaintenanceSignal::Commit);
   }

   /// Waits until every maintenance signal sent so far has been handled.
   pub async fn flush_maintenance(&self) {
      let (tx, rx) = oneshot::channel();
      if self.maintenance.send(MaintenanceSignal::Flush(tx)).is_ok() {
         let _ = rx.await;
      }
   }

   /// Runs a truncating checkpoint now, on the caller's task.
   pub async fn checkpoint(&self) -> Result<CheckpointOutcome> {
      let mut writer = self.acquire_writer().await?;
      run_checkpoint(&mut writer, &self.state, CheckpointReason::Close).await
   }

   /// Writes a consistent copy of the database to `dest` with `VACUUM INTO`.
   pub async fn backup_to(&self, dest: impl AsRef<Path>) -> Result<()> {
      let dest = dest.as_ref();
      if let Some(parent) = dest.parent()
         && !parent.as_os_str().is_empty()
      {
         tokio::fs::create_dir_all(parent).await?;
      }

      let mut writer = self.acquire_writer().await?;
      sqlx::query("VACUUM INTO ?")
         .bind(dest.to_string_lossy().into_owned())
         .execute(&mut *writer)
         .await?;

      debug!(dest = %dest.display(), "Database copied");
      Ok(())
   }

   pub fn state(&self) -> &ConnectionState {
      &self.state
   }

   pub fn stats(&self) -> ConnectionStats {
      self.state.stats()
   }

   pub fn config(&self) -> &SqliteDatabaseConfig {
      &self.config
   }

   pub fn queue(&self) -> &OperationQueue {
      &self.queue
   }

   pub fn path(&self) -> &Path {
      &self.path
   }

   pub fn is_closed(&self) -> bool {
      self.closed.load(Ordering::Acquire)
   }

   /// Closes the database.
   ///
   /// Stops admitting queued operations, drains the maintenance worker,
   /// forces a final checkpoint, and closes both pools. In network mode any
   /// `-wal`/`-shm` files left from an earlier WAL session are removed.
   /// Calling it again is a no-op.
   pub async fn close(&self) -> Result<()> {
      if self.is_closed() {
         return Ok(());
      }

      self.queue.close();
      self.flush_maintenance().await;

      if self.closed.swap(true, Ordering::AcqRel) {
         return Ok(());
      }
      let _ = self.maintenance.send(MaintenanceSignal::Shutdown);

      match self.write_conn.acquire().await {
         Ok(mut conn) => {
            if let Err(e) = run_checkpoint(&mut conn, &self.state, CheckpointReason::Close).await {
               warn!(error = %e, "Final checkpoint failed");
            }
         }
         Err(e) => warn!(error = %e, "Could not acquire writer for final checkpoint"),
      }

      if let Some(pool) = &self.read_pool {
         pool.close().await;
      }
      self.write_conn.close().await;

      {
         let mut instances = registry().lock().await;
         if let Some(registered) = instances.get(&self.path)
            && std::ptr::eq(registered.as_ptr(), self)
         {
            instances.remove(&self.path);
         }
      }

      if self.config.mode.is_network() {
         remove_if_exists(&wal_path(&self.path)).await?;
         remove_if_exists(&shm_path(&self.path)).await?;
      }

      debug!(path = %self.path.display(), "Database closed");
      Ok(())
   }

   /// Closes the database and deletes the database file and its journals.
   pub async fn remove(&self) -> Result<()> {
      self.close().await?;

      remove_if_exists(&self.path).await?;
      remove_if_exists(&wal_path(&self.path)).await?;
      remove_if_exists(&shm_path(&self.path)).await?;

      let mut journal = self.path.as_os_str().to_owned();
      journal.push("-journal");
      remove_if_exists(Path::new(&journal)).await?;

      debug!(path = %self.path.display(), "Database removed");
      Ok(())
   }
}

/// Creates missing parent directories and returns an absolute path, so two
/// spellings of the same file share one registry entry.
async fn resolve_path(path: &Path) -> Result<PathBuf> {
   let file_name = path.file_name().ok_or_else(|| {
      std::io::Error::new(
         ErrorKind::InvalidInput,
         format!("database path has no file name: {}", path.display()),
      )
   })?;

   let parent = path
      .parent()
      .filter(|p| !p.as_os_str().is_empty())
      .unwrap_or_else(|| Path::new("."));

   tokio::fs::create_dir_all(parent).await?;
   let parent = tokio::fs::canonicalize(parent).await?;

   Ok(parent.join(file_name))
}

async fn remove_if_exists(path: &Path) -> Result<()> {
   match tokio::fs::remove_file(path).await {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e.into()),
   }
}

/// Recovers an [`Error::Profile`] raised inside the writer's connect hook.
fn unwrap_profile_error(err: sqlx::Error) -> Error {
   match err {
      sqlx::Error::Configuration(inner) => match inner.downcast::<Error>() {
         Ok(err) => *err,
         Err(inner) => Error::Sqlx(sqlx::Error::Configuration(inner)),
      },
      other => Error::Sqlx(other),
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::config::DeploymentMode;
   use sqlx::Row;
   use std::time::Duration;
   use tempfile::TempDir;

   async fn journal_mode(db: &SqliteDatabase) -> String {
      let mut writer = db.acquire_writer().await.unwrap();
      let row = sqlx::query("PRAGMA journal_mode")
         .fetch_one(&mut *writer)
         .await
         .unwrap();
      row.get::<String, _>(0).to_ascii_lowercase()
   }

   #[tokio::test]
   async fn test_local_mode_uses_wal() {
      let temp = TempDir::new().unwrap();
      let db = SqliteDatabase::connect(temp.path().join("local.db"), None)
         .await
         .unwrap();

      assert_eq!(journal_mode(&db).await, "wal");
      assert!(db.read_pool().unwrap().is_some());
      assert!(db.stats().profile_drift.is_empty());

      db.close().await.unwrap();
   }

   #[tokio::test]
   async fn test_network_mode_uses_rollback_journal() {
      let temp = TempDir::new().unwrap();
      let config = SqliteDatabaseConfig {
         mode: DeploymentMode::Network,
         max_read_connections: 0,
         ..Default::default()
      };
      let db = SqliteDatabase::connect(temp.path().join("network.db"), Some(config))
         .await
         .unwrap();

      assert_eq!(journal_mode(&db).await, "delete");
      assert!(db.read_pool().unwrap().is_none());

      let mut writer = db.acquire_writer().await.unwrap();
      let sync: i64 = sqlx::query("PRAGMA synchronous")
         .fetch_one(&mut *writer)
         .await
         .unwrap()
         .get(0);
      // FULL
      assert_eq!(sync, 2);
      drop(writer);

      db.close().await.unwrap();
   }

   #[tokio::test]
   async fn test_replacement_writer_gets_profile() {
      let temp = TempDir::new().unwrap();
      let db = SqliteDatabase::connect(temp.path().join("replaced.db"), None)
         .await
         .unwrap();

      db.acquire_writer().await.unwrap().discard();

      let mut writer = db.acquire_writer().await.unwrap();
      let foreign_keys: i64 = sqlx::query("PRAGMA foreign_keys")
         .fetch_one(&mut *writer)
         .await
         .unwrap()
         .get(0);
      let sync: i64 = sqlx::query("PRAGMA synchronous")
         .fetch_one(&mut *writer)
         .await
         .unwrap()
         .get(0);
      let autocheckpoint: i64 = sqlx::query("PRAGMA wal_autocheckpoint")
         .fetch_one(&mut *writer)
         .await
         .unwrap()
         .get(0);
      assert_eq!(foreign_keys, 1);
      assert_eq!(sync, 2);
      assert_eq!(autocheckpoint, 100);
      drop(writer);

      assert!(db.stats().profile_drift.is_empty());
      db.close().await.unwrap();
   }

   #[tokio::test]
   async fn test_network_close_removes_residual_wal_files() {
      let temp = TempDir::new().unwrap();
      let path = temp.path().join("shared.db");

      // Leave WAL residue from an earlier local session
      tokio::fs::write(wal_path(&path), b"").await.unwrap();
      tokio::fs::write(shm_path(&path), b"").await.unwrap();

      let config = SqliteDatabaseConfig {
         mode: DeploymentMode::Network,
         ..Default::default()
      };
      let db = SqliteDatabase::connect(&path, Some(config)).await.unwrap();
      db.close().await.unwrap();

      assert!(path.exists());
      assert!(!wal_path(&path).exists());
      assert!(!shm_path(&path).exists());
   }

   #[tokio::test]
   async fn test_connect_reuses_live_instance() {
      let temp = TempDir::new().unwrap();
      let path = temp.path().join("shared.db");

      let first = SqliteDatabase::connect(&path, None).await.unwrap();
      let second = SqliteDatabase::connect(&path, None).await.unwrap();
      assert!(Arc::ptr_eq(&first, &second));

      first.close().await.unwrap();

      let third = SqliteDatabase::connect(&path, None).await.unwrap();
      assert!(!Arc::ptr_eq(&first, &third));
      third.close().await.unwrap();
   }

   #[tokio::test]
   async fn test_closed_database_rejects_use() {
      let temp = TempDir::new().unwrap();
      let db = SqliteDatabase::connect(temp.path().join("closed.db"), None)
         .await
         .unwrap();
      db.close().await.unwrap();

      assert!(matches!(
         db.acquire_writer().await,
         Err(Error::DatabaseClosed)
      ));
      assert!(matches!(db.read_pool(), Err(Error::DatabaseClosed)));
      assert!(matches!(
         db.queue_operation(async {}).await,
         Err(Error::DatabaseClosed)
      ));
      // Second close is a no-op
      db.close().await.unwrap();
   }

   #[tokio::test]
   async fn test_commit_signal_forces_checkpoint_in_local_mode() {
      let temp = TempDir::new().unwrap();
      let db = SqliteDatabase::connect(temp.path().join("ckpt.db"), None)
         .await
         .unwrap();

      {
         let mut writer = db.acquire_writer().await.unwrap();
         sqlx::query("CREATE TABLE t (id INTEGER PRIMARY KEY)")
            .execute(&mut *writer)
            .await
            .unwrap();
      }
      db.record_write();
      db.notify_commit();
      db.flush_maintenance().await;

      let stats = db.stats();
      assert!(stats.checkpoints >= 1);
      assert_eq!(stats.writes_since_checkpoint, 0);

      db.close().await.unwrap();
   }

   #[tokio::test]
   async fn test_idle_maintenance_runs_after_queue_drains() {
      let temp = TempDir::new().unwrap();
      let config = SqliteDatabaseConfig {
         idle_maintenance_delay: Duration::from_millis(10),
         ..Default::default()
      };
      let db = SqliteDatabase::connect(temp.path().join("idle.db"), Some(config))
         .await
         .unwrap();

      db.queue_operation(async {}).await.unwrap();
      tokio::time::sleep(Duration::from_millis(100)).await;
      db.flush_maintenance().await;

      assert_eq!(db.stats().idle_maintenance_runs, 1);
      db.close().await.unwrap();
   }

   #[tokio::test]
   async fn test_backup_to_writes_copy() {
      let temp = TempDir::new().unwrap();
      let db = SqliteDatabase::connect(temp.path().join("src.db"), None)
         .await
         .unwrap();

      {
         let mut writer = db.acquire_writer().await.unwrap();
         sqlx::query("CREATE TABLE t (id INTEGER PRIMARY KEY)")
            .execute(&mut *writer)
            .await
            .unwrap();
         sqlx::query("INSERT INTO t (id) VALUES (1), (2)")
            .execute(&mut *writer)
            .await
            .unwrap();
      }

      let dest = temp.path().join("copies").join("copy.db");
      db.backup_to(&dest).await.unwrap();
      db.close().await.unwrap();

      let copy = SqliteDatabase::connect(&dest, None).await.unwrap();
      let mut writer = copy.acquire_writer().await.unwrap();
      let count: i64 = sqlx::query("SELECT COUNT(*) FROM t")
         .fetch_one(&mut *writer)
         .await
         .unwrap()
         .get(0);
      assert_eq!(count, 2);
      drop(writer);
      copy.close().await.unwrap();
   }
}

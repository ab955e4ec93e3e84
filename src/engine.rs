use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value as JsonValue;
use sqlite_snapshot_backup::{BackupEngine, BackupEntry};
use sqlx_sqlite_conn_mgr::ConnectionStats;
use sqlx_sqlite_toolkit::{
   AcceptAll, DatabaseWrapper, JsonRow, SchemaRegistry, Snapshot, Statement, SyncReport,
   SyncStrategy, Transaction, Validator, WriteQueryResult, sync, validate_snapshot,
};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::store_file;
use crate::{Error, Result};

/// Snapshot persistence, backups and store-file maintenance for one database.
///
/// Call [`initialize`](Self::initialize) once before anything else and
/// [`close`](Self::close) once at shutdown. Every mutating call is admitted
/// through the database's operation queue, so concurrent callers are
/// sequenced in arrival order.
pub struct SyncEngine {
   db: DatabaseWrapper,
   registry: Arc<SchemaRegistry>,
   validator: Arc<dyn Validator>,
   backups: Option<BackupEngine>,
   config: EngineConfig,
}

impl SyncEngine {
   /// Opens the store at `path`, creates the registered tables in one
   /// transaction and opens the backup directory when one is configured.
   pub async fn initialize(
      path: impl AsRef<Path>,
      config: EngineConfig,
      registry: SchemaRegistry,
   ) -> Result<Self> {
      let db = open_store(path.as_ref(), &config).await?;
      create_tables(&db, &registry).await?;

      let backups = match &config.backup_dir {
         Some(dir) => Some(BackupEngine::open(dir, config.backup.clone()).await?),
         None => None,
      };

      debug!(
         path = %db.database().path().display(),
         tables = registry.len(),
         backups = backups.is_some(),
         "Sync engine initialized"
      );

      Ok(Self {
         db,
         registry: Arc::new(registry),
         validator: Arc::new(AcceptAll),
         backups,
         config,
      })
   }

   /// Replaces the validator run on every persisted row.
   pub fn with_validator(mut self, validator: impl Validator + 'static) -> Self {
      self.validator = Arc::new(validator);
      self
   }

   pub fn database(&self) -> &DatabaseWrapper {
      &self.db
   }

   pub fn registry(&self) -> &SchemaRegistry {
      &self.registry
   }

   pub fn config(&self) -> &EngineConfig {
      &self.config
   }

   /// The backup engine, when a backup directory is configured.
   pub fn backups(&self) -> Option<&BackupEngine> {
      self.backups.as_ref()
   }

   pub fn path(&self) -> &Path {
      self.db.database().path()
   }

   pub fn stats(&self) -> ConnectionStats {
      self.db.database().stats()
   }

   /// Validates `snapshot` and reconciles the store with it in one
   /// transaction.
   ///
   /// Nothing is written when validation fails. Any failure after that
   /// rolls the whole snapshot back. Once committed, the recorded changes
   /// are handed to the backup engine's change log.
   pub async fn persist_snapshot(
      &self,
      snapshot: &Snapshot,
      strategy: SyncStrategy,
   ) -> Result<SyncReport> {
      let report = self
         .db
         .database()
         .queue_operation(self.persist(snapshot, strategy))
         .await??;

      if let Some(backups) = &self.backups {
         for change in &report.changes {
            backups.record_change(change.clone());
         }
      }
      Ok(report)
   }

   async fn persist(&self, snapshot: &Snapshot, strategy: SyncStrategy) -> Result<SyncReport> {
      let sanitized = validate_snapshot(self.validator.as_ref(), &self.registry, snapshot)?;
      let registry = &self.registry;

      let report = self
         .db
         .transaction(async |tx: &mut Transaction| {
            sync::apply(tx, registry, &sanitized, strategy).await
         })
         .await?;
      Ok(report)
   }

   /// Reads every registered table back as a snapshot in external field
   /// names. Empty tables are included with no rows.
   pub async fn load_snapshot(&self) -> Result<Snapshot> {
      self.db.database().queue_operation(self.read_snapshot()).await?
   }

   async fn read_snapshot(&self) -> Result<Snapshot> {
      let mut snapshot = Snapshot::new();
      for schema in self.registry.tables() {
         let rows = self
            .db
            .select(format!("SELECT * FROM {}", schema.quoted_name()), Vec::new())
            .await?;
         let entities: Vec<JsonRow> = rows
            .iter()
            .map(|row| schema.fields.to_external(row))
            .collect();
         snapshot.set_rows(schema.name.clone(), entities);
      }
      Ok(snapshot)
   }

   /// Runs a single statement through the retry layer.
   pub async fn execute(
      &self,
      query: impl Into<String>,
      values: Vec<JsonValue>,
   ) -> Result<WriteQueryResult> {
      let result = self
         .db
         .database()
         .queue_operation(self.db.execute(query.into(), values))
         .await??;
      Ok(result)
   }

   /// Runs `statements` in one transaction.
   pub async fn execute_transaction(
      &self,
      statements: Vec<Statement>,
   ) -> Result<Vec<WriteQueryResult>> {
      let results = self
         .db
         .database()
         .queue_operation(self.db.execute_transaction(statements))
         .await??;
      Ok(results)
   }

   pub async fn select(
      &self,
      query: impl Into<String>,
      values: Vec<JsonValue>,
   ) -> Result<Vec<JsonRow>> {
      Ok(self.db.select(query.into(), values).await?)
   }

   // ─── Snapshot backups ───

   fn backup_engine(&self) -> Result<&BackupEngine> {
      self.backups.as_ref().ok_or(Error::BackupsDisabled)
   }

   /// Backs up the current store contents. Returns `None` when they are
   /// unchanged since the last full backup.
   pub async fn create_full_backup(&self) -> Result<Option<BackupEntry>> {
      let backups = self.backup_engine()?;
      let snapshot = self.load_snapshot().await?;
      let payload = snapshot.to_json()?;
      Ok(backups.create_full_backup(&payload).await?)
   }

   /// Writes the pending change log as an incremental backup. Returns
   /// `None` when there are no pending changes.
   pub async fn create_incremental_backup(&self) -> Result<Option<BackupEntry>> {
      Ok(self.backup_engine()?.create_incremental_backup().await?)
   }

   pub async fn list_backups(&self) -> Result<Vec<BackupEntry>> {
      Ok(self.backup_engine()?.list_backups().await?)
   }

   /// Applies retention and returns the removed backups.
   pub async fn cleanup_old_backups(&self) -> Result<Vec<BackupEntry>> {
      Ok(self.backup_engine()?.cleanup_old_backups().await?)
   }

   /// Replaces the store contents with a full backup.
   ///
   /// The payload is decompressed and parsed before the store is touched;
   /// incremental backups and payloads that are not snapshots fail with
   /// the store unchanged. The snapshot is then written with
   /// [`SyncStrategy::Full`] in one transaction.
   pub async fn restore_from_backup(&self, path: impl AsRef<Path>) -> Result<SyncReport> {
      let path = path.as_ref();
      let payload = self.backup_engine()?.restore_backup(path).await?;
      let snapshot =
         Snapshot::from_json(payload).map_err(|e| Error::InvalidBackupPayload(e.to_string()))?;
      for table in snapshot.table_names() {
         if self.registry.get(table).is_none() {
            return Err(Error::InvalidBackupPayload(format!("unknown table '{table}'")));
         }
      }

      let report = self.persist_snapshot(&snapshot, SyncStrategy::Full).await?;
      debug!(path = %path.display(), rows = report.rows_written, "Backup restored");
      Ok(report)
   }

   // ─── Store files ───

   /// Copies the live store to `dest` as a consistent single file.
   pub async fn backup_store_file(&self, dest: impl AsRef<Path>) -> Result<()> {
      let database = self.db.database();
      database.queue_operation(database.backup_to(dest)).await??;
      Ok(())
   }

   /// Replaces the store file with `source` and reopens it.
   ///
   /// `source` must pass `PRAGMA integrity_check` before the live store is
   /// closed, so a corrupt or missing source leaves the engine as it was.
   /// If the swap itself fails the original file is reopened.
   pub async fn restore_store_file(&mut self, source: impl AsRef<Path>) -> Result<()> {
      let source = source.as_ref();
      store_file::check_integrity(source).await?;

      let target: PathBuf = self.path().to_path_buf();
      if let Some(backups) = &self.backups {
         backups.flush().await;
      }
      self.db.clone().close().await?;

      let swapped = store_file::swap_in(source, &target).await;
      self.db = open_store(&target, &self.config).await?;
      swapped?;

      debug!(source = %source.display(), target = %target.display(), "Store file restored");
      Ok(())
   }

   /// Waits for pending automatic backups, then closes the database.
   pub async fn close(self) -> Result<()> {
      if let Some(backups) = &self.backups {
         backups.flush().await;
         let pending = backups.pending_changes();
         if pending > 0 {
            warn!(pending, "Closing with changes not yet in any backup");
         }
      }
      self.db.close().await?;
      Ok(())
   }
}

async fn open_store(path: &Path, config: &EngineConfig) -> Result<DatabaseWrapper> {
   let db = DatabaseWrapper::connect(path, Some(config.database_config()))
      .await?
      .with_retry_policy(config.retry_policy());
   Ok(db)
}

async fn create_tables(db: &DatabaseWrapper, registry: &SchemaRegistry) -> Result<()> {
   let statements: Vec<Statement> = registry
      .ddl_statements()
      .map(|ddl| Statement::new(ddl, Vec::new()))
      .collect();
   if !statements.is_empty() {
      db.execute_transaction(statements).await?;
   }
   Ok(())
}

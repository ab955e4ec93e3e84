use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use serde_json::{Value as JsonValue, json};
use time::OffsetDateTime;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, warn};

use crate::artifact::{self, BackupArtifact, BackupEntry, BackupIndex, BackupKind};
use crate::change_log::{ChangeLog, ChangeOperation, ChangeRecord};
use crate::{BackupConfig, Error, Result, codec, retention, timestamp};

enum AutoBackup {
   Changes(Vec<ChangeRecord>),
   Flush(oneshot::Sender<()>),
}

struct Inner {
   dir: PathBuf,
   config: BackupConfig,
   log: ChangeLog,
   /// Held for the whole of every backup write, serializing backup I/O.
   index: Mutex<BackupIndex>,
   auto_tx: mpsc::UnboundedSender<AutoBackup>,
}

/// Snapshot backups with an incremental change log.
///
/// Full backups store a canonical, checksummed and gzipped copy of an
/// arbitrary JSON payload; unchanged payloads are skipped. Change records
/// accumulate in memory and are packaged into incremental backups, either
/// explicitly or automatically once `incremental_threshold` is reached.
///
/// ```no_run
/// # use sqlite_snapshot_backup::{BackupConfig, BackupEngine};
/// # async fn example() -> sqlite_snapshot_backup::Result<()> {
/// let backups = BackupEngine::open("/data/backups", BackupConfig::default()).await?;
/// let created = backups.create_full_backup(&serde_json::json!({"tasks": []})).await?;
/// assert!(created.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BackupEngine {
   inner: Arc<Inner>,
}

impl BackupEngine {
   /// Opens (creating if needed) a backup directory and starts the
   /// auto-backup worker. Must be called within a tokio runtime.
   pub async fn open(dir: impl AsRef<Path>, config: BackupConfig) -> Result<Self> {
      config.validate()?;
      let dir = dir.as_ref().to_path_buf();
      tokio::fs::create_dir_all(&dir).await?;
      let index = BackupIndex::load(&dir).await?;

      let (auto_tx, auto_rx) = mpsc::unbounded_channel();
      let inner = Arc::new(Inner {
         dir,
         config,
         log: ChangeLog::default(),
         index: Mutex::new(index),
         auto_tx,
      });
      tokio::spawn(auto_backup_worker(Arc::downgrade(&inner), auto_rx));

      debug!(dir = %inner.dir.display(), "Backup engine opened");
      Ok(Self { inner })
   }

   pub fn dir(&self) -> &Path {
      &self.inner.dir
   }

   pub fn config(&self) -> &BackupConfig {
      &self.inner.config
   }

   /// Checksum of the most recent full backup, if any.
   pub async fn last_backup_hash(&self) -> Option<String> {
      self.inner.index.lock().await.last_backup_hash.clone()
   }

   /// Number of change records not yet packaged into a backup.
   pub fn pending_changes(&self) -> usize {
      self.inner.log.len()
   }

   /// Copy of the pending change records, oldest first.
   pub fn pending_records(&self) -> Vec<ChangeRecord> {
      self.inner.log.snapshot()
   }

   /// Writes a full backup of `payload`.
   ///
   /// Returns `Ok(None)` without touching disk when the payload's checksum
   /// matches the last full backup. On success the change log is cleared
   /// and retention runs.
   pub async fn create_full_backup(&self, payload: &JsonValue) -> Result<Option<BackupEntry>> {
      let canonical = codec::canonical_json(payload)?;
      let checksum = codec::checksum(canonical.as_bytes());

      let entry = {
         let mut index = self.inner.index.lock().await;
         if index.last_backup_hash.as_deref() == Some(checksum.as_str()) {
            debug!(checksum = %checksum, "Payload unchanged, skipping full backup");
            return Ok(None);
         }

         let entry = self
            .inner
            .write_artifact(canonical, checksum.clone(), BackupKind::Full, None, None)
            .await?;

         index.last_backup_hash = Some(checksum);
         index.last_backup = Some(entry.artifact.clone());
         index.timestamp = Some(timestamp::now());
         index.save(&self.inner.dir).await?;
         entry
      };

      self.inner.log.clear();

      if let Err(e) = self.cleanup_old_backups().await {
         warn!(error = %e, "Retention sweep after full backup failed");
      }

      Ok(Some(entry))
   }

   /// Packages every pending change record into an incremental backup.
   ///
   /// Returns `Ok(None)` when the log is empty. On failure the records are
   /// returned to the log.
   pub async fn create_incremental_backup(&self) -> Result<Option<BackupEntry>> {
      let changes = self.inner.log.drain();
      if changes.is_empty() {
         return Ok(None);
      }

      match self.inner.write_incremental(&changes).await {
         Ok(entry) => Ok(Some(entry)),
         Err(e) => {
            self.inner.log.restore(changes);
            Err(e)
         }
      }
   }

   /// Appends a change record stamped with the current time.
   pub fn log_change(
      &self,
      table: impl Into<String>,
      operation: ChangeOperation,
      record_id: JsonValue,
      old_data: Option<JsonValue>,
      new_data: Option<JsonValue>,
   ) {
      self.record_change(ChangeRecord::new(
         table, operation, record_id, old_data, new_data,
      ));
   }

   /// Appends an already-built change record.
   ///
   /// Reaching `incremental_threshold` hands the pending records to the
   /// background worker. Never fails; auto-backup errors are logged and the
   /// records re-queued.
   pub fn record_change(&self, record: ChangeRecord) {
      let pending = self.inner.log.push(record);
      let threshold = self.inner.config.incremental_threshold;
      if threshold == 0 || pending < threshold {
         return;
      }

      let drained = self.inner.log.drain();
      if drained.is_empty() {
         return;
      }
      debug!(changes = drained.len(), "Incremental threshold reached");
      if let Err(mpsc::error::SendError(AutoBackup::Changes(drained))) =
         self.inner.auto_tx.send(AutoBackup::Changes(drained))
      {
         warn!("Auto-backup worker stopped; keeping changes pending");
         self.inner.log.restore(drained);
      }
   }

   /// Waits until every auto-backup queued so far has finished.
   pub async fn flush(&self) {
      let (tx, rx) = oneshot::channel();
      if self.inner.auto_tx.send(AutoBackup::Flush(tx)).is_ok() {
         let _ = rx.await;
      }
   }

   /// Backups found in the directory, newest first. Unreadable sidecars are
   /// skipped with a warning.
   pub async fn list_backups(&self) -> Result<Vec<BackupEntry>> {
      let mut entries = Vec::new();
      let mut dir = tokio::fs::read_dir(&self.inner.dir).await?;

      while let Some(item) = dir.next_entry().await? {
         let path = item.path();
         if !artifact::is_sidecar(&path) {
            continue;
         }
         let Some(payload) = artifact::payload_path(&path) else {
            continue;
         };

         let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
               warn!(path = %path.display(), error = %e, "Skipping unreadable backup sidecar");
               continue;
            }
         };
         match serde_json::from_slice::<BackupArtifact>(&bytes) {
            Ok(artifact) => entries.push(BackupEntry {
               artifact,
               path: payload,
            }),
            Err(e) => {
               warn!(path = %path.display(), error = %e, "Skipping corrupt backup sidecar");
            }
         }
      }

      retention::sort_newest_first(&mut entries);
      Ok(entries)
   }

   /// Applies age then count retention, deleting payload and sidecar of
   /// each expired backup. Returns the removed entries.
   pub async fn cleanup_old_backups(&self) -> Result<Vec<BackupEntry>> {
      let entries = self.list_backups().await?;
      let (_, removed) = retention::plan(entries, &self.inner.config, OffsetDateTime::now_utc());

      for entry in &removed {
         remove_if_exists(&entry.path).await?;
         remove_if_exists(&entry.sidecar_path()).await?;
      }
      if !removed.is_empty() {
         debug!(removed = removed.len(), "Old backups removed");
      }
      Ok(removed)
   }

   /// Reads back the payload of a full backup.
   ///
   /// Incremental payloads cannot be restored on their own and are rejected.
   pub async fn restore_backup(&self, path: impl AsRef<Path>) -> Result<JsonValue> {
      let path = path.as_ref();
      let compressed = tokio::fs::read(path).await?;
      let raw = codec::decompress(compressed).await?;
      let payload: JsonValue = serde_json::from_slice(&raw)?;

      if let Some(object) = payload.as_object()
         && (object.contains_key("changes") || object.contains_key("baseBackupHash"))
      {
         return Err(Error::IncrementalRestoreUnsupported(path.to_path_buf()));
      }

      debug!(path = %path.display(), "Backup payload restored");
      Ok(payload)
   }
}

impl Inner {
   async fn write_incremental(&self, changes: &[ChangeRecord]) -> Result<BackupEntry> {
      let index = self.index.lock().await;
      let base = index.last_backup_hash.clone();
      let payload = json!({
         "changes": changes,
         "baseBackupHash": base,
         "timestamp": timestamp::now(),
      });
      let canonical = codec::canonical_json(&payload)?;
      let checksum = codec::checksum(canonical.as_bytes());

      let entry = self
         .write_artifact(
            canonical,
            checksum,
            BackupKind::Incremental,
            Some(changes.len()),
            base,
         )
         .await?;
      drop(index);
      Ok(entry)
   }

   /// Compresses and writes the payload, then its sidecar. The sidecar is
   /// written last so listings never see a backup without a payload.
   async fn write_artifact(
      &self,
      canonical: String,
      checksum: String,
      kind: BackupKind,
      changes: Option<usize>,
      base_backup_hash: Option<String>,
   ) -> Result<BackupEntry> {
      let size = canonical.len() as u64;
      let compressed = codec::compress(canonical.into_bytes(), self.config.compression_level).await?;

      let artifact = BackupArtifact {
         timestamp: timestamp::now(),
         kind,
         size,
         compressed_size: compressed.len() as u64,
         checksum,
         changes,
         base_backup_hash,
      };
      let path = self.dir.join(artifact.file_name());

      tokio::fs::write(&path, &compressed).await?;
      let sidecar = serde_json::to_vec_pretty(&artifact)?;
      if let Err(e) = tokio::fs::write(artifact::sidecar_path(&path), sidecar).await {
         let _ = tokio::fs::remove_file(&path).await;
         return Err(e.into());
      }

      debug!(
         path = %path.display(),
         kind = kind.as_str(),
         size,
         compressed_size = artifact.compressed_size,
         "Backup written"
      );
      Ok(BackupEntry { artifact, path })
   }
}

async fn auto_backup_worker(inner: Weak<Inner>, mut rx: mpsc::UnboundedReceiver<AutoBackup>) {
   while let Some(message) = rx.recv().await {
      match message {
         AutoBackup::Changes(changes) => {
            let Some(inner) = inner.upgrade() else {
               break;
            };
            match inner.write_incremental(&changes).await {
               Ok(entry) => {
                  debug!(path = %entry.path.display(), "Automatic incremental backup written");
               }
               Err(e) => {
                  warn!(error = %e, changes = changes.len(), "Automatic incremental backup failed");
                  inner.log.restore(changes);
               }
            }
         }
         AutoBackup::Flush(done) => {
            let _ = done.send(());
         }
      }
   }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
   match tokio::fs::remove_file(path).await {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(Error::Io(e)),
   }
}

//! WAL checkpoint scheduling
//!
//! SQLite's own auto-checkpoint is passive and never truncates the WAL. The
//! scheduler here forces `wal_checkpoint(TRUNCATE)` once enough writes,
//! time, or WAL bytes have accumulated, and after every commit.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::{Row, SqliteConnection};
use tracing::{debug, trace};

use crate::Result;
use crate::state::ConnectionState;

/// Thresholds that trigger a truncating checkpoint. Any one is enough.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointPolicy {
   /// Writes since the last checkpoint
   ///
   /// Default: 20
   pub write_threshold: u64,

   /// Time since the last checkpoint
   ///
   /// Default: 2 seconds
   pub interval: Duration,

   /// Size of the `-wal` file in bytes
   ///
   /// Default: 512 KiB
   pub wal_size_threshold: u64,
}

impl Default for CheckpointPolicy {
   fn default() -> Self {
      Self {
         write_threshold: 20,
         interval: Duration::from_millis(2000),
         wal_size_threshold: 512 * 1024,
      }
   }
}

/// Why a checkpoint was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointReason {
   WriteCount,
   Elapsed,
   WalSize,
   Commit,
   Close,
}

impl CheckpointPolicy {
   /// Returns the first threshold that is met, if any.
   pub fn evaluate(&self, writes: u64, elapsed: Duration, wal_bytes: u64) -> Option<CheckpointReason> {
      if writes >= self.write_threshold {
         Some(CheckpointReason::WriteCount)
      } else if elapsed >= self.interval {
         Some(CheckpointReason::Elapsed)
      } else if wal_bytes >= self.wal_size_threshold {
         Some(CheckpointReason::WalSize)
      } else {
         None
      }
   }

   /// Decides whether a checkpoint should run now.
   ///
   /// Never fires in network mode or while a transaction is open. A forced
   /// request (after commit, on close) bypasses the thresholds but not those
   /// two guards.
   pub fn should_checkpoint(
      &self,
      state: &ConnectionState,
      wal_bytes: u64,
      forced: Option<CheckpointReason>,
   ) -> Option<CheckpointReason> {
      if state.mode().is_network() || state.in_transaction() {
         return None;
      }
      if forced.is_some() {
         return forced;
      }
      self.evaluate(
         state.writes_since_checkpoint(),
         state.elapsed_since_checkpoint(),
         wal_bytes,
      )
   }
}

/// Path of the WAL file that sits next to `db_path`.
pub fn wal_path(db_path: &Path) -> PathBuf {
   sidecar_path(db_path, "-wal")
}

/// Path of the shared-memory index that sits next to `db_path`.
pub fn shm_path(db_path: &Path) -> PathBuf {
   sidecar_path(db_path, "-shm")
}

fn sidecar_path(db_path: &Path, suffix: &str) -> PathBuf {
   let mut os = db_path.as_os_str().to_owned();
   os.push(suffix);
   PathBuf::from(os)
}

/// Current size of the WAL file, 0 when it does not exist.
pub async fn wal_size(db_path: &Path) -> u64 {
   match tokio::fs::metadata(wal_path(db_path)).await {
      Ok(meta) => meta.len(),
      Err(_) => 0,
   }
}

/// Outcome reported by `PRAGMA wal_checkpoint`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointOutcome {
   /// True if the checkpoint could not complete because of readers/writers
   pub busy: bool,
   /// Frames in the WAL before the checkpoint (-1 when not in WAL mode)
   pub log_frames: i64,
   /// Frames copied back into the database (-1 when not in WAL mode)
   pub checkpointed_frames: i64,
}

/// Runs a truncating checkpoint on `conn` and records it in `state`.
pub async fn run_checkpoint(
   conn: &mut SqliteConnection,
   state: &ConnectionState,
   reason: CheckpointReason,
) -> Result<CheckpointOutcome> {
   let row = sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
      .fetch_one(&mut *conn)
      .await?;

   let outcome = CheckpointOutcome {
      busy: row.try_get::<i64, _>(0).unwrap_or(0) != 0,
      log_frames: row.try_get::<i64, _>(1).unwrap_or(-1),
      checkpointed_frames: row.try_get::<i64, _>(2).unwrap_or(-1),
   };

   state.checkpoint_completed();

   if outcome.busy {
      debug!(?reason, ?outcome, "Checkpoint could not complete, WAL still in use");
   } else {
      trace!(?reason, ?outcome, "Checkpoint completed");
   }

   Ok(outcome)
}

//! Mutable connection state shared by the writer, the transaction executor
//! and the maintenance worker

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::DeploymentMode;

/// Counters and flags tracked for one database.
///
/// Owned by [`SqliteDatabase`](crate::SqliteDatabase); components receive it
/// by reference instead of reaching for globals.
#[derive(Debug)]
pub struct ConnectionState {
   mode: DeploymentMode,
   busy_timeout: Duration,
   writes_since_checkpoint: AtomicU64,
   last_checkpoint: Mutex<Instant>,
   transaction_depth: AtomicUsize,
   checkpoints: AtomicU64,
   idle_maintenance_runs: AtomicU64,
   profile_drift: Mutex<Vec<String>>,
}

/// Point-in-time copy of [`ConnectionState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStats {
   pub mode: DeploymentMode,
   pub busy_timeout: Duration,
   pub writes_since_checkpoint: u64,
   pub transaction_depth: usize,
   pub checkpoints: u64,
   pub idle_maintenance_runs: u64,
   /// Pragmas that could not be applied and were left at SQLite defaults
   pub profile_drift: Vec<String>,
}

impl ConnectionState {
   pub fn new(mode: DeploymentMode, busy_timeout: Duration) -> Self {
      Self {
         mode,
         busy_timeout,
         writes_since_checkpoint: AtomicU64::new(0),
         last_checkpoint: Mutex::new(Instant::now()),
         transaction_depth: AtomicUsize::new(0),
         checkpoints: AtomicU64::new(0),
         idle_maintenance_runs: AtomicU64::new(0),
         profile_drift: Mutex::new(Vec::new()),
      }
   }

   pub fn mode(&self) -> DeploymentMode {
      self.mode
   }

   /// Counts a committed or auto-committed write. Returns the new count.
   pub fn record_write(&self) -> u64 {
      self.writes_since_checkpoint.fetch_add(1, Ordering::AcqRel) + 1
   }

   pub fn writes_since_checkpoint(&self) -> u64 {
      self.writes_since_checkpoint.load(Ordering::Acquire)
   }

   pub fn elapsed_since_checkpoint(&self) -> Duration {
      self.last_checkpoint.lock().elapsed()
   }

   /// Resets the write counter and checkpoint clock after a checkpoint fired.
   pub fn checkpoint_completed(&self) {
      self.writes_since_checkpoint.store(0, Ordering::Release);
      *self.last_checkpoint.lock() = Instant::now();
      self.checkpoints.fetch_add(1, Ordering::AcqRel);
   }

   pub fn enter_transaction(&self) -> usize {
      self.transaction_depth.fetch_add(1, Ordering::AcqRel) + 1
   }

   pub fn exit_transaction(&self) -> usize {
      // Saturate rather than wrap if a drop path races an explicit exit
      let previous = self
         .transaction_depth
         .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| {
            Some(d.saturating_sub(1))
         })
         .unwrap_or(0);
      previous.saturating_sub(1)
   }

   pub fn transaction_depth(&self) -> usize {
      self.transaction_depth.load(Ordering::Acquire)
   }

   pub fn in_transaction(&self) -> bool {
      self.transaction_depth() > 0
   }

   pub fn idle_maintenance_completed(&self) {
      self.idle_maintenance_runs.fetch_add(1, Ordering::AcqRel);
   }

   pub fn record_drift(&self, pragmas: impl IntoIterator<Item = String>) {
      let mut drift = self.profile_drift.lock();
      for pragma in pragmas {
         if !drift.contains(&pragma) {
            drift.push(pragma);
         }
      }
   }

   pub fn has_drift(&self) -> bool {
      !self.profile_drift.lock().is_empty()
   }

   pub fn stats(&self) -> ConnectionStats {
      ConnectionStats {
         mode: self.mode,
         busy_timeout: self.busy_timeout,
         writes_since_checkpoint: self.writes_since_checkpoint(),
         transaction_depth: self.transaction_depth(),
         checkpoints: self.checkpoints.load(Ordering::Acquire),
         idle_maintenance_runs: self.idle_maintenance_runs.load(Ordering::Acquire),
         profile_drift: self.profile_drift.lock().clone(),
      }
   }
}

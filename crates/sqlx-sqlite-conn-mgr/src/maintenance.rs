//! Background maintenance worker
//!
//! The write path only sends a [`MaintenanceSignal`]; checkpoints and idle
//! maintenance run on this task so their I/O never adds to a caller's write
//! latency. Failures are logged and dropped.

use std::sync::Weak;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::checkpoint::{CheckpointReason, run_checkpoint, wal_size};
use crate::database::SqliteDatabase;

/// Requests handled by the maintenance worker.
#[derive(Debug)]
pub enum MaintenanceSignal {
   /// A data or schema write finished outside a transaction
   Write,
   /// A transaction committed
   Commit,
   /// The admission queue has been idle for the configured delay
   Idle,
   /// Reply once every earlier signal has been handled
   Flush(oneshot::Sender<()>),
   /// Stop the worker
   Shutdown,
}

pub(crate) type MaintenanceSender = mpsc::UnboundedSender<MaintenanceSignal>;

/// Spawns the worker. It holds only a weak reference so dropping the last
/// `Arc<SqliteDatabase>` also ends the task.
pub(crate) fn spawn_worker(
   db: Weak<SqliteDatabase>,
   mut rx: mpsc::UnboundedReceiver<MaintenanceSignal>,
) {
   tokio::spawn(async move {
      while let Some(signal) = rx.recv().await {
         let Some(db) = db.upgrade() else {
            break;
         };

         match signal {
            MaintenanceSignal::Write => evaluate_checkpoint(&db, None).await,
            MaintenanceSignal::Commit => {
               evaluate_checkpoint(&db, Some(CheckpointReason::Commit)).await
            }
            MaintenanceSignal::Idle => run_idle_maintenance(&db).await,
            MaintenanceSignal::Flush(reply) => {
               let _ = reply.send(());
            }
            MaintenanceSignal::Shutdown => {
               trace!("Maintenance worker shutting down");
               break;
            }
         }
      }
   });
}

async fn evaluate_checkpoint(db: &SqliteDatabase, forced: Option<CheckpointReason>) {
   let state = db.state();
   let policy = db.config().checkpoint;

   let wal_bytes = wal_size(db.path()).await;
   let Some(reason) = policy.should_checkpoint(state, wal_bytes, forced) else {
      return;
   };

   let mut writer = match db.acquire_writer().await {
      Ok(writer) => writer,
      Err(e) => {
         warn!(error = %e, "Could not acquire writer for checkpoint");
         return;
      }
   };

   // A transaction may have opened while we waited for the writer
   if state.in_transaction() {
      trace!("Transaction opened while waiting; skipping checkpoint");
      return;
   }

   match run_checkpoint(&mut writer, state, reason).await {
      Ok(outcome) => debug!(?reason, busy = outcome.busy, "Scheduled checkpoint fired"),
      Err(e) => warn!(?reason, error = %e, "Scheduled checkpoint failed"),
   }
}

async fn run_idle_maintenance(db: &SqliteDatabase) {
   if db.is_closed() || db.queue().active() > 0 {
      return;
   }

   let mut writer = match db.acquire_writer().await {
      Ok(writer) => writer,
      Err(e) => {
         warn!(error = %e, "Could not acquire writer for idle maintenance");
         return;
      }
   };

   match sqlx::query("PRAGMA optimize").execute(&mut *writer).await {
      Ok(_) => {
         db.state().idle_maintenance_completed();
         debug!(path = %db.path().display(), "Idle maintenance completed");
      }
      Err(e) => warn!(error = %e, "Idle maintenance failed"),
   }
}

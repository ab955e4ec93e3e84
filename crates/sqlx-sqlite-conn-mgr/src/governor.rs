//! Admission queue for logical operations
//!
//! SQLite serializes physical writes on its own, but a multi-statement
//! operation (a snapshot sync, a backup) still has to be ordered against
//! other such operations, especially on network storage. The queue admits
//! up to `limit` operations and lines the rest up in FIFO order.
//!
//! The queue is advisory: statements issued directly on the writer do not
//! pass through it.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tracing::trace;

use crate::maintenance::{MaintenanceSender, MaintenanceSignal};
use crate::{Error, Result};

/// FIFO admission queue with idle-maintenance scheduling.
#[derive(Debug)]
pub struct OperationQueue {
   permits: Semaphore,
   active: Arc<AtomicUsize>,
   idle_task: Mutex<Option<AbortHandle>>,
   idle_delay: Option<Duration>,
   maintenance: MaintenanceSender,
}

impl OperationQueue {
   /// `idle_delay` of `None` disables idle maintenance.
   pub(crate) fn new(
      limit: usize,
      idle_delay: Option<Duration>,
      maintenance: MaintenanceSender,
   ) -> Self {
      Self {
         // tokio's semaphore is fair, so waiters are admitted in arrival order
         permits: Semaphore::new(limit.max(1)),
         active: Arc::new(AtomicUsize::new(0)),
         idle_task: Mutex::new(None),
         idle_delay,
         maintenance,
      }
   }

   /// Number of operations currently admitted.
   pub fn active(&self) -> usize {
      self.active.load(Ordering::Acquire)
   }

   /// Runs `op` once a slot is free and returns its output.
   ///
   /// Fails only if the queue was closed because the database closed.
   pub async fn run<F>(&self, op: F) -> Result<F::Output>
   where
      F: Future,
   {
      let _permit = self
         .permits
         .acquire()
         .await
         .map_err(|_| Error::DatabaseClosed)?;

      self.cancel_idle_task();
      let _slot = ActiveSlot::enter(self);

      Ok(op.await)
   }

   /// Stops admitting operations. Waiters receive [`Error::DatabaseClosed`].
   pub(crate) fn close(&self) {
      self.permits.close();
      self.cancel_idle_task();
   }

   fn cancel_idle_task(&self) {
      if let Some(handle) = self.idle_task.lock().take() {
         handle.abort();
         trace!("Cancelled pending idle maintenance");
      }
   }

   fn schedule_idle_task(&self) {
      let Some(delay) = self.idle_delay else {
         return;
      };
      if self.permits.is_closed() {
         return;
      }

      let maintenance = self.maintenance.clone();
      let active = Arc::clone(&self.active);
      let task = tokio::spawn(async move {
         tokio::time::sleep(delay).await;
         if active.load(Ordering::Acquire) == 0 {
            let _ = maintenance.send(MaintenanceSignal::Idle);
         }
      });

      if let Some(previous) = self.idle_task.lock().replace(task.abort_handle()) {
         previous.abort();
      }
   }
}

/// Tracks one admitted operation; leaving schedules idle maintenance when
/// the queue drains, even if the operation panicked or was cancelled.
struct ActiveSlot<'a> {
   queue: &'a OperationQueue,
}

impl<'a> ActiveSlot<'a> {
   fn enter(queue: &'a OperationQueue) -> Self {
      queue.active.fetch_add(1, Ordering::AcqRel);
      Self { queue }
   }
}

impl Drop for ActiveSlot<'_> {
   fn drop(&mut self) {
      if self.queue.active.fetch_sub(1, Ordering::AcqRel) == 1 {
         self.queue.schedule_idle_task();
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use tokio::sync::mpsc;

   #[tokio::test]
   async fn test_admits_in_fifo_order_with_single_slot() {
      let (tx, _rx) = mpsc::unbounded_channel();
      let queue = Arc::new(OperationQueue::new(1, None, tx));
      let order = Arc::new(Mutex::new(Vec::new()));

      let mut handles = Vec::new();
      for i in 0..5 {
         let queue = Arc::clone(&queue);
         let order = Arc::clone(&order);
         handles.push(tokio::spawn(async move {
            queue
               .run(async {
                  order.lock().push(i);
                  tokio::time::sleep(Duration::from_millis(5)).await;
               })
               .await
               .unwrap();
         }));
         // Let each task reach the semaphore before spawning the next
         tokio::time::sleep(Duration::from_millis(1)).await;
      }

      for handle in handles {
         handle.await.unwrap();
      }

      assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
      assert_eq!(queue.active(), 0);
   }

   #[tokio::test]
   async fn test_limit_bounds_concurrency() {
      let (tx, _rx) = mpsc::unbounded_channel();
      let queue = Arc::new(OperationQueue::new(2, None, tx));
      let peak = Arc::new(AtomicUsize::new(0));

      let mut handles = Vec::new();
      for _ in 0..6 {
         let queue = Arc::clone(&queue);
         let peak = Arc::clone(&peak);
         handles.push(tokio::spawn(async move {
            let q = Arc::clone(&queue);
            queue
               .run(async move {
                  peak.fetch_max(q.active(), Ordering::AcqRel);
                  tokio::time::sleep(Duration::from_millis(10)).await;
               })
               .await
               .unwrap();
         }));
      }

      for handle in handles {
         handle.await.unwrap();
      }

      assert!(peak.load(Ordering::Acquire) <= 2);
   }

   #[tokio::test]
   async fn test_idle_signal_after_drain() {
      let (tx, mut rx) = mpsc::unbounded_channel();
      let queue = OperationQueue::new(1, Some(Duration::from_millis(10)), tx);

      queue.run(async {}).await.unwrap();

      let signal = tokio::time::timeout(Duration::from_millis(500), rx.recv())
         .await
         .expect("idle signal should arrive")
         .unwrap();
      assert!(matches!(signal, MaintenanceSignal::Idle));
   }

   #[tokio::test]
   async fn test_new_admission_cancels_idle_task() {
      let (tx, mut rx) = mpsc::unbounded_channel();
      let queue = OperationQueue::new(1, Some(Duration::from_millis(50)), tx);

      queue.run(async {}).await.unwrap();
      queue
         .run(async {
            // Outlive the first idle timer while admitted
            tokio::time::sleep(Duration::from_millis(80)).await;
         })
         .await
         .unwrap();

      // Only the idle timer scheduled by the second drain may fire
      let first = tokio::time::timeout(Duration::from_millis(20), rx.recv()).await;
      assert!(first.is_err(), "cancelled idle task must not signal");
   }

   #[tokio::test]
   async fn test_closed_queue_rejects() {
      let (tx, _rx) = mpsc::unbounded_channel();
      let queue = OperationQueue::new(1, None, tx);
      queue.close();

      let err = queue.run(async {}).await.unwrap_err();
      assert!(matches!(err, Error::DatabaseClosed));
   }
}

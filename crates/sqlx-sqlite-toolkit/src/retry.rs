//! Bounded retry for lock contention

use std::future::Future;
use std::time::Duration;

use tracing::{debug, trace};

use crate::{Error, Result};

/// Errors that can report SQLite's busy/locked condition.
pub trait LockContention {
   fn is_lock_contention(&self) -> bool;
}

impl LockContention for sqlx::Error {
   fn is_lock_contention(&self) -> bool {
      sqlx_sqlite_conn_mgr::is_lock_contention(self)
   }
}

/// How often, and how patiently, lock contention is retried.
///
/// Retry `n` (1-based) waits `base_delay * n`. Any other error is returned
/// immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
   /// Retries after the first attempt
   ///
   /// Default: 3
   pub max_retries: u32,

   /// Default: 100ms
   pub base_delay: Duration,
}

impl Default for RetryPolicy {
   fn default() -> Self {
      Self {
         max_retries: 3,
         base_delay: Duration::from_millis(100),
      }
   }
}

impl RetryPolicy {
   /// No retries at all.
   pub fn none() -> Self {
      Self {
         max_retries: 0,
         base_delay: Duration::ZERO,
      }
   }

   pub fn delay_for(&self, retry: u32) -> Duration {
      self.base_delay.saturating_mul(retry)
   }

   /// Decides what happens after failed attempt number `attempt` (1-based).
   ///
   /// Sleeps and returns `Ok(())` when another attempt should be made.
   /// Otherwise returns the error to surface: the original error, or
   /// [`Error::TransientLock`] once contention outlasts the budget.
   pub async fn backoff<E>(&self, attempt: u32, err: E) -> Result<()>
   where
      E: LockContention + Into<Error>,
   {
      if !err.is_lock_contention() {
         return Err(err.into().classify());
      }
      if attempt > self.max_retries {
         debug!(attempts = attempt, "Lock contention outlasted retry budget");
         return Err(Error::TransientLock {
            attempts: attempt,
            source: Box::new(err.into()),
         });
      }

      let delay = self.delay_for(attempt);
      trace!(attempt, ?delay, "Database locked, retrying");
      tokio::time::sleep(delay).await;
      Ok(())
   }

   /// Runs `op` until it succeeds, fails with a non-contention error, or
   /// contention exceeds `max_retries`.
   pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T>
   where
      F: FnMut() -> Fut,
      Fut: Future<Output = std::result::Result<T, E>>,
      E: LockContention + Into<Error>,
   {
      let mut attempt = 0;
      loop {
         attempt += 1;
         match op().await {
            Ok(value) => return Ok(value),
            Err(e) => self.backoff(attempt, e).await?,
         }
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use std::sync::atomic::{AtomicU32, Ordering};

   #[derive(Debug)]
   enum FakeError {
      Locked,
      Broken,
   }

   impl LockContention for FakeError {
      fn is_lock_contention(&self) -> bool {
         matches!(self, FakeError::Locked)
      }
   }

   impl From<FakeError> for Error {
      fn from(e: FakeError) -> Self {
         Error::Other(format!("{e:?}"))
      }
   }

   fn fast() -> RetryPolicy {
      RetryPolicy {
         max_retries: 3,
         base_delay: Duration::from_millis(1),
      }
   }

   /// Fails with `Locked` the first `failures` times.
   async fn flaky(calls: &AtomicU32, failures: u32) -> std::result::Result<u32, FakeError> {
      let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
      if n <= failures {
         Err(FakeError::Locked)
      } else {
         Ok(n)
      }
   }

   #[test]
   fn test_linear_delay() {
      let policy = RetryPolicy::default();
      assert_eq!(policy.delay_for(1), Duration::from_millis(100));
      assert_eq!(policy.delay_for(3), Duration::from_millis(300));
   }

   #[tokio::test]
   async fn test_succeeds_within_budget() {
      let calls = AtomicU32::new(0);
      let result = fast().run(|| flaky(&calls, 3)).await.unwrap();
      assert_eq!(result, 4);
      assert_eq!(calls.load(Ordering::SeqCst), 4);
   }

   #[tokio::test]
   async fn test_contention_beyond_budget_is_fatal() {
      let calls = AtomicU32::new(0);
      let err = fast().run(|| flaky(&calls, 4)).await.unwrap_err();

      assert!(matches!(err, Error::TransientLock { attempts: 4, .. }));
      assert_eq!(calls.load(Ordering::SeqCst), 4);
   }

   #[tokio::test]
   async fn test_other_errors_are_not_retried() {
      let calls = AtomicU32::new(0);
      let err = fast()
         .run(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(FakeError::Broken)
         })
         .await
         .unwrap_err();

      assert!(matches!(err, Error::Other(_)));
      assert_eq!(calls.load(Ordering::SeqCst), 1);
   }

   #[tokio::test]
   async fn test_no_retry_policy() {
      let calls = AtomicU32::new(0);
      let err = RetryPolicy::none()
         .run(|| flaky(&calls, 1))
         .await
         .unwrap_err();
      assert!(matches!(err, Error::TransientLock { attempts: 1, .. }));
   }
}

//! Transactions on the single writer connection

use std::sync::Arc;

use serde_json::Value as JsonValue;
use sqlx_sqlite_conn_mgr::{SqliteDatabase, WriteGuard};
use tracing::{debug, trace, warn};

use crate::decode::{JsonRow, decode_rows};
use crate::retry::RetryPolicy;
use crate::statement::{Statement, WriteQueryResult, bind_values, is_write};
use crate::{Error, Result};

/// An open `BEGIN IMMEDIATE` transaction holding the writer.
///
/// Statements run on the same connection in the order they are submitted.
/// Finish with [`commit`](Self::commit) or [`rollback`](Self::rollback);
/// dropping an unfinished transaction rolls it back on a background task.
#[must_use = "if unused, the transaction is immediately rolled back"]
pub struct Transaction {
   id: String,
   db: Arc<SqliteDatabase>,
   writer: Option<WriteGuard>,
   retry: RetryPolicy,
}

impl Transaction {
   /// Acquires the writer and issues `BEGIN IMMEDIATE`, retrying on lock
   /// contention from other processes.
   pub(crate) async fn begin(db: Arc<SqliteDatabase>, retry: RetryPolicy) -> Result<Self> {
      let mut writer = db.acquire_writer().await?;

      let mut attempt = 0;
      loop {
         attempt += 1;
         match sqlx::query("BEGIN IMMEDIATE").execute(&mut *writer).await {
            Ok(_) => break,
            Err(e) => retry.backoff(attempt, e).await?,
         }
      }

      let depth = db.state().enter_transaction();
      let id = uuid::Uuid::new_v4().to_string();
      debug!(tx_id = %id, depth, path = %db.path().display(), "Transaction started");

      Ok(Self {
         id,
         db,
         writer: Some(writer),
         retry,
      })
   }

   pub fn id(&self) -> &str {
      &self.id
   }

   fn writer(&mut self) -> Result<&mut WriteGuard> {
      self.writer.as_mut().ok_or(Error::TransactionAlreadyFinalized)
   }

   /// Executes one statement inside the transaction.
   pub async fn execute(&mut self, query: &str, values: Vec<JsonValue>) -> Result<WriteQueryResult> {
      let retry = self.retry;
      let writer = self.writer()?;

      let mut attempt = 0;
      let result = loop {
         attempt += 1;
         match bind_values(sqlx::query(query), values.iter().cloned())
            .execute(&mut **writer)
            .await
         {
            Ok(result) => break WriteQueryResult::from(result),
            Err(e) => retry.backoff(attempt, e).await?,
         }
      };

      if is_write(query) {
         // Counted for the scheduler; it never checkpoints mid-transaction
         self.db.state().record_write();
      }
      trace!(tx_id = %self.id, rows_affected = result.rows_affected, "Statement executed");
      Ok(result)
   }

   /// Executes statements in order, stopping at the first failure.
   pub async fn execute_statements(
      &mut self,
      statements: &[Statement],
   ) -> Result<Vec<WriteQueryResult>> {
      let mut results = Vec::with_capacity(statements.len());
      for statement in statements {
         results.push(self.execute(&statement.query, statement.values.clone()).await?);
      }
      Ok(results)
   }

   /// Runs a query inside the transaction and decodes every row.
   pub async fn select(&mut self, query: &str, values: Vec<JsonValue>) -> Result<Vec<JsonRow>> {
      let retry = self.retry;
      let writer = self.writer()?;

      let mut attempt = 0;
      let rows = loop {
         attempt += 1;
         match bind_values(sqlx::query(query), values.iter().cloned())
            .fetch_all(&mut **writer)
            .await
         {
            Ok(rows) => break rows,
            Err(e) => retry.backoff(attempt, e).await?,
         }
      };

      decode_rows(rows)
   }

   /// Commits, releases the writer and, in local mode, has the maintenance
   /// worker truncate the WAL.
   ///
   /// If `COMMIT` fails the transaction stays open and is rolled back when
   /// dropped.
   pub async fn commit(mut self) -> Result<()> {
      let writer = self.writer()?;
      sqlx::query("COMMIT")
         .execute(&mut **writer)
         .await
         .map_err(|e| Error::from(e).classify())?;

      self.finish();
      self.db.notify_commit();
      debug!(tx_id = %self.id, "Transaction committed");
      Ok(())
   }

   /// Rolls back and releases the writer.
   pub async fn rollback(mut self) -> Result<()> {
      let writer = self.writer()?;
      sqlx::query("ROLLBACK").execute(&mut **writer).await?;

      self.finish();
      debug!(tx_id = %self.id, "Transaction rolled back");
      Ok(())
   }

   fn finish(&mut self) {
      // Depth drops before the writer is free for the next transaction
      if let Some(writer) = self.writer.take() {
         self.db.state().exit_transaction();
         drop(writer);
      }
   }
}

impl Drop for Transaction {
   fn drop(&mut self) {
      let Some(mut writer) = self.writer.take() else {
         return;
      };
      let db = Arc::clone(&self.db);
      let id = std::mem::take(&mut self.id);

      match tokio::runtime::Handle::try_current() {
         Ok(handle) => {
            debug!(tx_id = %id, "Transaction dropped unfinished, rolling back");
            handle.spawn(async move {
               if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *writer).await {
                  warn!(tx_id = %id, error = %e, "Background rollback failed");
               }
               db.state().exit_transaction();
               drop(writer);
            });
         }
         Err(_) => {
            warn!(tx_id = %id, "Transaction dropped outside a runtime; connection released without rollback");
            db.state().exit_transaction();
            drop(writer);
         }
      }
   }
}

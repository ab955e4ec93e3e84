use std::path::Path;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use sqlx::Executor;
use sqlx_sqlite_conn_mgr::{SqliteDatabase, SqliteDatabaseConfig};
use tracing::{debug, trace, warn};

use crate::decode::{JsonRow, decode_rows};
use crate::retry::RetryPolicy;
use crate::statement::{Statement, WriteQueryResult, bind_values, is_write};
use crate::transactions::Transaction;
use crate::{Error, Result};

/// Statement execution on top of [`SqliteDatabase`].
///
/// Writes go to the single writer connection and are retried on lock
/// contention. Reads prefer the read-only pool and fall back to the writer.
#[derive(Clone)]
pub struct DatabaseWrapper {
   inner: Arc<SqliteDatabase>,
   retry: RetryPolicy,
}

impl DatabaseWrapper {
   /// Connect to a SQLite database via the connection manager
   pub async fn connect(
      path: impl AsRef<Path>,
      custom_config: Option<SqliteDatabaseConfig>,
   ) -> Result<Self> {
      let db = SqliteDatabase::connect(path, custom_config).await?;
      Ok(Self::from_database(db))
   }

   /// Wraps an already connected database.
   pub fn from_database(inner: Arc<SqliteDatabase>) -> Self {
      Self {
         inner,
         retry: RetryPolicy::default(),
      }
   }

   pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
      self.retry = retry;
      self
   }

   pub fn database(&self) -> &Arc<SqliteDatabase> {
      &self.inner
   }

   pub fn retry_policy(&self) -> RetryPolicy {
      self.retry
   }

   /// Execute a single statement on the writer.
   ///
   /// Writes bump the write counter and signal the checkpoint scheduler
   /// without waiting on it. Do not call while holding a [`Transaction`] on
   /// the same database; use [`Transaction::execute`] instead.
   pub async fn execute(&self, query: String, values: Vec<JsonValue>) -> Result<WriteQueryResult> {
      let result = self
         .retry
         .run(|| self.execute_once(&query, &values))
         .await?;

      if is_write(&query) {
         self.inner.record_write();
      }
      trace!(rows_affected = result.rows_affected, "Statement executed");
      Ok(result)
   }

   async fn execute_once(&self, query: &str, values: &[JsonValue]) -> Result<WriteQueryResult> {
      let mut writer = self.inner.acquire_writer().await?;
      let result = bind_values(sqlx::query(query), values.iter().cloned())
         .execute(&mut *writer)
         .await?;
      Ok(result.into())
   }

   /// Execute a SELECT query, possibly returning multiple rows.
   ///
   /// Uses the read pool when there is one; if that fails for any reason
   /// the query is retried on the writer.
   pub async fn select(&self, query: String, values: Vec<JsonValue>) -> Result<Vec<JsonRow>> {
      if let Some(pool) = self.inner.read_pool()? {
         let q = bind_values(sqlx::query(&query), values.iter().cloned());
         match pool.fetch_all(q).await {
            Ok(rows) => return decode_rows(rows),
            Err(e) => debug!(error = %e, "Read pool query failed, falling back to writer"),
         }
      }

      let rows = self
         .retry
         .run(|| self.fetch_on_writer(&query, &values))
         .await?;
      decode_rows(rows)
   }

   async fn fetch_on_writer(
      &self,
      query: &str,
      values: &[JsonValue],
   ) -> Result<Vec<sqlx::sqlite::SqliteRow>> {
      let mut writer = self.inner.acquire_writer().await?;
      let rows = bind_values(sqlx::query(query), values.iter().cloned())
         .fetch_all(&mut *writer)
         .await?;
      Ok(rows)
   }

   /// Alias of [`select`](Self::select).
   pub async fn fetch_all(&self, query: String, values: Vec<JsonValue>) -> Result<Vec<JsonRow>> {
      self.select(query, values).await
   }

   /// Execute a SELECT query expecting zero or one result
   pub async fn fetch_one(&self, query: String, values: Vec<JsonValue>) -> Result<Option<JsonRow>> {
      // Add LIMIT 2 to detect if query returns multiple rows
      // We only need to fetch up to 2 rows to know if there's more than 1
      let limited_query = format!("{} LIMIT 2", query.trim_end().trim_end_matches(';'));

      let mut rows = self.select(limited_query, values).await?;
      match rows.len() {
         0 => Ok(None),
         1 => Ok(rows.pop()),
         count => Err(Error::MultipleRowsReturned(count)),
      }
   }

   /// Starts a transaction. The writer stays reserved until it is committed,
   /// rolled back or dropped.
   pub async fn begin(&self) -> Result<Transaction> {
      Transaction::begin(Arc::clone(&self.inner), self.retry).await
   }

   /// Runs `f` inside a transaction.
   ///
   /// Commits when `f` returns `Ok`. On `Err` the transaction is rolled
   /// back, a rollback failure is logged, and the original error returned.
   pub async fn transaction<T, E, F>(&self, f: F) -> std::result::Result<T, E>
   where
      F: AsyncFnOnce(&mut Transaction) -> std::result::Result<T, E>,
      E: From<Error>,
   {
      let mut tx = self.begin().await?;
      let id = tx.id().to_string();

      match f(&mut tx).await {
         Ok(value) => {
            tx.commit().await?;
            Ok(value)
         }
         Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
               warn!(tx_id = %id, error = %rollback_err, "Rollback after failed transaction also failed");
            }
            Err(e)
         }
      }
   }

   /// Execute multiple statements atomically within a transaction.
   ///
   /// Returns the result of each statement execution.
   pub async fn execute_transaction(
      &self,
      statements: Vec<Statement>,
   ) -> Result<Vec<WriteQueryResult>> {
      self
         .transaction(async |tx: &mut Transaction| tx.execute_statements(&statements).await)
         .await
   }

   /// Close the database connection
   pub async fn close(self) -> Result<()> {
      self.inner.close().await?;
      Ok(())
   }

   /// Close the database connection and remove all database files
   pub async fn remove(self) -> Result<()> {
      self.inner.remove().await?;
      Ok(())
   }
}

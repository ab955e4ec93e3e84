//! # sqlx-sqlite-toolkit
//!
//! Statement execution, transactions and snapshot synchronization on top of
//! [`sqlx_sqlite_conn_mgr`].
//!
//! ## Core Types
//!
//! - **[`DatabaseWrapper`]**: Retrying `execute`/`select`, transactions
//! - **[`Transaction`]**: `BEGIN IMMEDIATE` guard on the writer
//! - **[`RetryPolicy`]**: Bounded linear backoff for lock contention
//! - **[`SchemaRegistry`]** / **[`TableSchema`]** / **[`FieldMap`]**: Tables,
//!   their write order and field-name mapping
//! - **[`Snapshot`]**: Rows per table, as handed over by the application
//! - **[`Validator`]**: Row checks run before any write
//! - **[`SyncStrategy`]**: Full rewrite or delta upsert/delete
//!
//! Rows are decoded to [`JsonRow`]s: integers and booleans as numbers, text
//! as strings, BLOBs as base64 strings.

mod decode;
mod error;
mod retry;
mod schema;
mod snapshot;
mod statement;
pub mod sync;
mod transactions;
mod validator;
mod wrapper;

pub use decode::{JsonRow, decode_row, decode_rows, to_json};
pub use error::{Error, Result};
pub use retry::{LockContention, RetryPolicy};
pub use schema::{DEFAULT_BATCH_SIZE, FieldMap, SchemaRegistry, TableSchema, quote_identifier};
pub use snapshot::{Snapshot, TableRecord};
pub use statement::{Statement, WriteQueryResult, bind_value, bind_values, is_write};
pub use sync::{SyncReport, SyncStrategy};
pub use transactions::Transaction;
pub use validator::{AcceptAll, ValidationOutcome, Validator, validate_snapshot};
pub use wrapper::DatabaseWrapper;

pub use sqlite_snapshot_backup::{ChangeOperation, ChangeRecord};
pub use sqlx_sqlite_conn_mgr::{DeploymentMode, SqliteDatabase, SqliteDatabaseConfig};

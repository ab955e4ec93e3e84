//! # sqlite-sync-engine
//!
//! Durable SQLite storage for application snapshots.
//!
//! [`SyncEngine`] ties the workspace crates together:
//!
//! - [`sqlx_sqlite_conn_mgr`]: single writer, read pool, journal profile per
//!   deployment mode, admission queue and checkpoint scheduling
//! - [`sqlx_sqlite_toolkit`]: retried statements, transactions, schemas and
//!   the Full/Delta sync strategies
//! - [`sqlite_snapshot_backup`]: hashed, compressed full backups and
//!   incremental backups of the change log
//!
//! A persisted snapshot is validated, reconciled inside one transaction,
//! and its row changes are appended to the backup change log after commit.
//!
//! ```no_run
//! use sqlite_sync_engine::{EngineConfig, SyncEngine};
//! use sqlx_sqlite_toolkit::{FieldMap, SchemaRegistry, Snapshot, SyncStrategy, TableSchema};
//!
//! # async fn run() -> sqlite_sync_engine::Result<()> {
//! let registry = SchemaRegistry::new().with_table(
//!    TableSchema::new("inventory", "id", FieldMap::identity(["id", "sku"]).field("qty", "quantity"))
//!       .with_ddl("CREATE TABLE IF NOT EXISTS inventory (id INTEGER PRIMARY KEY, sku TEXT, quantity INTEGER)"),
//! )?;
//!
//! let config = EngineConfig {
//!    backup_dir: Some("backups".into()),
//!    ..Default::default()
//! };
//! let engine = SyncEngine::initialize("store.db", config, registry).await?;
//!
//! let snapshot = Snapshot::from_json(serde_json::json!({
//!    "inventory": [{ "id": 1, "sku": "bolt", "qty": 5 }]
//! }))?;
//! engine.persist_snapshot(&snapshot, SyncStrategy::Delta).await?;
//! engine.create_full_backup().await?;
//!
//! engine.close().await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod engine;
mod error;
mod store_file;

pub use config::EngineConfig;
pub use engine::SyncEngine;
pub use error::{Error, Result};

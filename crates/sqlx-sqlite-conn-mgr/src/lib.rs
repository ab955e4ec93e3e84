//! # sqlx-sqlite-conn-mgr
//!
//! A minimal wrapper around SQLx that enforces pragmatic SQLite connection policies
//! for databases that may live on local disks or network shares.
//!
//! ## Core Types
//!
//! - **[`SqliteDatabase`]**: Single write connection plus optional read-only pool
//! - **[`SqliteDatabaseConfig`]**: Deployment mode, timeouts and queue settings
//! - **[`WriteGuard`]**: RAII guard ensuring exclusive write access
//! - **[`CheckpointPolicy`]**: Thresholds for forcing a truncating WAL checkpoint
//! - **[`OperationQueue`]**: Advisory FIFO admission queue for logical operations
//! - **[`Error`]**: Error type for database operations
//!
//! ## Architecture
//!
//! - **Journal profiles**: WAL with full sync locally; rollback journal, full
//!   sync and no memory mapping on network storage
//! - **Exclusive writes**: Single-connection write pool serializes writers
//! - **Concurrent reads**: Optional read-only pool
//! - **Background maintenance**: Checkpoints and idle `PRAGMA optimize` run on a
//!   worker task that the write path only signals

mod checkpoint;
mod config;
mod database;
mod error;
mod governor;
mod maintenance;
mod profile;
mod state;
mod write_guard;

// Re-export public types
pub use checkpoint::{CheckpointOutcome, CheckpointPolicy, CheckpointReason, shm_path, wal_path};
pub use config::{DeploymentMode, SqliteDatabaseConfig};
pub use database::SqliteDatabase;
pub use error::{Error, Result, is_lock_contention};
pub use governor::OperationQueue;
pub use maintenance::MaintenanceSignal;
pub use profile::{JournalProfile, Pragma};
pub use state::{ConnectionState, ConnectionStats};
pub use write_guard::WriteGuard;

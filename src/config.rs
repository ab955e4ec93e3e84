//! Engine configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlite_snapshot_backup::BackupConfig;
use sqlx_sqlite_conn_mgr::{CheckpointPolicy, DeploymentMode, SqliteDatabaseConfig};
use sqlx_sqlite_toolkit::RetryPolicy;

/// Configuration for [`SyncEngine`](crate::SyncEngine).
///
/// Deserializes from camelCase JSON with every field optional. Durations are
/// given in milliseconds.
///
/// ```
/// use sqlite_sync_engine::EngineConfig;
/// use sqlx_sqlite_conn_mgr::DeploymentMode;
///
/// let config: EngineConfig = serde_json::from_str(
///    r#"{ "mode": "network", "backupDir": "/var/backups/store", "backup": { "maxBackups": 7 } }"#,
/// )
/// .unwrap();
/// assert_eq!(config.mode, DeploymentMode::Network);
/// assert_eq!(config.backup.max_backups, 7);
/// assert_eq!(config.max_retries, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
   /// Local disk (WAL) or network share (rollback journal)
   ///
   /// Default: [`DeploymentMode::Local`]
   pub mode: DeploymentMode,

   /// Read-only connections; 0 routes reads through the writer
   ///
   /// Default: 4
   pub max_read_connections: u32,

   /// Default: 10000
   pub busy_timeout_ms: u64,

   /// Logical operations admitted at once
   ///
   /// Default: 1
   pub max_concurrent_operations: usize,

   /// Default: true
   pub auto_maintenance: bool,

   /// Default: 5000
   pub idle_maintenance_delay_ms: u64,

   /// Writes since the last checkpoint that force a new one
   ///
   /// Default: 20
   pub checkpoint_write_threshold: u64,

   /// Default: 2000
   pub checkpoint_interval_ms: u64,

   /// Default: 524288
   pub wal_size_threshold: u64,

   /// Retries after a lock-contention failure
   ///
   /// Default: 3
   pub max_retries: u32,

   /// Linear backoff step
   ///
   /// Default: 100
   pub retry_base_delay_ms: u64,

   /// Where backup artifacts go. `None` disables backups.
   pub backup_dir: Option<PathBuf>,

   pub backup: BackupConfig,
}

impl Default for EngineConfig {
   fn default() -> Self {
      let database = SqliteDatabaseConfig::default();
      let retry = RetryPolicy::default();
      Self {
         mode: database.mode,
         max_read_connections: database.max_read_connections,
         busy_timeout_ms: duration_ms(database.busy_timeout),
         max_concurrent_operations: database.max_concurrent_operations,
         auto_maintenance: database.auto_maintenance,
         idle_maintenance_delay_ms: duration_ms(database.idle_maintenance_delay),
         checkpoint_write_threshold: database.checkpoint.write_threshold,
         checkpoint_interval_ms: duration_ms(database.checkpoint.interval),
         wal_size_threshold: database.checkpoint.wal_size_threshold,
         max_retries: retry.max_retries,
         retry_base_delay_ms: duration_ms(retry.base_delay),
         backup_dir: None,
         backup: BackupConfig::default(),
      }
   }
}

impl EngineConfig {
   pub fn database_config(&self) -> SqliteDatabaseConfig {
      SqliteDatabaseConfig {
         mode: self.mode,
         max_read_connections: self.max_read_connections,
         busy_timeout: Duration::from_millis(self.busy_timeout_ms),
         max_concurrent_operations: self.max_concurrent_operations,
         auto_maintenance: self.auto_maintenance,
         idle_maintenance_delay: Duration::from_millis(self.idle_maintenance_delay_ms),
         checkpoint: CheckpointPolicy {
            write_threshold: self.checkpoint_write_threshold,
            interval: Duration::from_millis(self.checkpoint_interval_ms),
            wal_size_threshold: self.wal_size_threshold,
         },
         ..Default::default()
      }
   }

   pub fn retry_policy(&self) -> RetryPolicy {
      RetryPolicy {
         max_retries: self.max_retries,
         base_delay: Duration::from_millis(self.retry_base_delay_ms),
      }
   }
}

fn duration_ms(duration: Duration) -> u64 {
   u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

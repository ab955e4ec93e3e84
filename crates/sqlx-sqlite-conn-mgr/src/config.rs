//! Configuration for SQLite database connections

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::checkpoint::CheckpointPolicy;

/// Where the database file lives, which decides the journal profile.
///
/// WAL relies on shared memory that is not safe across network filesystems,
/// so network deployments fall back to a classic rollback journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeploymentMode {
   /// Database file on a local disk (WAL journal)
   #[default]
   Local,
   /// Database file on shared or network storage (rollback journal)
   Network,
}

impl DeploymentMode {
   pub fn is_network(self) -> bool {
      matches!(self, DeploymentMode::Network)
   }
}

/// Configuration for SqliteDatabase connections
///
/// # Examples
///
/// ```
/// use sqlx_sqlite_conn_mgr::{DeploymentMode, SqliteDatabaseConfig};
/// use std::time::Duration;
///
/// // Use defaults
/// let config = SqliteDatabaseConfig::default();
///
/// // Database on a network share, no separate read handle
/// let config = SqliteDatabaseConfig {
///     mode: DeploymentMode::Network,
///     max_read_connections: 0,
///     ..Default::default()
/// };
///
/// // Override just one field
/// let config = SqliteDatabaseConfig {
///     busy_timeout: Duration::from_secs(2),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct SqliteDatabaseConfig {
   /// Deployment profile applied to the write connection
   ///
   /// Default: [`DeploymentMode::Local`]
   pub mode: DeploymentMode,

   /// Maximum number of concurrent read-only connections
   ///
   /// Set to 0 to disable the read-only handle entirely; reads then go
   /// through the writer.
   ///
   /// Default: 4
   pub max_read_connections: u32,

   /// Idle timeout for read connections
   ///
   /// The write connection is never reaped, since the journal profile is
   /// applied to it once at connect time.
   ///
   /// Default: 30 seconds
   pub idle_timeout: Duration,

   /// How long SQLite waits on a lock before reporting SQLITE_BUSY
   ///
   /// Applied to every handle.
   ///
   /// Default: 10 seconds
   pub busy_timeout: Duration,

   /// Number of logical operations admitted concurrently by
   /// [`SqliteDatabase::queue_operation`](crate::SqliteDatabase::queue_operation)
   ///
   /// Default: 1
   pub max_concurrent_operations: usize,

   /// Run idle maintenance (`PRAGMA optimize`) once the admission queue drains
   ///
   /// Default: true
   pub auto_maintenance: bool,

   /// Delay between the queue draining and idle maintenance running
   ///
   /// Default: 5 seconds
   pub idle_maintenance_delay: Duration,

   /// Thresholds for forcing a WAL checkpoint
   pub checkpoint: CheckpointPolicy,
}

impl Default for SqliteDatabaseConfig {
   fn default() -> Self {
      Self {
         mode: DeploymentMode::Local,
         max_read_connections: 4,
         idle_timeout: Duration::from_secs(30),
         busy_timeout: Duration::from_secs(10),
         max_concurrent_operations: 1,
         auto_maintenance: true,
         idle_maintenance_delay: Duration::from_secs(5),
         checkpoint: CheckpointPolicy::default(),
      }
   }
}

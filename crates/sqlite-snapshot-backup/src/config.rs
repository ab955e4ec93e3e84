//! Backup engine configuration

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Configuration for [`BackupEngine`](crate::BackupEngine).
///
/// Deserializes from the camelCase shape hosts pass in, with every field
/// optional:
///
/// ```
/// use sqlite_snapshot_backup::BackupConfig;
///
/// let config: BackupConfig = serde_json::from_str(r#"{ "maxBackups": 10 }"#).unwrap();
/// assert_eq!(config.max_backups, 10);
/// assert_eq!(config.max_age_days, 30);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BackupConfig {
   /// Artifacts kept by the count filter. The newest is always kept.
   ///
   /// Default: 30
   pub max_backups: usize,

   /// Artifacts older than this are removed by the age filter.
   ///
   /// Default: 30
   pub max_age_days: u32,

   /// gzip level, 0 (store) to 9 (best)
   ///
   /// Default: 6
   pub compression_level: u32,

   /// Pending change records that trigger an automatic incremental backup
   ///
   /// Default: 100
   pub incremental_threshold: usize,
}

impl Default for BackupConfig {
   fn default() -> Self {
      Self {
         max_backups: 30,
         max_age_days: 30,
         compression_level: 6,
         incremental_threshold: 100,
      }
   }
}

impl BackupConfig {
   pub fn validate(&self) -> Result<()> {
      if self.compression_level > 9 {
         return Err(Error::InvalidCompressionLevel(self.compression_level));
      }
      Ok(())
   }
}

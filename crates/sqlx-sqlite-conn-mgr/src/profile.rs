//! Journal profiles applied to the write connection

use sqlx::{Row, SqliteConnection};
use tracing::{debug, warn};

use crate::config::DeploymentMode;
use crate::error::{Error, Result, is_lock_contention};

/// A single `PRAGMA name = value` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pragma {
   pub name: &'static str,
   pub value: &'static str,
}

impl Pragma {
   const fn new(name: &'static str, value: &'static str) -> Self {
      Self { name, value }
   }

   fn sql(&self) -> String {
      format!("PRAGMA {} = {}", self.name, self.value)
   }
}

/// PRAGMA set for a deployment mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalProfile {
   mode: DeploymentMode,
}

const LOCAL_PRAGMAS: &[Pragma] = &[
   Pragma::new("journal_mode", "WAL"),
   Pragma::new("synchronous", "FULL"),
   // Low auto-checkpoint threshold (pages) keeps the WAL small between
   // scheduled checkpoints
   Pragma::new("wal_autocheckpoint", "100"),
   Pragma::new("foreign_keys", "ON"),
];

const NETWORK_PRAGMAS: &[Pragma] = &[
   Pragma::new("journal_mode", "DELETE"),
   Pragma::new("synchronous", "FULL"),
   Pragma::new("mmap_size", "0"),
   Pragma::new("foreign_keys", "ON"),
];

impl JournalProfile {
   pub fn for_mode(mode: DeploymentMode) -> Self {
      Self { mode }
   }

   pub fn mode(&self) -> DeploymentMode {
      self.mode
   }

   /// The pragmas in the order they are applied.
   pub fn pragmas(&self) -> &'static [Pragma] {
      match self.mode {
         DeploymentMode::Local => LOCAL_PRAGMAS,
         DeploymentMode::Network => NETWORK_PRAGMAS,
      }
   }

   /// The journal mode SQLite should report after the profile is applied.
   pub fn expected_journal_mode(&self) -> &'static str {
      match self.mode {
         DeploymentMode::Local => "wal",
         DeploymentMode::Network => "delete",
      }
   }

   /// Applies every pragma to `conn`.
   ///
   /// Returns the names of pragmas that drifted: ones that failed with a
   /// busy/locked error, or a journal mode SQLite refused to switch to.
   /// Those are left at SQLite's defaults. Any other failure is returned
   /// as [`Error::Profile`].
   pub async fn apply(&self, conn: &mut SqliteConnection) -> Result<Vec<String>> {
      let mut drift = Vec::new();

      for pragma in self.pragmas() {
         match sqlx::query(&pragma.sql()).fetch_optional(&mut *conn).await {
            Ok(row) => {
               if pragma.name == "journal_mode" {
                  let reported = row
                     .and_then(|r| r.try_get::<String, _>(0).ok())
                     .unwrap_or_default()
                     .to_ascii_lowercase();
                  if reported != self.expected_journal_mode() {
                     warn!(
                        expected = self.expected_journal_mode(),
                        reported = %reported,
                        "SQLite refused journal mode; keeping current mode"
                     );
                     drift.push(pragma.name.to_string());
                     continue;
                  }
               }
               debug!(pragma = pragma.name, value = pragma.value, "Applied pragma");
            }
            Err(e) if is_lock_contention(&e) => {
               warn!(pragma = pragma.name, error = %e, "Pragma blocked by lock contention; keeping default");
               drift.push(pragma.name.to_string());
            }
            Err(e) => {
               return Err(Error::Profile {
                  pragma: pragma.name.to_string(),
                  source: e,
               });
            }
         }
      }

      Ok(drift)
   }
}

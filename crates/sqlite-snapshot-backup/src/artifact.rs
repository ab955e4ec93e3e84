use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::timestamp;
use crate::{Error, Result};

/// Name of the index file recording the last successful backup.
pub const INDEX_FILE: &str = "backup-index.json";

const PAYLOAD_SUFFIX: &str = ".json.gz";
const SIDECAR_SUFFIX: &str = ".meta";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
   Full,
   Incremental,
}

impl BackupKind {
   pub fn as_str(&self) -> &'static str {
      match self {
         BackupKind::Full => "full",
         BackupKind::Incremental => "incremental",
      }
   }
}

/// Metadata describing one backup, stored uncompressed in the `.meta` sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupArtifact {
   pub timestamp: String,
   #[serde(rename = "type")]
   pub kind: BackupKind,
   /// Bytes of the canonical JSON before compression.
   pub size: u64,
   pub compressed_size: u64,
   /// SHA-256 hex of the canonical JSON.
   pub checksum: String,
   /// Number of change records (incremental only).
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub changes: Option<usize>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub base_backup_hash: Option<String>,
}

impl BackupArtifact {
   /// `<kind>-backup-<timestamp>.json.gz`
   pub fn file_name(&self) -> String {
      format!(
         "{}-backup-{}{PAYLOAD_SUFFIX}",
         self.kind.as_str(),
         timestamp::file_stamp(&self.timestamp)
      )
   }
}

/// A backup found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
   pub artifact: BackupArtifact,
   /// Path of the compressed payload.
   pub path: PathBuf,
}

impl BackupEntry {
   pub fn sidecar_path(&self) -> PathBuf {
      sidecar_path(&self.path)
   }
}

pub(crate) fn sidecar_path(payload: &Path) -> PathBuf {
   let mut name = payload.as_os_str().to_os_string();
   name.push(SIDECAR_SUFFIX);
   PathBuf::from(name)
}

pub(crate) fn is_sidecar(path: &Path) -> bool {
   path
      .file_name()
      .and_then(|n| n.to_str())
      .is_some_and(|n| n.ends_with(SIDECAR_SUFFIX))
}

/// Payload path for a sidecar (`x.json.gz.meta` -> `x.json.gz`).
pub(crate) fn payload_path(sidecar: &Path) -> Option<PathBuf> {
   let name = sidecar.file_name()?.to_str()?;
   let payload = name.strip_suffix(SIDECAR_SUFFIX)?;
   Some(sidecar.with_file_name(payload))
}

/// Contents of `backup-index.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BackupIndex {
   pub last_backup_hash: Option<String>,
   /// Metadata of the last full backup.
   pub last_backup: Option<BackupArtifact>,
   /// When the index was last written.
   pub timestamp: Option<String>,
}

impl BackupIndex {
   pub(crate) async fn load(dir: &Path) -> Result<Self> {
      let path = dir.join(INDEX_FILE);
      match tokio::fs::read(&path).await {
         Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(index) => Ok(index),
            Err(e) => {
               tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable backup index");
               Ok(Self::default())
            }
         },
         Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
         Err(e) => Err(Error::Io(e)),
      }
   }

   pub(crate) async fn save(&self, dir: &Path) -> Result<()> {
      let bytes = serde_json::to_vec_pretty(self)?;
      tokio::fs::write(dir.join(INDEX_FILE), bytes).await?;
      Ok(())
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   fn artifact(kind: BackupKind) -> BackupArtifact {
      BackupArtifact {
         timestamp: "2024-03-01T12:30:45.123Z".into(),
         kind,
         size: 10,
         compressed_size: 8,
         checksum: "abc".into(),
         changes: None,
         base_backup_hash: None,
      }
   }

   #[test]
   fn test_file_name() {
      assert_eq!(
         artifact(BackupKind::Full).file_name(),
         "full-backup-2024-03-01T12-30-45-123Z.json.gz"
      );
      assert_eq!(
         artifact(BackupKind::Incremental).file_name(),
         "incremental-backup-2024-03-01T12-30-45-123Z.json.gz"
      );
   }

   #[test]
   fn test_sidecar_paths() {
      let payload = Path::new("/b/full-backup-x.json.gz");
      let sidecar = sidecar_path(payload);
      assert_eq!(sidecar, Path::new("/b/full-backup-x.json.gz.meta"));
      assert!(is_sidecar(&sidecar));
      assert!(!is_sidecar(payload));
      assert_eq!(payload_path(&sidecar).unwrap(), payload);
   }

   #[test]
   fn test_artifact_json_shape() {
      let mut a = artifact(BackupKind::Incremental);
      a.changes = Some(3);
      a.base_backup_hash = Some("def".into());
      let value = serde_json::to_value(&a).unwrap();
      assert_eq!(value["type"], "incremental");
      assert_eq!(value["compressedSize"], 8);
      assert_eq!(value["baseBackupHash"], "def");
      assert_eq!(value["changes"], 3);
   }

   #[tokio::test]
   async fn test_index_missing_or_corrupt_loads_default() {
      let dir = tempfile::TempDir::new().unwrap();
      assert_eq!(
         BackupIndex::load(dir.path()).await.unwrap(),
         BackupIndex::default()
      );

      std::fs::write(dir.path().join(INDEX_FILE), b"{not json").unwrap();
      assert_eq!(
         BackupIndex::load(dir.path()).await.unwrap(),
         BackupIndex::default()
      );

      let index = BackupIndex {
         last_backup_hash: Some("h".into()),
         last_backup: Some(artifact(BackupKind::Full)),
         timestamp: Some("t".into()),
      };
      index.save(dir.path()).await.unwrap();
      assert_eq!(BackupIndex::load(dir.path()).await.unwrap(), index);
   }
}

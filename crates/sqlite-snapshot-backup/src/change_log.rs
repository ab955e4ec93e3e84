use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::timestamp;

/// Kind of row mutation captured in a [`ChangeRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOperation {
   Insert,
   Update,
   Delete,
}

/// A single row mutation waiting to be packaged into an incremental backup.
///
/// Serializes in the camelCase shape stored inside incremental payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
   pub table: String,
   pub operation: ChangeOperation,
   /// Primary key of the affected row.
   pub record_id: JsonValue,
   /// Row contents before the change (UPDATE and DELETE).
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub old_data: Option<JsonValue>,
   /// Row contents after the change (INSERT and UPDATE).
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub new_data: Option<JsonValue>,
   /// RFC 3339 wall-clock time the change was logged.
   pub timestamp: String,
}

impl ChangeRecord {
   /// Builds a record stamped with the current time.
   pub fn new(
      table: impl Into<String>,
      operation: ChangeOperation,
      record_id: JsonValue,
      old_data: Option<JsonValue>,
      new_data: Option<JsonValue>,
   ) -> Self {
      Self {
         table: table.into(),
         operation,
         record_id,
         old_data,
         new_data,
         timestamp: timestamp::now(),
      }
   }
}

/// Append-only in-memory buffer of pending change records.
///
/// Records leave the log only through [`drain`](Self::drain); a failed backup
/// hands them back with [`restore`](Self::restore) so nothing is lost.
#[derive(Debug, Default)]
pub(crate) struct ChangeLog {
   records: Mutex<Vec<ChangeRecord>>,
}

impl ChangeLog {
   /// Appends a record and returns the new pending count.
   pub(crate) fn push(&self, record: ChangeRecord) -> usize {
      let mut records = self.records.lock();
      records.push(record);
      records.len()
   }

   pub(crate) fn len(&self) -> usize {
      self.records.lock().len()
   }

   pub(crate) fn drain(&self) -> Vec<ChangeRecord> {
      std::mem::take(&mut *self.records.lock())
   }

   /// Puts drained records back ahead of anything logged since.
   pub(crate) fn restore(&self, mut drained: Vec<ChangeRecord>) {
      if drained.is_empty() {
         return;
      }
      let mut records = self.records.lock();
      drained.append(&mut records);
      *records = drained;
   }

   pub(crate) fn clear(&self) {
      self.records.lock().clear();
   }

   pub(crate) fn snapshot(&self) -> Vec<ChangeRecord> {
      self.records.lock().clone()
   }
}

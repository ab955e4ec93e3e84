//! Whole-application snapshots keyed by table

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::decode::JsonRow;
use crate::{Error, Result};

/// A record type stored in one table.
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use sqlx_sqlite_toolkit::{Snapshot, TableRecord};
///
/// #[derive(Serialize, Deserialize)]
/// struct Task {
///    id: i64,
///    title: String,
/// }
///
/// impl TableRecord for Task {
///    const TABLE: &'static str = "tasks";
/// }
///
/// let mut snapshot = Snapshot::new();
/// snapshot.add(&[Task { id: 1, title: "write docs".into() }]).unwrap();
/// let tasks: Vec<Task> = snapshot.extract().unwrap();
/// assert_eq!(tasks[0].title, "write docs");
/// ```
pub trait TableRecord: Serialize + DeserializeOwned {
   const TABLE: &'static str;
}

/// Rows per table, in external field names.
///
/// Serializes as a plain JSON object of arrays, which is also the payload
/// of full backups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
   tables: IndexMap<String, Vec<JsonRow>>,
}

impl Snapshot {
   pub fn new() -> Self {
      Self::default()
   }

   /// Replaces the rows for `table`. An empty vector is kept: syncing it
   /// empties the table.
   pub fn set_rows(&mut self, table: impl Into<String>, rows: Vec<JsonRow>) {
      self.tables.insert(table.into(), rows);
   }

   pub fn with_rows(mut self, table: impl Into<String>, rows: Vec<JsonRow>) -> Self {
      self.set_rows(table, rows);
      self
   }

   pub fn rows(&self, table: &str) -> Option<&[JsonRow]> {
      self.tables.get(table).map(Vec::as_slice)
   }

   pub fn contains_table(&self, table: &str) -> bool {
      self.tables.contains_key(table)
   }

   pub fn tables(&self) -> impl Iterator<Item = (&str, &[JsonRow])> {
      self.tables.iter().map(|(t, rows)| (t.as_str(), rows.as_slice()))
   }

   pub fn table_names(&self) -> impl Iterator<Item = &str> {
      self.tables.keys().map(String::as_str)
   }

   pub fn is_empty(&self) -> bool {
      self.tables.is_empty()
   }

   /// Appends typed records to their table.
   pub fn add<R: TableRecord>(&mut self, records: &[R]) -> Result<()> {
      let rows = self.tables.entry(R::TABLE.to_string()).or_default();
      for record in records {
         rows.push(to_row(R::TABLE, serde_json::to_value(record)?)?);
      }
      Ok(())
   }

   /// Typed records of `R::TABLE`; empty when the table is absent.
   pub fn extract<R: TableRecord>(&self) -> Result<Vec<R>> {
      self
         .rows(R::TABLE)
         .unwrap_or_default()
         .iter()
         .map(|row| Ok(serde_json::from_value(JsonValue::Object(row.clone().into_iter().collect()))?))
         .collect()
   }

   /// Builds a snapshot from a JSON object of row arrays.
   pub fn from_json(value: JsonValue) -> Result<Self> {
      Ok(serde_json::from_value(value)?)
   }

   pub fn to_json(&self) -> Result<JsonValue> {
      Ok(serde_json::to_value(self)?)
   }
}

pub(crate) fn to_row(table: &str, value: JsonValue) -> Result<JsonRow> {
   match value {
      JsonValue::Object(map) => Ok(map.into_iter().collect()),
      other => Err(Error::InvalidRow {
         table: table.to_string(),
         reason: format!("expected an object, got {other}"),
      }),
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use serde_json::json;

   #[derive(Debug, PartialEq, Serialize, Deserialize)]
   #[serde(rename_all = "camelCase")]
   struct Item {
      id: i64,
      order_id: i64,
   }

   impl TableRecord for Item {
      const TABLE: &'static str = "items";
   }

   #[test]
   fn test_add_and_extract_records() {
      let mut snapshot = Snapshot::new();
      snapshot
         .add(&[Item { id: 1, order_id: 9 }, Item { id: 2, order_id: 9 }])
         .unwrap();

      assert_eq!(snapshot.rows("items").unwrap()[0].get("orderId"), Some(&json!(9)));
      let items: Vec<Item> = snapshot.extract().unwrap();
      assert_eq!(items.len(), 2);
      assert_eq!(items[1], Item { id: 2, order_id: 9 });
   }

   #[test]
   fn test_json_shape() {
      let value = json!({"orders": [{"id": 1}], "items": []});
      let snapshot = Snapshot::from_json(value.clone()).unwrap();

      assert!(snapshot.contains_table("orders"));
      assert_eq!(snapshot.rows("items"), Some(&[][..]));
      assert_eq!(snapshot.to_json().unwrap(), value);
   }

   #[test]
   fn test_non_object_rows_rejected() {
      assert!(Snapshot::from_json(json!({"orders": [1, 2]})).is_err());
      assert!(matches!(
         to_row("orders", json!("nope")),
         Err(Error::InvalidRow { .. })
      ));
   }
}

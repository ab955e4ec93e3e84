//! Table schemas and external-name to storage-column mapping

use indexmap::IndexMap;

use crate::decode::JsonRow;
use crate::{Error, Result};

/// Default number of rows written per statement by the sync strategies.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Bidirectional mapping between external field names and storage columns.
///
/// Fields without a mapping are dropped in both directions.
///
/// ```
/// use serde_json::json;
/// use sqlx_sqlite_toolkit::{FieldMap, JsonRow};
///
/// let map = FieldMap::new().field("dueDate", "due_date").field("id", "id");
/// let row = JsonRow::from_iter([
///    ("id".to_string(), json!(1)),
///    ("dueDate".to_string(), json!("2024-01-01")),
///    ("scratch".to_string(), json!(true)),
/// ]);
/// let stored = map.to_storage(&row);
///
/// assert_eq!(stored.get("due_date"), Some(&json!("2024-01-01")));
/// assert!(!stored.contains_key("scratch"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
   to_storage: IndexMap<String, String>,
   to_external: IndexMap<String, String>,
}

impl FieldMap {
   pub fn new() -> Self {
      Self::default()
   }

   /// Same name on both sides for every column.
   pub fn identity<I, S>(columns: I) -> Self
   where
      I: IntoIterator<Item = S>,
      S: Into<String>,
   {
      columns.into_iter().fold(Self::new(), |map, column| {
         let column = column.into();
         map.field(column.clone(), column)
      })
   }

   /// Adds a mapping. A later mapping for the same name replaces the earlier one.
   pub fn field(mut self, external: impl Into<String>, column: impl Into<String>) -> Self {
      let external = external.into();
      let column = column.into();
      if let Some(old_column) = self.to_storage.insert(external.clone(), column.clone()) {
         self.to_external.shift_remove(&old_column);
      }
      if let Some(old_external) = self.to_external.insert(column, external.clone())
         && old_external != external
      {
         self.to_storage.shift_remove(&old_external);
      }
      self
   }

   pub fn storage_column(&self, external: &str) -> Option<&str> {
      self.to_storage.get(external).map(String::as_str)
   }

   pub fn external_field(&self, column: &str) -> Option<&str> {
      self.to_external.get(column).map(String::as_str)
   }

   /// Storage columns in mapping order.
   pub fn columns(&self) -> impl Iterator<Item = &str> {
      self.to_external.keys().map(String::as_str)
   }

   pub fn is_empty(&self) -> bool {
      self.to_storage.is_empty()
   }

   /// Renames external fields to storage columns, in mapping order.
   pub fn to_storage(&self, entity: &JsonRow) -> JsonRow {
      self
         .to_storage
         .iter()
         .filter_map(|(external, column)| entity.get(external).map(|v| (column.clone(), v.clone())))
         .collect()
   }

   /// Renames storage columns back to external fields.
   pub fn to_external(&self, row: &JsonRow) -> JsonRow {
      row.iter()
         .filter_map(|(column, v)| {
            self
               .to_external
               .get(column)
               .map(|external| (external.clone(), v.clone()))
         })
         .collect()
   }
}

/// How one table is stored and where it sits in the write order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
   pub name: String,
   /// Storage column holding the primary key.
   pub primary_key: String,
   pub fields: FieldMap,
   /// Table whose rows must exist before this table's rows are written.
   pub parent: Option<String>,
   /// Rows per multi-row statement.
   ///
   /// Default: 100
   pub batch_size: usize,
   /// `CREATE TABLE IF NOT EXISTS ...` run at initialization.
   pub ddl: Option<String>,
}

impl TableSchema {
   pub fn new(name: impl Into<String>, primary_key: impl Into<String>, fields: FieldMap) -> Self {
      Self {
         name: name.into(),
         primary_key: primary_key.into(),
         fields,
         parent: None,
         batch_size: DEFAULT_BATCH_SIZE,
         ddl: None,
      }
   }

   pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
      self.parent = Some(parent.into());
      self
   }

   pub fn with_batch_size(mut self, batch_size: usize) -> Self {
      self.batch_size = batch_size;
      self
   }

   pub fn with_ddl(mut self, ddl: impl Into<String>) -> Self {
      self.ddl = Some(ddl.into());
      self
   }

   /// External name of the primary key field.
   pub fn primary_key_field(&self) -> Option<&str> {
      self.fields.external_field(&self.primary_key)
   }

   pub fn quoted_name(&self) -> String {
      quote_identifier(&self.name)
   }

   fn validate(&self) -> Result<()> {
      let invalid = |reason: &str| Error::InvalidSchema {
         table: self.name.clone(),
         reason: reason.to_string(),
      };
      if self.name.is_empty() {
         return Err(invalid("table name is empty"));
      }
      if self.batch_size == 0 {
         return Err(invalid("batch size must be greater than zero"));
      }
      if self.fields.external_field(&self.primary_key).is_none() {
         return Err(invalid(&format!(
            "primary key column '{}' has no field mapping",
            self.primary_key
         )));
      }
      Ok(())
   }
}

/// Registered tables in dependency order.
///
/// A table may only name a parent that is already registered, so
/// registration order is always a valid parents-first write order.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
   tables: IndexMap<String, TableSchema>,
}

impl SchemaRegistry {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn register(&mut self, schema: TableSchema) -> Result<()> {
      schema.validate()?;
      if let Some(parent) = &schema.parent
         && !self.tables.contains_key(parent)
      {
         return Err(Error::UnknownParentTable {
            table: schema.name.clone(),
            parent: parent.clone(),
         });
      }
      if self.tables.contains_key(&schema.name) {
         return Err(Error::InvalidSchema {
            table: schema.name.clone(),
            reason: "table is already registered".into(),
         });
      }
      self.tables.insert(schema.name.clone(), schema);
      Ok(())
   }

   /// Chaining form of [`register`](Self::register).
   pub fn with_table(mut self, schema: TableSchema) -> Result<Self> {
      self.register(schema)?;
      Ok(self)
   }

   pub fn get(&self, table: &str) -> Option<&TableSchema> {
      self.tables.get(table)
   }

   pub fn require(&self, table: &str) -> Result<&TableSchema> {
      self
         .get(table)
         .ok_or_else(|| Error::UnknownTable(table.to_string()))
   }

   /// Tables parents first.
   pub fn tables(&self) -> impl DoubleEndedIterator<Item = &TableSchema> {
      self.tables.values()
   }

   pub fn len(&self) -> usize {
      self.tables.len()
   }

   pub fn is_empty(&self) -> bool {
      self.tables.is_empty()
   }

   /// DDL of every table that has some, parents first.
   pub fn ddl_statements(&self) -> impl Iterator<Item = &str> {
      self.tables.values().filter_map(|t| t.ddl.as_deref())
   }
}

/// Wraps an identifier in double quotes, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
   format!("\"{}\"", name.replace('"', "\"\""))
}

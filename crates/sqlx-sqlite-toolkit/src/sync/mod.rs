//! Reconciling snapshots with stored tables
//!
//! Both strategies run inside a caller-owned [`Transaction`], touch only the
//! tables present in the snapshot, write parents before children and delete
//! children before parents. Applied to an empty store they produce the same
//! rows.

mod delta;
mod full;

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlite_snapshot_backup::{ChangeOperation, ChangeRecord};
use tracing::debug;

use crate::decode::JsonRow;
use crate::schema::{SchemaRegistry, TableSchema, quote_identifier};
use crate::snapshot::Snapshot;
use crate::transactions::Transaction;
use crate::{Error, Result};

/// How a snapshot is reconciled with the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStrategy {
   /// Clear each table and insert every row again.
   Full,
   /// Upsert incoming rows and delete stored rows missing from the snapshot,
   /// recording a change for each.
   Delta,
}

/// What a sync did.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
   pub strategy: SyncStrategy,
   /// Tables touched, parents first.
   pub tables: Vec<String>,
   pub rows_written: u64,
   pub rows_deleted: u64,
   /// Row-level changes in external field names: inserts and updates
   /// parents first, then deletes children first.
   pub changes: Vec<ChangeRecord>,
}

impl SyncReport {
   fn new(strategy: SyncStrategy) -> Self {
      Self {
         strategy,
         tables: Vec::new(),
         rows_written: 0,
         rows_deleted: 0,
         changes: Vec::new(),
      }
   }
}

/// Applies `snapshot` with `strategy` on an open transaction.
///
/// Rows must already be validated. On error the caller rolls back.
pub async fn apply(
   tx: &mut Transaction,
   registry: &SchemaRegistry,
   snapshot: &Snapshot,
   strategy: SyncStrategy,
) -> Result<SyncReport> {
   let tables = prepare(registry, snapshot)?;

   let report = match strategy {
      SyncStrategy::Full => full::sync(tx, &tables).await?,
      SyncStrategy::Delta => delta::sync(tx, &tables).await?,
   };

   debug!(
      ?strategy,
      tables = report.tables.len(),
      rows_written = report.rows_written,
      rows_deleted = report.rows_deleted,
      changes = report.changes.len(),
      "Snapshot synced"
   );
   Ok(report)
}

/// One snapshot table converted to storage columns.
pub(crate) struct PreparedTable<'a> {
   pub schema: &'a TableSchema,
   pub rows: Vec<JsonRow>,
}

impl PreparedTable<'_> {
   pub fn primary_key<'r>(&self, row: &'r JsonRow) -> &'r JsonValue {
      row.get(&self.schema.primary_key).unwrap_or(&JsonValue::Null)
   }
}

/// Maps snapshot rows to storage columns in parents-first order.
pub(crate) fn prepare<'a>(
   registry: &'a SchemaRegistry,
   snapshot: &Snapshot,
) -> Result<Vec<PreparedTable<'a>>> {
   for table in snapshot.table_names() {
      registry.require(table)?;
   }

   let mut prepared = Vec::new();
   for schema in registry.tables() {
      let Some(rows) = snapshot.rows(&schema.name) else {
         continue;
      };

      let mut storage_rows = Vec::with_capacity(rows.len());
      for row in rows {
         let stored = schema.fields.to_storage(row);
         if stored.get(&schema.primary_key).is_none_or(JsonValue::is_null) {
            return Err(Error::MissingPrimaryKey(schema.name.clone()));
         }
         storage_rows.push(stored);
      }
      prepared.push(PreparedTable {
         schema,
         rows: storage_rows,
      });
   }
   Ok(prepared)
}

/// How conflicting primary keys are resolved when inserting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InsertMode {
   Replace,
   Upsert,
}

/// Writes `rows` with multi-row INSERTs of up to `batch_size` rows.
///
/// Rows are grouped by their column set first so each statement has one
/// column list. Returns the number of rows submitted.
pub(crate) async fn insert_batches(
   tx: &mut Transaction,
   schema: &TableSchema,
   rows: &[JsonRow],
   mode: InsertMode,
) -> Result<u64> {
   let mut groups: IndexMap<Vec<&str>, Vec<&JsonRow>> = IndexMap::new();
   for row in rows {
      let columns: Vec<&str> = row.keys().map(String::as_str).collect();
      groups.entry(columns).or_default().push(row);
   }

   let mut written = 0;
   for (columns, group) in &groups {
      for chunk in group.chunks(schema.batch_size) {
         let sql = insert_sql(schema, columns, chunk.len(), mode);
         let values = chunk
            .iter()
            .flat_map(|row| row.values().cloned())
            .collect();
         tx.execute(&sql, values).await?;
         written += chunk.len() as u64;
      }
   }
   Ok(written)
}

fn insert_sql(schema: &TableSchema, columns: &[&str], rows: usize, mode: InsertMode) -> String {
   let column_list = columns
      .iter()
      .map(|c| quote_identifier(c))
      .collect::<Vec<_>>()
      .join(", ");
   let placeholders = format!("({})", vec!["?"; columns.len()].join(", "));
   let values = vec![placeholders.as_str(); rows].join(", ");
   let table = schema.quoted_name();

   match mode {
      InsertMode::Replace => {
         format!("INSERT OR REPLACE INTO {table} ({column_list}) VALUES {values}")
      }
      InsertMode::Upsert => {
         let pk = quote_identifier(&schema.primary_key);
         let updates = columns
            .iter()
            .filter(|c| **c != schema.primary_key)
            .map(|c| {
               let c = quote_identifier(c);
               format!("{c} = excluded.{c}")
            })
            .collect::<Vec<_>>();
         if updates.is_empty() {
            format!("INSERT INTO {table} ({column_list}) VALUES {values} ON CONFLICT({pk}) DO NOTHING")
         } else {
            format!(
               "INSERT INTO {table} ({column_list}) VALUES {values} ON CONFLICT({pk}) DO UPDATE SET {}",
               updates.join(", ")
            )
         }
      }
   }
}

/// Deletes rows whose primary key is in `ids`, `batch_size` keys per
/// statement. Returns rows deleted.
pub(crate) async fn delete_by_ids(
   tx: &mut Transaction,
   schema: &TableSchema,
   ids: &[JsonValue],
) -> Result<u64> {
   let mut deleted = 0;
   for chunk in ids.chunks(schema.batch_size) {
      let sql = format!(
         "DELETE FROM {} WHERE {} IN ({})",
         schema.quoted_name(),
         quote_identifier(&schema.primary_key),
         vec!["?"; chunk.len()].join(", ")
      );
      deleted += tx.execute(&sql, chunk.to_vec()).await?.rows_affected;
   }
   Ok(deleted)
}

/// Stored rows of one table keyed by [`id_key`].
pub(crate) type StoredRows = HashMap<String, JsonRow>;

/// Reads every snapshot table as it is before the sync touches it.
pub(crate) async fn read_stored(
   tx: &mut Transaction,
   tables: &[PreparedTable<'_>],
) -> Result<Vec<StoredRows>> {
   let mut stored = Vec::with_capacity(tables.len());
   for table in tables {
      let sql = format!("SELECT * FROM {}", table.schema.quoted_name());
      let rows = tx.select(&sql, Vec::new()).await?;
      stored.push(
         rows
            .into_iter()
            .map(|row| (id_key(table.primary_key(&row)), row))
            .collect(),
      );
   }
   Ok(stored)
}

/// Stored rows whose primary key is absent from the snapshot, in key order.
pub(crate) fn stale_rows<'s>(
   table: &PreparedTable<'_>,
   existing: &'s StoredRows,
) -> Vec<&'s JsonRow> {
   let incoming: HashSet<String> = table
      .rows
      .iter()
      .map(|row| id_key(table.primary_key(row)))
      .collect();

   let mut stale: Vec<(&String, &JsonRow)> = existing
      .iter()
      .filter(|(key, _)| !incoming.contains(*key))
      .collect();
   stale.sort_by(|a, b| a.0.cmp(b.0));
   stale.into_iter().map(|(_, row)| row).collect()
}

/// Appends an INSERT or UPDATE record for every snapshot row of `table`.
pub(crate) fn record_writes(
   table: &PreparedTable<'_>,
   existing: &StoredRows,
   changes: &mut Vec<ChangeRecord>,
) {
   let fields = &table.schema.fields;
   for row in &table.rows {
      let id = table.primary_key(row).clone();
      let new_data = Some(external_json(fields.to_external(row)));
      let record = match existing.get(&id_key(&id)) {
         Some(old) => ChangeRecord::new(
            &table.schema.name,
            ChangeOperation::Update,
            id,
            Some(external_json(fields.to_external(old))),
            new_data,
         ),
         None => ChangeRecord::new(&table.schema.name, ChangeOperation::Insert, id, None, new_data),
      };
      changes.push(record);
   }
}

/// Appends a DELETE record for each of `stale`.
pub(crate) fn record_deletes(
   table: &PreparedTable<'_>,
   stale: &[&JsonRow],
   changes: &mut Vec<ChangeRecord>,
) {
   for row in stale {
      changes.push(ChangeRecord::new(
         &table.schema.name,
         ChangeOperation::Delete,
         table.primary_key(row).clone(),
         Some(external_json(table.schema.fields.to_external(row))),
         None,
      ));
   }
}

fn external_json(row: JsonRow) -> JsonValue {
   JsonValue::Object(row.into_iter().collect())
}

/// Comparable form of a primary key, so `1`, `1.0` and `"1"` (which SQLite
/// stores identically in an INTEGER column) match.
pub(crate) fn id_key(value: &JsonValue) -> String {
   match value {
      JsonValue::String(s) => match s.parse::<i64>() {
         Ok(n) if n.to_string() == *s => n.to_string(),
         _ => format!("s:{s}"),
      },
      JsonValue::Number(n) => match n.as_f64() {
         Some(f) if n.as_i64().is_none() && f.fract() == 0.0 && f.abs() < 9.0e15 => {
            (f as i64).to_string()
         }
         _ => n.to_string(),
      },
      other => other.to_string(),
   }
}

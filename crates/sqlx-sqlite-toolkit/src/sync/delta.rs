use serde_json::Value as JsonValue;
use tracing::trace;

use super::{
   InsertMode, PreparedTable, SyncReport, SyncStrategy, delete_by_ids, insert_batches,
   read_stored, record_deletes, record_writes, stale_rows,
};
use crate::Result;
use crate::transactions::Transaction;

/// Upserts snapshot rows parents first, then deletes rows missing from the
/// snapshot children first. Every upsert and delete is recorded.
pub(super) async fn sync(tx: &mut Transaction, tables: &[PreparedTable<'_>]) -> Result<SyncReport> {
   let mut report = SyncReport::new(SyncStrategy::Delta);
   let stored = read_stored(tx, tables).await?;

   for (table, existing) in tables.iter().zip(&stored) {
      let written = insert_batches(tx, table.schema, &table.rows, InsertMode::Upsert).await?;
      report.rows_written += written;
      report.tables.push(table.schema.name.clone());
      record_writes(table, existing, &mut report.changes);
      trace!(table = %table.schema.name, written, "Rows upserted");
   }

   for (table, existing) in tables.iter().zip(&stored).rev() {
      let stale = stale_rows(table, existing);
      if stale.is_empty() {
         continue;
      }

      let ids: Vec<JsonValue> = stale.iter().map(|row| table.primary_key(row).clone()).collect();
      let deleted = delete_by_ids(tx, table.schema, &ids).await?;
      report.rows_deleted += deleted;
      record_deletes(table, &stale, &mut report.changes);
      trace!(table = %table.schema.name, deleted, "Stale rows deleted");
   }

   Ok(report)
}

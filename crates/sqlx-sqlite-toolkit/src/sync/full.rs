use tracing::trace;

use super::{
   InsertMode, PreparedTable, SyncReport, SyncStrategy, insert_batches, read_stored,
   record_deletes, record_writes, stale_rows,
};
use crate::Result;
use crate::transactions::Transaction;

/// Clears every snapshot table children first, then reinserts parents first.
///
/// Foreign keys are checked at commit against the final rows, so clearing
/// a parent whose children are not in the snapshot only fails when the
/// reinserted parents no longer cover those children.
pub(super) async fn sync(tx: &mut Transaction, tables: &[PreparedTable<'_>]) -> Result<SyncReport> {
   let mut report = SyncReport::new(SyncStrategy::Full);
   tx.execute("PRAGMA defer_foreign_keys = ON", Vec::new()).await?;
   let stored = read_stored(tx, tables).await?;

   let mut deletes = Vec::new();
   for (table, existing) in tables.iter().zip(&stored).rev() {
      let sql = format!("DELETE FROM {}", table.schema.quoted_name());
      let cleared = tx.execute(&sql, Vec::new()).await?.rows_affected;
      trace!(table = %table.schema.name, cleared, "Table cleared");
      report.rows_deleted += cleared;
      record_deletes(table, &stale_rows(table, existing), &mut deletes);
   }

   for (table, existing) in tables.iter().zip(&stored) {
      let written = insert_batches(tx, table.schema, &table.rows, InsertMode::Replace).await?;
      trace!(table = %table.schema.name, written, "Table repopulated");
      report.rows_written += written;
      report.tables.push(table.schema.name.clone());
      record_writes(table, existing, &mut report.changes);
   }

   report.changes.append(&mut deletes);
   Ok(report)
}

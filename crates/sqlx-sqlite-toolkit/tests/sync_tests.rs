use serde_json::{Value as JsonValue, json};
use sqlx_sqlite_toolkit::{
   ChangeOperation, DatabaseWrapper, Error, FieldMap, JsonRow, SchemaRegistry, Snapshot,
   SyncStrategy, TableSchema, Transaction, ValidationOutcome, sync, validate_snapshot,
};
use tempfile::TempDir;

async fn create_test_db() -> (DatabaseWrapper, TempDir) {
   let temp_dir = TempDir::new().expect("Failed to create temp directory");
   let db_path = temp_dir.path().join("test.db");
   let wrapper = DatabaseWrapper::connect(&db_path, None)
      .await
      .expect("Failed to connect to test database");

   (wrapper, temp_dir)
}

/// `warehouses` (parent) and `inventory` (child, FK to warehouses).
/// Inventory exposes `qty` and `warehouseId` externally.
fn registry() -> SchemaRegistry {
   SchemaRegistry::new()
      .with_table(
         TableSchema::new("warehouses", "id", FieldMap::identity(["id", "name"])).with_ddl(
            "CREATE TABLE IF NOT EXISTS warehouses (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
         ),
      )
      .unwrap()
      .with_table(
         TableSchema::new(
            "inventory",
            "id",
            FieldMap::identity(["id", "sku"])
               .field("qty", "quantity")
               .field("warehouseId", "warehouse_id"),
         )
         .with_parent("warehouses")
         .with_batch_size(2)
         .with_ddl(
            "CREATE TABLE IF NOT EXISTS inventory (
               id INTEGER PRIMARY KEY,
               sku TEXT NOT NULL,
               quantity INTEGER NOT NULL,
               warehouse_id INTEGER NOT NULL REFERENCES warehouses(id)
            )",
         ),
      )
      .unwrap()
}

async fn create_tables(db: &DatabaseWrapper, registry: &SchemaRegistry) {
   for ddl in registry.ddl_statements() {
      db.execute(ddl.to_string(), vec![]).await.unwrap();
   }
}

fn row(value: JsonValue) -> JsonRow {
   value.as_object().unwrap().clone().into_iter().collect()
}

fn item(id: i64, sku: &str, qty: i64) -> JsonRow {
   row(json!({"id": id, "sku": sku, "qty": qty, "warehouseId": 1}))
}

fn snapshot(items: Vec<JsonRow>) -> Snapshot {
   Snapshot::new()
      .with_rows("warehouses", vec![row(json!({"id": 1, "name": "main"}))])
      .with_rows("inventory", items)
}

async fn apply(
   db: &DatabaseWrapper,
   registry: &SchemaRegistry,
   snapshot: &Snapshot,
   strategy: SyncStrategy,
) -> sqlx_sqlite_toolkit::Result<sync::SyncReport> {
   db.transaction(async |tx: &mut Transaction| sync::apply(tx, registry, snapshot, strategy).await)
      .await
}

async fn inventory(db: &DatabaseWrapper) -> Vec<JsonRow> {
   db.select(
      "SELECT id, sku, quantity, warehouse_id FROM inventory ORDER BY id".into(),
      vec![],
   )
   .await
   .unwrap()
}

// ─── Delta ───

#[tokio::test]
async fn delta_updates_and_deletes_missing_rows() {
   let (db, _temp) = create_test_db().await;
   let registry = registry();
   create_tables(&db, &registry).await;

   apply(
      &db,
      &registry,
      &snapshot(vec![item(1, "bolt", 3), item(2, "nut", 9)]),
      SyncStrategy::Full,
   )
   .await
   .unwrap();

   let report = apply(
      &db,
      &registry,
      &snapshot(vec![item(1, "bolt", 5)]),
      SyncStrategy::Delta,
   )
   .await
   .unwrap();

   let rows = inventory(&db).await;
   assert_eq!(rows.len(), 1);
   assert_eq!(rows[0]["id"], json!(1));
   assert_eq!(rows[0]["quantity"], json!(5));

   assert_eq!(report.rows_deleted, 1);
   let deleted: Vec<_> = report
      .changes
      .iter()
      .filter(|c| c.operation == ChangeOperation::Delete)
      .collect();
   assert_eq!(deleted.len(), 1);
   assert_eq!(deleted[0].table, "inventory");
   assert_eq!(deleted[0].record_id, json!(2));
   assert_eq!(deleted[0].old_data.as_ref().unwrap()["qty"], json!(9));

   let update = report
      .changes
      .iter()
      .find(|c| c.table == "inventory" && c.operation == ChangeOperation::Update)
      .unwrap();
   assert_eq!(update.old_data.as_ref().unwrap()["qty"], json!(3));
   assert_eq!(update.new_data.as_ref().unwrap()["qty"], json!(5));

   db.remove().await.unwrap();
}

#[tokio::test]
async fn delta_records_inserts_for_new_rows() {
   let (db, _temp) = create_test_db().await;
   let registry = registry();
   create_tables(&db, &registry).await;

   let report = apply(
      &db,
      &registry,
      &snapshot(vec![item(1, "bolt", 3)]),
      SyncStrategy::Delta,
   )
   .await
   .unwrap();

   let ops: Vec<_> = report
      .changes
      .iter()
      .map(|c| (c.table.as_str(), c.operation))
      .collect();
   assert_eq!(
      ops,
      vec![
         ("warehouses", ChangeOperation::Insert),
         ("inventory", ChangeOperation::Insert),
      ]
   );
   assert!(report.changes.iter().all(|c| c.old_data.is_none()));

   db.remove().await.unwrap();
}

#[tokio::test]
async fn delta_leaves_tables_outside_snapshot_alone() {
   let (db, _temp) = create_test_db().await;
   let registry = registry();
   create_tables(&db, &registry).await;

   apply(
      &db,
      &registry,
      &snapshot(vec![item(1, "bolt", 3)]),
      SyncStrategy::Full,
   )
   .await
   .unwrap();

   let only_warehouses =
      Snapshot::new().with_rows("warehouses", vec![row(json!({"id": 1, "name": "renamed"}))]);
   apply(&db, &registry, &only_warehouses, SyncStrategy::Delta)
      .await
      .unwrap();

   assert_eq!(inventory(&db).await.len(), 1);
   let warehouses = db
      .select("SELECT name FROM warehouses".into(), vec![])
      .await
      .unwrap();
   assert_eq!(warehouses[0]["name"], json!("renamed"));

   db.remove().await.unwrap();
}

#[tokio::test]
async fn delta_empty_table_deletes_every_row() {
   let (db, _temp) = create_test_db().await;
   let registry = registry();
   create_tables(&db, &registry).await;

   apply(
      &db,
      &registry,
      &snapshot(vec![item(1, "bolt", 3), item(2, "nut", 9)]),
      SyncStrategy::Full,
   )
   .await
   .unwrap();

   let report = apply(&db, &registry, &snapshot(vec![]), SyncStrategy::Delta)
      .await
      .unwrap();

   assert!(inventory(&db).await.is_empty());
   assert_eq!(report.rows_deleted, 2);
   let deleted: Vec<_> = report
      .changes
      .iter()
      .filter(|c| c.operation == ChangeOperation::Delete)
      .map(|c| c.record_id.clone())
      .collect();
   assert_eq!(deleted, vec![json!(1), json!(2)]);

   db.remove().await.unwrap();
}

// ─── Full ───

#[tokio::test]
async fn full_and_delta_agree_on_empty_store() {
   let registry = registry();
   let incoming = snapshot(vec![item(1, "bolt", 3), item(2, "nut", 9), item(3, "gear", 1)]);

   let (full_db, _full_temp) = create_test_db().await;
   create_tables(&full_db, &registry).await;
   apply(&full_db, &registry, &incoming, SyncStrategy::Full)
      .await
      .unwrap();

   let (delta_db, _delta_temp) = create_test_db().await;
   create_tables(&delta_db, &registry).await;
   apply(&delta_db, &registry, &incoming, SyncStrategy::Delta)
      .await
      .unwrap();

   assert_eq!(inventory(&full_db).await, inventory(&delta_db).await);

   full_db.remove().await.unwrap();
   delta_db.remove().await.unwrap();
}

#[tokio::test]
async fn full_sync_is_idempotent() {
   let (db, _temp) = create_test_db().await;
   let registry = registry();
   create_tables(&db, &registry).await;
   let incoming = snapshot(vec![item(1, "bolt", 3), item(2, "nut", 9)]);

   let first = apply(&db, &registry, &incoming, SyncStrategy::Full)
      .await
      .unwrap();
   let after_first = inventory(&db).await;
   apply(&db, &registry, &incoming, SyncStrategy::Full)
      .await
      .unwrap();

   assert_eq!(inventory(&db).await, after_first);
   assert_eq!(first.rows_written, 3);
   assert!(
      first
         .changes
         .iter()
         .all(|c| c.operation == ChangeOperation::Insert)
   );

   db.remove().await.unwrap();
}

#[tokio::test]
async fn full_sync_replaces_table_contents() {
   let (db, _temp) = create_test_db().await;
   let registry = registry();
   create_tables(&db, &registry).await;

   apply(
      &db,
      &registry,
      &snapshot(vec![item(1, "bolt", 3), item(2, "nut", 9), item(3, "gear", 1)]),
      SyncStrategy::Full,
   )
   .await
   .unwrap();
   apply(
      &db,
      &registry,
      &snapshot(vec![item(4, "washer", 12)]),
      SyncStrategy::Full,
   )
   .await
   .unwrap();

   let rows = inventory(&db).await;
   assert_eq!(rows.len(), 1);
   assert_eq!(rows[0]["sku"], json!("washer"));
   assert_eq!(rows[0]["warehouse_id"], json!(1));

   db.remove().await.unwrap();
}

#[tokio::test]
async fn full_sync_records_changes() {
   let (db, _temp) = create_test_db().await;
   let registry = registry();
   create_tables(&db, &registry).await;

   apply(
      &db,
      &registry,
      &snapshot(vec![item(1, "bolt", 3), item(2, "nut", 9)]),
      SyncStrategy::Full,
   )
   .await
   .unwrap();

   let report = apply(
      &db,
      &registry,
      &snapshot(vec![item(2, "nut", 4), item(3, "gear", 1)]),
      SyncStrategy::Full,
   )
   .await
   .unwrap();

   let ops: Vec<_> = report
      .changes
      .iter()
      .map(|c| (c.table.as_str(), c.operation, c.record_id.clone()))
      .collect();
   assert_eq!(
      ops,
      vec![
         ("warehouses", ChangeOperation::Update, json!(1)),
         ("inventory", ChangeOperation::Update, json!(2)),
         ("inventory", ChangeOperation::Insert, json!(3)),
         ("inventory", ChangeOperation::Delete, json!(1)),
      ]
   );

   let update = &report.changes[1];
   assert_eq!(update.old_data.as_ref().unwrap()["qty"], json!(9));
   assert_eq!(update.new_data.as_ref().unwrap()["qty"], json!(4));
   let delete = &report.changes[3];
   assert_eq!(delete.old_data.as_ref().unwrap()["sku"], json!("bolt"));
   assert!(delete.new_data.is_none());

   db.remove().await.unwrap();
}

#[tokio::test]
async fn full_sync_of_parent_keeps_existing_children() {
   let (db, _temp) = create_test_db().await;
   let registry = registry();
   create_tables(&db, &registry).await;

   apply(
      &db,
      &registry,
      &snapshot(vec![item(1, "bolt", 3)]),
      SyncStrategy::Full,
   )
   .await
   .unwrap();

   // Inventory still references warehouse 1 while it is cleared
   let only_warehouses =
      Snapshot::new().with_rows("warehouses", vec![row(json!({"id": 1, "name": "renamed"}))]);
   let report = apply(&db, &registry, &only_warehouses, SyncStrategy::Full)
      .await
      .unwrap();
   assert_eq!(report.rows_written, 1);

   assert_eq!(inventory(&db).await.len(), 1);
   let warehouses = db
      .select("SELECT name FROM warehouses".into(), vec![])
      .await
      .unwrap();
   assert_eq!(warehouses[0]["name"], json!("renamed"));

   db.remove().await.unwrap();
}

#[tokio::test]
async fn full_sync_dropping_referenced_parent_fails_at_commit() {
   let (db, _temp) = create_test_db().await;
   let registry = registry();
   create_tables(&db, &registry).await;

   apply(
      &db,
      &registry,
      &snapshot(vec![item(1, "bolt", 3)]),
      SyncStrategy::Full,
   )
   .await
   .unwrap();

   let other_warehouse =
      Snapshot::new().with_rows("warehouses", vec![row(json!({"id": 2, "name": "annex"}))]);
   let err = apply(&db, &registry, &other_warehouse, SyncStrategy::Full)
      .await
      .unwrap_err();
   assert!(matches!(err, Error::Integrity(_)), "got {err:?}");

   let warehouses = db
      .select("SELECT id FROM warehouses".into(), vec![])
      .await
      .unwrap();
   assert_eq!(warehouses.len(), 1);
   assert_eq!(warehouses[0]["id"], json!(1));
   assert_eq!(inventory(&db).await.len(), 1);

   db.remove().await.unwrap();
}

// ─── Ordering and failure ───

#[tokio::test]
async fn parents_written_before_children() {
   let (db, _temp) = create_test_db().await;
   let registry = registry();
   create_tables(&db, &registry).await;

   // Children listed first in the snapshot; foreign keys are enforced
   let incoming = Snapshot::new()
      .with_rows("inventory", vec![item(1, "bolt", 3)])
      .with_rows("warehouses", vec![row(json!({"id": 1, "name": "main"}))]);

   for strategy in [SyncStrategy::Full, SyncStrategy::Delta] {
      let report = apply(&db, &registry, &incoming, strategy).await.unwrap();
      assert_eq!(report.tables, vec!["warehouses", "inventory"]);
   }

   db.remove().await.unwrap();
}

#[tokio::test]
async fn failed_sync_leaves_store_untouched() {
   let (db, _temp) = create_test_db().await;
   let registry = registry();
   create_tables(&db, &registry).await;

   apply(
      &db,
      &registry,
      &snapshot(vec![item(1, "bolt", 3)]),
      SyncStrategy::Full,
   )
   .await
   .unwrap();

   // References a warehouse that does not exist
   let bad = Snapshot::new().with_rows(
      "inventory",
      vec![row(json!({"id": 2, "sku": "nut", "qty": 1, "warehouseId": 99}))],
   );
   let err = apply(&db, &registry, &bad, SyncStrategy::Full)
      .await
      .unwrap_err();
   assert!(matches!(err, Error::Integrity(_)), "got {err:?}");

   let rows = inventory(&db).await;
   assert_eq!(rows.len(), 1);
   assert_eq!(rows[0]["id"], json!(1));

   db.remove().await.unwrap();
}

#[tokio::test]
async fn rejected_rows_abort_before_any_write() {
   let (db, _temp) = create_test_db().await;
   let registry = registry();
   create_tables(&db, &registry).await;

   let no_negative_stock = |table: &str, entity: &JsonRow| {
      let qty = entity.get("qty").and_then(JsonValue::as_i64);
      if table == "inventory" && matches!(qty, Some(q) if q < 0) {
         ValidationOutcome::invalid(["qty must not be negative"])
      } else {
         ValidationOutcome::valid()
      }
   };

   let incoming = snapshot(vec![item(1, "bolt", 3), item(2, "nut", -1)]);
   let err = validate_snapshot(&no_negative_stock, &registry, &incoming).unwrap_err();

   match err {
      Error::Validation(errors) => {
         assert_eq!(errors, vec!["inventory[2]: qty must not be negative"]);
      }
      other => panic!("expected validation error, got {other:?}"),
   }
   assert!(inventory(&db).await.is_empty());

   db.remove().await.unwrap();
}

#[tokio::test]
async fn unknown_table_is_rejected() {
   let (db, _temp) = create_test_db().await;
   let registry = registry();
   create_tables(&db, &registry).await;

   let incoming = Snapshot::new().with_rows("ghosts", vec![row(json!({"id": 1}))]);
   let err = apply(&db, &registry, &incoming, SyncStrategy::Delta)
      .await
      .unwrap_err();

   assert!(matches!(err, Error::UnknownTable(t) if t == "ghosts"));
   assert_eq!(db.database().stats().transaction_depth, 0);

   db.remove().await.unwrap();
}

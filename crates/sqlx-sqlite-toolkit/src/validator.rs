//! Row validation before writes

use serde_json::Value as JsonValue;

use crate::decode::JsonRow;
use crate::schema::SchemaRegistry;
use crate::snapshot::Snapshot;
use crate::{Error, Result};

/// Verdict for one entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationOutcome {
   pub is_valid: bool,
   pub errors: Vec<String>,
   /// Replacement for the entity; written instead of the input when present.
   pub sanitized: Option<JsonRow>,
}

impl ValidationOutcome {
   pub fn valid() -> Self {
      Self {
         is_valid: true,
         ..Default::default()
      }
   }

   pub fn sanitized(entity: JsonRow) -> Self {
      Self {
         is_valid: true,
         errors: Vec::new(),
         sanitized: Some(entity),
      }
   }

   pub fn invalid(errors: impl IntoIterator<Item = impl Into<String>>) -> Self {
      Self {
         is_valid: false,
         errors: errors.into_iter().map(Into::into).collect(),
         sanitized: None,
      }
   }
}

/// Checks entities, in external field names, before they are written.
pub trait Validator: Send + Sync {
   fn validate(&self, table: &str, entity: &JsonRow) -> ValidationOutcome;
}

/// Accepts everything unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl Validator for AcceptAll {
   fn validate(&self, _table: &str, _entity: &JsonRow) -> ValidationOutcome {
      ValidationOutcome::valid()
   }
}

impl<F> Validator for F
where
   F: Fn(&str, &JsonRow) -> ValidationOutcome + Send + Sync,
{
   fn validate(&self, table: &str, entity: &JsonRow) -> ValidationOutcome {
      self(table, entity)
   }
}

/// Validates every row of `snapshot`, returning the sanitized snapshot.
///
/// All rejections are collected before failing, each prefixed with
/// `table[id]`. Tables without a registered schema fail with
/// [`Error::UnknownTable`].
pub fn validate_snapshot(
   validator: &dyn Validator,
   registry: &SchemaRegistry,
   snapshot: &Snapshot,
) -> Result<Snapshot> {
   let mut errors = Vec::new();
   let mut sanitized = Snapshot::new();

   for (table, rows) in snapshot.tables() {
      let schema = registry.require(table)?;
      let pk_field = schema.primary_key_field();
      let mut clean = Vec::with_capacity(rows.len());

      for (index, row) in rows.iter().enumerate() {
         let outcome = validator.validate(table, row);
         if !outcome.is_valid {
            let id = pk_field
               .and_then(|f| row.get(f))
               .map(display_id)
               .unwrap_or_else(|| format!("#{index}"));
            if outcome.errors.is_empty() {
               errors.push(format!("{table}[{id}]: rejected"));
            }
            errors.extend(outcome.errors.iter().map(|e| format!("{table}[{id}]: {e}")));
            continue;
         }
         clean.push(outcome.sanitized.unwrap_or_else(|| row.clone()));
      }
      sanitized.set_rows(table, clean);
   }

   if errors.is_empty() {
      Ok(sanitized)
   } else {
      Err(Error::Validation(errors))
   }
}

fn display_id(value: &JsonValue) -> String {
   match value {
      JsonValue::String(s) => s.clone(),
      other => other.to_string(),
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::schema::{FieldMap, TableSchema};
   use serde_json::json;

   fn registry() -> SchemaRegistry {
      SchemaRegistry::new()
         .with_table(TableSchema::new(
            "tasks",
            "id",
            FieldMap::identity(["id", "title"]),
         ))
         .unwrap()
   }

   fn row(value: JsonValue) -> JsonRow {
      value.as_object().unwrap().clone().into_iter().collect()
   }

   #[test]
   fn test_accept_all_keeps_rows() {
      let snapshot = Snapshot::new().with_rows("tasks", vec![row(json!({"id": 1, "title": "a"}))]);
      let result = validate_snapshot(&AcceptAll, &registry(), &snapshot).unwrap();
      assert_eq!(result, snapshot);
   }

   #[test]
   fn test_rejections_are_aggregated() {
      let validator = |_: &str, entity: &JsonRow| {
         if entity.get("title").and_then(JsonValue::as_str).is_some_and(|t| !t.is_empty()) {
            ValidationOutcome::valid()
         } else {
            ValidationOutcome::invalid(["title is required"])
         }
      };
      let snapshot = Snapshot::new().with_rows(
         "tasks",
         vec![
            row(json!({"id": 1, "title": ""})),
            row(json!({"id": 2, "title": "ok"})),
            row(json!({"id": "x3"})),
         ],
      );

      let err = validate_snapshot(&validator, &registry(), &snapshot).unwrap_err();
      let Error::Validation(errors) = err else {
         panic!("expected validation error");
      };
      assert_eq!(
         errors,
         vec!["tasks[1]: title is required", "tasks[x3]: title is required"]
      );
   }

   #[test]
   fn test_sanitized_rows_replace_input() {
      let validator = |_: &str, entity: &JsonRow| {
         let mut clean = entity.clone();
         if let Some(JsonValue::String(title)) = clean.get_mut("title") {
            *title = title.trim().to_string();
         }
         ValidationOutcome::sanitized(clean)
      };
      let snapshot =
         Snapshot::new().with_rows("tasks", vec![row(json!({"id": 1, "title": "  padded  "}))]);

      let result = validate_snapshot(&validator, &registry(), &snapshot).unwrap();
      assert_eq!(result.rows("tasks").unwrap()[0].get("title"), Some(&json!("padded")));
   }

   #[test]
   fn test_unknown_table_fails() {
      let snapshot = Snapshot::new().with_rows("ghosts", vec![]);
      assert!(matches!(
         validate_snapshot(&AcceptAll, &registry(), &snapshot),
         Err(Error::UnknownTable(t)) if t == "ghosts"
      ));
   }
}

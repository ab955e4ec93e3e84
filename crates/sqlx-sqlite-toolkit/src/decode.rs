//! SQLite value to JSON decoding

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqliteRow, SqliteValueRef};
use sqlx::{Column, Decode, Row, Sqlite, TypeInfo, ValueRef};

use crate::{Error, Result};

/// A decoded row, columns in select order.
pub type JsonRow = IndexMap<String, JsonValue>;

/// Converts a raw SQLite value to JSON.
///
/// INTEGER and BOOLEAN become numbers, REAL becomes a number (NaN and
/// infinities become null), TEXT and date/time types become strings, and BLOBs
/// become base64 strings.
pub fn to_json(value: SqliteValueRef) -> Result<JsonValue> {
   if value.is_null() {
      return Ok(JsonValue::Null);
   }

   let type_name = value.type_info().name().to_ascii_uppercase();
   let json = match type_name.as_str() {
      "NULL" => JsonValue::Null,
      "INTEGER" | "BOOLEAN" | "INT" | "INT8" | "BIGINT" => {
         JsonValue::from(decode::<i64>(value)?)
      }
      "REAL" | "NUMERIC" | "FLOAT" | "DOUBLE" => {
         let v = decode::<f64>(value)?;
         serde_json::Number::from_f64(v)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null)
      }
      "TEXT" | "DATE" | "TIME" | "DATETIME" => JsonValue::String(decode::<String>(value)?),
      "BLOB" => JsonValue::String(STANDARD.encode(decode::<Vec<u8>>(value)?)),
      other => return Err(Error::UnsupportedDatatype(other.to_string())),
   };
   Ok(json)
}

fn decode<'r, T: Decode<'r, Sqlite>>(value: SqliteValueRef<'r>) -> Result<T> {
   T::decode(value).map_err(|e| Error::Sqlx(sqlx::Error::Decode(e)))
}

/// Decodes every column of `row`.
pub fn decode_row(row: &SqliteRow) -> Result<JsonRow> {
   let mut value = IndexMap::with_capacity(row.columns().len());
   for (i, column) in row.columns().iter().enumerate() {
      let v = row.try_get_raw(i)?;
      value.insert(column.name().to_string(), to_json(v)?);
   }
   Ok(value)
}

pub fn decode_rows(rows: Vec<SqliteRow>) -> Result<Vec<JsonRow>> {
   rows.iter().map(decode_row).collect()
}

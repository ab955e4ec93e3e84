//! Statements, parameter binding and write classification

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::Sqlite;
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;

/// A SQL statement with its bind values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
   pub query: String,
   pub values: Vec<JsonValue>,
}

impl Statement {
   pub fn new(query: impl Into<String>, values: Vec<JsonValue>) -> Self {
      Self {
         query: query.into(),
         values,
      }
   }

   /// True if the statement changes data or schema.
   pub fn is_write(&self) -> bool {
      is_write(&self.query)
   }

   pub(crate) fn bind(&self) -> Query<'_, Sqlite, SqliteArguments<'_>> {
      bind_values(sqlx::query(&self.query), self.values.iter().cloned())
   }
}

impl<Q: Into<String>> From<(Q, Vec<JsonValue>)> for Statement {
   fn from((query, values): (Q, Vec<JsonValue>)) -> Self {
      Self::new(query, values)
   }
}

/// Result returned from write operations (e.g. INSERT, UPDATE, DELETE).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteQueryResult {
   /// The number of rows affected by the write operation.
   pub rows_affected: u64,
   /// The last inserted row ID (SQLite ROWID).
   ///
   /// Only set for INSERT operations on tables with a ROWID.
   /// Tables created with `WITHOUT ROWID` will not set this value (returns 0).
   pub last_insert_id: i64,
}

impl From<sqlx::sqlite::SqliteQueryResult> for WriteQueryResult {
   fn from(result: sqlx::sqlite::SqliteQueryResult) -> Self {
      Self {
         rows_affected: result.rows_affected(),
         last_insert_id: result.last_insert_rowid(),
      }
   }
}

const WRITE_KEYWORDS: &[&str] = &[
   "INSERT", "UPDATE", "DELETE", "REPLACE", "CREATE", "DROP", "ALTER",
];

/// Classifies `sql` as a data or schema write.
///
/// Looks at the first keyword after comments. For `WITH` statements the
/// first top-level verb after the common table expressions decides.
pub fn is_write(sql: &str) -> bool {
   let words = top_level_words(sql);
   let Some(first) = words.first() else {
      return false;
   };

   if first == "WITH" {
      return words
         .iter()
         .skip(1)
         .find(|w| matches!(w.as_str(), "SELECT" | "VALUES") || WRITE_KEYWORDS.contains(&w.as_str()))
         .is_some_and(|w| WRITE_KEYWORDS.contains(&w.as_str()));
   }

   WRITE_KEYWORDS.contains(&first.as_str())
}

/// Uppercased bare words outside parentheses, string literals, quoted
/// identifiers and comments.
fn top_level_words(sql: &str) -> Vec<String> {
   let mut words = Vec::new();
   let mut current = String::new();
   let mut depth = 0usize;
   let mut chars = sql.chars().peekable();

   let flush = |current: &mut String, words: &mut Vec<String>| {
      if !current.is_empty() {
         words.push(current.to_ascii_uppercase());
         current.clear();
      }
   };

   while let Some(c) = chars.next() {
      match c {
         '-' if chars.peek() == Some(&'-') => {
            flush(&mut current, &mut words);
            for c in chars.by_ref() {
               if c == '\n' {
                  break;
               }
            }
         }
         '/' if chars.peek() == Some(&'*') => {
            flush(&mut current, &mut words);
            chars.next();
            let mut prev = '\0';
            for c in chars.by_ref() {
               if prev == '*' && c == '/' {
                  break;
               }
               prev = c;
            }
         }
         '\'' | '"' | '`' | '[' => {
            flush(&mut current, &mut words);
            let close = if c == '[' { ']' } else { c };
            for c in chars.by_ref() {
               if c == close {
                  break;
               }
            }
         }
         '(' => {
            flush(&mut current, &mut words);
            depth += 1;
         }
         ')' => {
            flush(&mut current, &mut words);
            depth = depth.saturating_sub(1);
         }
         c if c.is_ascii_alphanumeric() || c == '_' => {
            if depth == 0 {
               current.push(c);
            }
         }
         _ => flush(&mut current, &mut words),
      }
   }
   flush(&mut current, &mut words);
   words
}

/// Binds JSON values to a query in order.
pub fn bind_values<'q>(
   mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
   values: impl IntoIterator<Item = JsonValue>,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
   for value in values {
      query = bind_value(query, value);
   }
   query
}

/// Binds a single JSON value using the closest SQLite storage class.
pub fn bind_value<'q>(
   query: Query<'q, Sqlite, SqliteArguments<'q>>,
   value: JsonValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
   match value {
      JsonValue::Null => query.bind(None::<JsonValue>),
      JsonValue::String(s) => query.bind(s),
      JsonValue::Bool(b) => query.bind(b),
      JsonValue::Number(number) => {
         // Preserve integer precision by binding as i64 when possible
         if let Some(int_val) = number.as_i64() {
            query.bind(int_val)
         } else if let Some(uint_val) = number.as_u64() {
            // Value too large for i64, use f64 (will lose precision)
            query.bind(uint_val as f64)
         } else {
            query.bind(number.as_f64().unwrap_or_default())
         }
      }
      // Arrays and objects are stored as JSON text
      other => query.bind(other),
   }
}

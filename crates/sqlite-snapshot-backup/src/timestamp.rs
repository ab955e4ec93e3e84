//! RFC 3339 timestamps for change records and artifacts

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::{Error, Result};

/// Current UTC time as RFC 3339.
pub fn now() -> String {
   format(OffsetDateTime::now_utc())
}

pub fn format(at: OffsetDateTime) -> String {
   // Rfc3339 only fails for years outside 0..=9999
   at.format(&Rfc3339)
      .unwrap_or_else(|_| at.unix_timestamp().to_string())
}

pub fn parse(value: &str) -> Result<OffsetDateTime> {
   OffsetDateTime::parse(value, &Rfc3339).map_err(|e| Error::Timestamp(format!("{value}: {e}")))
}

/// Timestamp made safe for file names: `:` and `.` become `-`.
pub fn file_stamp(timestamp: &str) -> String {
   timestamp.replace([':', '.'], "-")
}

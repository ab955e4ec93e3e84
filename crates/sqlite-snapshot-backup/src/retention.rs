//! Age and count retention planning

use time::{Duration, OffsetDateTime};

use crate::timestamp;
use crate::{BackupConfig, BackupEntry};

/// Splits `entries` into (kept, removed).
///
/// Newest first, the age filter drops artifacts older than `max_age_days`
/// relative to `now`, then the count filter trims to `max_backups`. The
/// single newest artifact survives both filters. Artifacts with an
/// unparseable timestamp are treated as expired.
pub fn plan(
   mut entries: Vec<BackupEntry>,
   config: &BackupConfig,
   now: OffsetDateTime,
) -> (Vec<BackupEntry>, Vec<BackupEntry>) {
   sort_newest_first(&mut entries);

   let cutoff = now - Duration::days(i64::from(config.max_age_days));
   let max_backups = config.max_backups.max(1);

   let mut kept = Vec::with_capacity(entries.len());
   let mut removed = Vec::new();

   for (i, entry) in entries.into_iter().enumerate() {
      let fresh = timestamp::parse(&entry.artifact.timestamp).is_ok_and(|at| at >= cutoff);
      if i == 0 || fresh {
         kept.push(entry);
      } else {
         removed.push(entry);
      }
   }

   if kept.len() > max_backups {
      removed.extend(kept.split_off(max_backups));
   }

   (kept, removed)
}

pub(crate) fn sort_newest_first(entries: &mut [BackupEntry]) {
   entries.sort_by(|a, b| {
      let at = |e: &BackupEntry| timestamp::parse(&e.artifact.timestamp).ok();
      at(b)
         .cmp(&at(a))
         .then_with(|| b.artifact.timestamp.cmp(&a.artifact.timestamp))
   });
}

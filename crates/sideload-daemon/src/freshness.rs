//! Age checks for cached files

use chrono::{DateTime, Duration, Utc};
use std::path::Path;

/// Longest accepted maximum age, about a century
const MAX_AGE_CAP_HOURS: i64 = 24 * 365 * 100;

/// Convert a configured age in hours, capping values chrono cannot represent
pub fn max_age(hours: u64) -> Duration {
    let hours = i64::try_from(hours)
        .unwrap_or(MAX_AGE_CAP_HOURS)
        .min(MAX_AGE_CAP_HOURS);
    Duration::try_hours(hours).unwrap_or_else(|| Duration::days(365 * 100))
}

/// Whether something modified at `modified` is older than `max_age` at `now`
pub fn is_stale(modified: DateTime<Utc>, now: DateTime<Utc>, max_age: Duration) -> bool {
    now.signed_duration_since(modified) > max_age
}

/// Modification time of `path`, if it exists
pub fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

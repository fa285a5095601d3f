//! Scheduling and time parsing utilities
//!
//! This module computes the daily trigger instant and parses the per-post
//! `datetime` cells used for out-of-order delivery.

use crate::error::{ConfigError, Result};
use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Formats accepted for a timestamp without an explicit offset
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Parse a daily posting time in `HH:MM` form
///
/// # Errors
///
/// Returns a configuration error if the value is not a valid 24-hour time.
pub fn parse_post_time(input: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(input.trim(), "%H:%M").map_err(|e| {
        ConfigError::InvalidValue {
            field: "schedule.post_time".to_string(),
            reason: format!("expected HH:MM, got '{}' ({})", input, e),
        }
        .into()
    })
}

/// Next instant strictly after `now` at which the daily trigger fires
///
/// The wall-clock `time` is interpreted in `tz`. A time that falls into a DST
/// gap is skipped for that day; an ambiguous time uses the earlier instant.
pub fn next_daily_run(now: DateTime<Utc>, time: NaiveTime, tz: Tz) -> DateTime<Utc> {
    let today = now.with_timezone(&tz).date_naive();

    for offset in 0..=2u64 {
        let Some(date) = today.checked_add_days(Days::new(offset)) else {
            break;
        };
        if let Some(candidate) = tz.from_local_datetime(&date.and_time(time)).earliest() {
            let candidate = candidate.with_timezone(&Utc);
            if candidate > now {
                return candidate;
            }
        }
    }

    now + chrono::Duration::days(1)
}

/// Parse an ISO-8601 `datetime` cell
///
/// Timestamps carrying an offset are taken as-is; naive timestamps and bare
/// dates are interpreted in `tz`. Returns `None` for anything unparseable,
/// which callers treat as "not scheduled".
pub fn parse_scheduled_at(input: &str, tz: Tz) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }

    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(input, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })?;

    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

//! Usage window calculations.
//!
//! All calendar comparisons are made in UTC so that every device and gateway
//! instance agrees on window boundaries regardless of local timezone.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Cadence at which a usage counter resets.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResetPeriod {
    Never,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

/// Whether the window that began at `window_start` has elapsed at `now`.
///
/// `daily`, `monthly` and `yearly` compare UTC calendar fields rather than
/// fixed-size buckets; `weekly` is a rolling seven-day window. A `now` earlier
/// than `window_start` (device clock reset, skew between instances) never
/// triggers a reset.
pub fn needs_reset(now: DateTime<Utc>, window_start: DateTime<Utc>, period: ResetPeriod) -> bool {
    if now < window_start {
        return false;
    }
    match period {
        ResetPeriod::Never => false,
        ResetPeriod::Daily => now.date_naive() != window_start.date_naive(),
        ResetPeriod::Weekly => now - window_start >= Duration::days(7),
        ResetPeriod::Monthly => {
            (now.year(), now.month()) != (window_start.year(), window_start.month())
        }
        ResetPeriod::Yearly => now.year() != window_start.year(),
    }
}

/// The boundary at which a window beginning at `from` rolls over.
///
/// Returns `None` for `never`, and for dates outside chrono's representable
/// range (which cannot occur for timestamps this service writes).
pub fn next_window_start(from: DateTime<Utc>, period: ResetPeriod) -> Option<DateTime<Utc>> {
    match period {
        ResetPeriod::Never => None,
        ResetPeriod::Daily => from.date_naive().succ_opt().map(start_of_day),
        ResetPeriod::Weekly => Some(from + Duration::days(7)),
        ResetPeriod::Monthly => {
            let (year, month) = if from.month() == 12 {
                (from.year() + 1, 1)
            } else {
                (from.year(), from.month() + 1)
            };
            NaiveDate::from_ymd_opt(year, month, 1).map(start_of_day)
        }
        ResetPeriod::Yearly => NaiveDate::from_ymd_opt(from.year() + 1, 1, 1).map(start_of_day),
    }
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

//! Recurrence date arithmetic.
//!
//! Pure calendar math, no state or I/O. An unrecognized pattern is a
//! documented no-op (no successor), not an error, so free-text patterns
//! coming from upstream callers degrade gracefully.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};

/// Recognized recurrence patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recurrence {
    Daily,
    Weekly,
    Monthly,
}

impl Recurrence {
    /// Fallback-to-none parser; anything unrecognized means "one-shot".
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "daily" => Some(Recurrence::Daily),
            "weekly" => Some(Recurrence::Weekly),
            "monthly" => Some(Recurrence::Monthly),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Recurrence::Daily => "daily",
            Recurrence::Weekly => "weekly",
            Recurrence::Monthly => "monthly",
        }
    }
}

/// Compute the next due date for a recurrence pattern.
///
/// Daily and weekly shift by exact whole days, preserving time-of-day.
/// Monthly moves to the same day-of-month in the next calendar month,
/// clamped to that month's last day (Jan 31 -> Feb 28/29), with the year
/// rolling over from December. Returns `None` for unrecognized patterns.
pub fn next_due(current: DateTime<Utc>, pattern: &str) -> Option<DateTime<Utc>> {
    match Recurrence::parse(pattern)? {
        Recurrence::Daily => Some(current + Duration::days(1)),
        Recurrence::Weekly => Some(current + Duration::days(7)),
        Recurrence::Monthly => add_one_month(current),
    }
}

fn add_one_month(current: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (year, month) = if current.month() == 12 {
        (current.year() + 1, 1)
    } else {
        (current.year(), current.month() + 1)
    };

    let day = current.day().min(days_in_month(year, month)?);
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Utc.from_local_datetime(&date.and_time(current.time()))
        .single()
}

fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    let first_of_next = NaiveDate::from_ymd_opt(next_year, next_month, 1)?;
    Some(first_of_next.pred_opt()?.day())
}

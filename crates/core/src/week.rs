//! ISO-week and rolling-window helpers.
//!
//! Quotas are evaluated against the current ISO calendar week (Monday
//! 00:00 UTC); duplicate suppression uses a trailing 30-day window.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};

pub const DUPLICATE_WINDOW_DAYS: i64 = 30;
pub const DOUBLE_SUBMIT_WINDOW_SECONDS: i64 = 5;

/// Monday 00:00 UTC of the week containing `now`.
pub fn iso_week_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let days_from_monday = i64::from(now.weekday().num_days_from_monday());
    let monday = now.date_naive() - Duration::days(days_from_monday);
    Utc.from_utc_datetime(&monday.and_time(NaiveTime::MIN))
}

/// Billing key for the ISO week containing `now`, e.g. `2026-W35`.
pub fn week_key(now: DateTime<Utc>) -> String {
    let week = now.iso_week();
    format!("{}-W{:02}", week.year(), week.week())
}

pub fn duplicate_window_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::days(DUPLICATE_WINDOW_DAYS)
}

pub fn double_submit_window_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::seconds(DOUBLE_SUBMIT_WINDOW_SECONDS)
}

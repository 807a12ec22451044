// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared helpers for date/time conversion.

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};

/// Format a UTC timestamp as RFC3339 using a `Z` suffix.
pub fn format_utc_rfc3339(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse an RFC3339 timestamp (any offset) into UTC.
pub fn parse_rfc3339_utc(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// `start` shifted by a fractional number of seconds, rounded to the millisecond.
///
/// `None` for non-finite offsets and for results outside chrono's range.
pub fn offset_by_seconds(start: DateTime<Utc>, seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    // Float to int casts saturate, and a saturated value fails the checks below
    let millis = (seconds * 1000.0).round() as i64;
    start.checked_add_signed(TimeDelta::try_milliseconds(millis)?)
}

/// Current time as Unix epoch seconds.
pub fn now_epoch_seconds() -> i64 {
    Utc::now().timestamp()
}

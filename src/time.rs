use chrono::{DateTime, NaiveDate, TimeDelta, Utc};

use crate::{AppError, AppResult};

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Current instant at the millisecond precision the store persists.
pub fn now() -> DateTime<Utc> {
    from_ms(now_ms()).unwrap_or_else(|_| Utc::now())
}

pub fn to_ms(at: &DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub fn from_ms(ms: i64) -> AppResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or_else(|| {
        AppError::new("TIME/OUT_OF_RANGE", "Timestamp out of range")
            .with_context("ms", ms.to_string())
    })
}

pub fn opt_from_ms(ms: Option<i64>) -> AppResult<Option<DateTime<Utc>>> {
    ms.map(from_ms).transpose()
}

/// Calendar dates are stored as `YYYY-MM-DD` text.
pub fn parse_date(raw: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|err| {
        AppError::validation("DATE", "Invalid calendar date")
            .with_context("value", raw.to_string())
            .with_context("reason", err.to_string())
    })
}

pub fn opt_parse_date(raw: Option<String>) -> AppResult<Option<NaiveDate>> {
    raw.as_deref().map(parse_date).transpose()
}

pub fn format_date(date: &NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Whole days elapsed between `from` and `to`, truncating partial days.
pub fn days_between(from: &DateTime<Utc>, to: &DateTime<Utc>) -> i64 {
    (*to - *from).num_days()
}

/// `at` plus `days` whole days, saturating at the latest representable
/// instant. Negative counts are treated as zero.
pub fn add_days_saturating(at: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    TimeDelta::try_days(days.max(0))
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

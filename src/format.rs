use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde_json::Value;

/// `1000000` → `"1,000,000"`.
pub fn with_thousands_separators(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if value < 0 {
        grouped.push('-');
    }
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    grouped
}

/// Integers get separators, strings are printed bare, everything else as JSON.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Number(number) => number
            .as_i64()
            .map(with_thousands_separators)
            .unwrap_or_else(|| number.to_string()),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Accepts RFC 3339 timestamps and bare `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_server_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .map(|date| date.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|date| date.and_utc())
        })
}

/// Whole days from `from` to `to`, rounded down.
pub fn whole_days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_milliseconds().div_euclid(TimeDelta::days(1).num_milliseconds())
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

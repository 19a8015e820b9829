// Temporal Parsing and Rendering
//
// Canonical string forms:
//   TIMESTAMP  yyyy-MM-dd HH:mm:ss[.ffffff] UTC   (offset suffix under a non-UTC zone)
//   DATETIME   yyyy-MM-ddTHH:mm:ss[.ffffff]
//   DATE       yyyy-MM-dd
//   TIME       HH:mm:ss[.ffffff]
// Fractions keep microsecond precision, drop trailing zeros, and vanish when zero.

use std::str::FromStr;
use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};

use crate::types::error::{CoercionError, CoercionResult};
use crate::types::schema::FieldKind;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

fn malformed(kind: FieldKind, raw: &str, reason: impl ToString) -> CoercionError {
    CoercionError::Malformed {
        kind,
        raw: raw.to_string(),
        reason: reason.to_string(),
    }
}

/// Parse a raw TIMESTAMP cell.
///
/// Accepts integer epoch microseconds, decimal or scientific epoch seconds
/// (`1.40845203E9`), and the canonical textual form.
pub fn parse_timestamp(raw: &str) -> CoercionResult<DateTime<Utc>> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix('-').unwrap_or(trimmed);
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        let micros = trimmed
            .parse::<i64>()
            .map_err(|e| malformed(FieldKind::Timestamp, raw, e))?;
        return DateTime::<Utc>::from_timestamp_micros(micros)
            .ok_or_else(|| malformed(FieldKind::Timestamp, raw, "out of range"));
    }

    if let Ok(seconds) = BigDecimal::from_str(trimmed) {
        let micros = (seconds * BigDecimal::from(1_000_000))
            .round(0)
            .to_i64()
            .ok_or_else(|| malformed(FieldKind::Timestamp, raw, "out of range"))?;
        return DateTime::<Utc>::from_timestamp_micros(micros)
            .ok_or_else(|| malformed(FieldKind::Timestamp, raw, "out of range"));
    }

    parse_timestamp_text(trimmed).ok_or_else(|| malformed(FieldKind::Timestamp, raw, "unrecognised timestamp"))
}

fn parse_timestamp_text(text: &str) -> Option<DateTime<Utc>> {
    if let Some(naive_text) = text.strip_suffix(" UTC") {
        return DATETIME_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(naive_text, fmt).ok())
            .map(|naive| naive.and_utc());
    }
    DateTime::parse_from_rfc3339(text)
        .or_else(|_| DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f %:z"))
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

pub fn parse_datetime(raw: &str) -> CoercionResult<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw.trim(), fmt).ok())
        .ok_or_else(|| malformed(FieldKind::Datetime, raw, "expected yyyy-MM-ddTHH:mm:ss[.ffffff]"))
}

pub fn parse_date(raw: &str) -> CoercionResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).map_err(|e| malformed(FieldKind::Date, raw, e))
}

pub fn parse_time(raw: &str) -> CoercionResult<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), TIME_FORMAT).map_err(|e| malformed(FieldKind::Time, raw, e))
}

/// Render `.ffffff` with trailing zeros removed, or nothing for whole seconds
fn fraction(time: &NaiveTime) -> String {
    let micros = (time.nanosecond() % 1_000_000_000) / 1_000;
    if micros == 0 {
        return String::new();
    }
    let padded = format!(".{:06}", micros);
    padded.trim_end_matches('0').to_string()
}

fn clock(time: &NaiveTime) -> String {
    format!("{}{}", time.format("%H:%M:%S"), fraction(time))
}

/// Render an instant at the reporting offset
pub fn format_timestamp(ts: &DateTime<Utc>, offset: &FixedOffset) -> String {
    let local = ts.with_timezone(offset).naive_local();
    let suffix = if offset.local_minus_utc() == 0 {
        "UTC".to_string()
    } else {
        offset.to_string()
    };
    format!("{} {} {}", local.format(DATE_FORMAT), clock(&local.time()), suffix)
}

pub fn format_datetime(dt: &NaiveDateTime) -> String {
    format!("{}T{}", dt.format(DATE_FORMAT), clock(&dt.time()))
}

pub fn format_date(date: &NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn format_time(time: &NaiveTime) -> String {
    clock(time)
}

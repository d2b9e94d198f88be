//! Snowflake type mappings.
//!
//! The SQL API returns every cell in `jsonv2` format as a string (or null).
//! This module turns those strings into JSON values according to the column's
//! Snowflake type.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. One decoder per category handles the actual value conversion

use crate::models::ColumnMetadata;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, SecondsFormat};
use serde_json::Value as JsonValue;

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for Snowflake column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Decimal,
    Float,
    Boolean,
    Date,
    Time,
    /// Wall-clock timestamp without zone (`timestamp_ntz`)
    Timestamp,
    /// Instant rendered in UTC (`timestamp_ltz`)
    TimestampUtc,
    /// Instant with its own offset (`timestamp_tz`)
    TimestampTz,
    Binary,
    Json,
    Text,
}

/// Classify a Snowflake result type into a logical category.
///
/// `fixed` columns are integers only when their scale is 0.
pub fn categorize_type(type_name: &str, scale: Option<i64>) -> TypeCategory {
    match type_name.to_lowercase().as_str() {
        "fixed" => match scale {
            Some(s) if s > 0 => TypeCategory::Decimal,
            _ => TypeCategory::Integer,
        },
        "real" => TypeCategory::Float,
        "boolean" => TypeCategory::Boolean,
        "date" => TypeCategory::Date,
        "time" => TypeCategory::Time,
        "timestamp_ntz" => TypeCategory::Timestamp,
        "timestamp_ltz" => TypeCategory::TimestampUtc,
        "timestamp_tz" => TypeCategory::TimestampTz,
        "binary" => TypeCategory::Binary,
        "variant" | "object" | "array" => TypeCategory::Json,
        // text, geography, geometry, vector and anything newer
        _ => TypeCategory::Text,
    }
}

// =============================================================================
// Value Decoding
// =============================================================================

/// Decode one `jsonv2` cell for the given column.
///
/// Values that do not parse as their declared type are returned as the raw
/// string rather than dropped.
pub fn decode_value(raw: Option<&str>, column: &ColumnMetadata) -> JsonValue {
    let Some(raw) = raw else {
        return JsonValue::Null;
    };

    let decoded = match categorize_type(&column.type_name, column.scale) {
        TypeCategory::Integer => decode_integer(raw),
        TypeCategory::Decimal => Some(JsonValue::String(raw.to_string())),
        TypeCategory::Float => decode_float(raw),
        TypeCategory::Boolean => decode_boolean(raw),
        TypeCategory::Date => decode_date(raw),
        TypeCategory::Time => decode_time(raw),
        TypeCategory::Timestamp => decode_timestamp_ntz(raw),
        TypeCategory::TimestampUtc => decode_timestamp_ltz(raw),
        TypeCategory::TimestampTz => decode_timestamp_tz(raw),
        TypeCategory::Binary => decode_hex(raw).map(|bytes| decode_binary_value(&bytes, true)),
        TypeCategory::Json => serde_json::from_str(raw).ok(),
        TypeCategory::Text => None,
    };

    decoded.unwrap_or_else(|| JsonValue::String(raw.to_string()))
}

/// Decode a whole row, aligned with `columns`.
///
/// Missing trailing cells decode as null.
pub fn decode_row(raw: &[Option<String>], columns: &[ColumnMetadata]) -> Vec<JsonValue> {
    columns
        .iter()
        .enumerate()
        .map(|(idx, column)| decode_value(raw.get(idx).and_then(|v| v.as_deref()), column))
        .collect()
}

fn decode_integer(raw: &str) -> Option<JsonValue> {
    // NUMBER(38,0) can exceed i64; the raw digits are kept in that case
    if let Ok(v) = raw.parse::<i64>() {
        return Some(JsonValue::Number(v.into()));
    }
    if let Ok(v) = raw.parse::<u64>() {
        return Some(JsonValue::Number(v.into()));
    }
    None
}

fn decode_float(raw: &str) -> Option<JsonValue> {
    raw.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(JsonValue::Number)
}

fn decode_boolean(raw: &str) -> Option<JsonValue> {
    match raw.to_lowercase().as_str() {
        "true" | "1" => Some(JsonValue::Bool(true)),
        "false" | "0" => Some(JsonValue::Bool(false)),
        _ => None,
    }
}

/// Days since 1970-01-01 from the common era.
const UNIX_EPOCH_DAYS_FROM_CE: i64 = 719_163;

fn decode_date(raw: &str) -> Option<JsonValue> {
    let days: i64 = raw.parse().ok()?;
    let ce_days = i32::try_from(days + UNIX_EPOCH_DAYS_FROM_CE).ok()?;
    let date = NaiveDate::from_num_days_from_ce_opt(ce_days)?;
    Some(JsonValue::String(date.format("%Y-%m-%d").to_string()))
}

fn decode_time(raw: &str) -> Option<JsonValue> {
    let (secs, nanos) = parse_epoch(raw)?;
    let secs = u32::try_from(secs).ok()?;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)?;
    Some(JsonValue::String(time.to_string()))
}

fn decode_timestamp_ntz(raw: &str) -> Option<JsonValue> {
    let (secs, nanos) = parse_epoch(raw)?;
    let ts = DateTime::from_timestamp(secs, nanos)?.naive_utc();
    Some(JsonValue::String(
        ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
    ))
}

fn decode_timestamp_ltz(raw: &str) -> Option<JsonValue> {
    let (secs, nanos) = parse_epoch(raw)?;
    let ts = DateTime::from_timestamp(secs, nanos)?;
    Some(JsonValue::String(
        ts.to_rfc3339_opts(SecondsFormat::AutoSi, true),
    ))
}

/// `timestamp_tz` arrives as `"<epoch>.<fraction> <offset minutes + 1440>"`.
fn decode_timestamp_tz(raw: &str) -> Option<JsonValue> {
    let (epoch, offset) = match raw.split_once(' ') {
        Some((epoch, encoded)) => {
            let minutes: i32 = encoded.trim().parse().ok()?;
            (epoch, FixedOffset::east_opt((minutes - 1440) * 60)?)
        }
        None => (raw, FixedOffset::east_opt(0)?),
    };

    let (secs, nanos) = parse_epoch(epoch)?;
    let ts = DateTime::from_timestamp(secs, nanos)?.with_timezone(&offset);
    Some(JsonValue::String(
        ts.to_rfc3339_opts(SecondsFormat::AutoSi, false),
    ))
}

/// Parse `"[-]seconds[.fraction]"` into whole seconds and nanoseconds,
/// flooring negative values so that nanoseconds stay non-negative.
fn parse_epoch(raw: &str) -> Option<(i64, u32)> {
    let raw = raw.trim();
    let (negative, body) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };
    let (whole, fraction) = body.split_once('.').unwrap_or((body, ""));
    let whole: i64 = whole.parse().ok()?;
    let nanos = fraction_to_nanos(fraction)?;

    match (negative, nanos) {
        (false, _) => Some((whole, nanos)),
        (true, 0) => Some((-whole, 0)),
        (true, _) => Some((-whole - 1, 1_000_000_000 - nanos)),
    }
}

fn fraction_to_nanos(fraction: &str) -> Option<u32> {
    if fraction.is_empty() {
        return Some(0);
    }
    if !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let digits: String = fraction.chars().take(9).collect();
    format!("{digits:0<9}").parse().ok()
}

// =============================================================================
// Binary Encoding
// =============================================================================

fn decode_hex(raw: &str) -> Option<Vec<u8>> {
    if raw.len() % 2 != 0 {
        return None;
    }
    raw.as_bytes()
        .chunks(2)
        .map(|pair| {
            let pair = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(pair, 16).ok()
        })
        .collect()
}

/// Decode binary data to JSON value.
///
/// If `decode_binary` is true, attempts to decode as UTF-8 text first.
/// Falls back to base64 encoding if not valid UTF-8 or if `decode_binary` is false.
pub fn decode_binary_value(bytes: &[u8], decode_binary: bool) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    if decode_binary {
        match std::str::from_utf8(bytes) {
            Ok(s) => JsonValue::String(s.to_string()),
            Err(_) => JsonValue::String(STANDARD.encode(bytes)),
        }
    } else {
        JsonValue::String(STANDARD.encode(bytes))
    }
}

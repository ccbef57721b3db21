//! Defensive value coercion.
//!
//! Every parser here returns `None` instead of failing: loosely-typed
//! source payloads must never abort a mapping.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::Value;

use super::field::FieldKind;
use crate::identity::{normalize_email, phone_digits};

/// Epoch values above this are taken as milliseconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d", "%d-%m-%Y", "%d.%m.%Y"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

/// Whether a value carries no information.
#[must_use]
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Coerce a non-blank source value into the canonical representation of `kind`.
///
/// Numeric kinds fall back to zero on placeholders; every other kind falls
/// back to `Value::Null`.
#[must_use]
pub fn coerce(kind: FieldKind, value: &Value) -> Value {
    match kind {
        FieldKind::Text => as_text(value).map_or(Value::Null, Value::String),
        FieldKind::Email => as_text(value)
            .and_then(|s| normalize_email(&s))
            .map_or(Value::Null, Value::String),
        FieldKind::Phone => as_text(value)
            .map(|s| phone_digits(&s))
            .filter(|digits| !digits.is_empty())
            .map_or(Value::Null, Value::String),
        FieldKind::Date => parse_date(value)
            .map_or(Value::Null, |d| Value::String(d.format("%Y-%m-%d").to_string())),
        FieldKind::DateTime => parse_datetime(value).map_or(Value::Null, |dt| {
            Value::String(format_instant(&dt))
        }),
        FieldKind::Number => parse_number(value)
            .and_then(serde_json::Number::from_f64)
            .map_or_else(|| Value::from(0.0), Value::Number),
        FieldKind::Integer => Value::from(parse_integer(value).unwrap_or(0)),
        FieldKind::Boolean => parse_bool(value).map_or(Value::Null, Value::Bool),
        FieldKind::Json => value.clone(),
    }
}

/// Canonical text form of an instant.
#[must_use]
pub fn format_instant(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Render a scalar as trimmed text. Composite values render as compact JSON.
#[must_use]
pub fn as_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

/// Parse an instant; naive timestamps are taken as UTC.
#[must_use]
pub fn parse_datetime(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(from_epoch),
        Value::String(s) => parse_datetime_str(s.trim()),
        _ => None,
    }
}

fn parse_datetime_str(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    if let Some(date) = parse_date_str(s) {
        return date.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive));
    }

    s.parse::<i64>().ok().and_then(from_epoch)
}

fn from_epoch(value: i64) -> Option<DateTime<Utc>> {
    if value <= 0 {
        return None;
    }
    if value >= EPOCH_MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(value)
    } else {
        DateTime::from_timestamp(value, 0)
    }
}

/// Parse a calendar date, truncating any time component.
///
/// A leading `YYYY-MM-DD` is taken as written, without shifting to UTC.
#[must_use]
pub fn parse_date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            parse_date_str(s)
                .or_else(|| s.get(..10).and_then(parse_date_str))
                .or_else(|| parse_datetime_str(s).map(|dt| dt.date_naive()))
        }
        Value::Number(_) => parse_datetime(value).map(|dt| dt.date_naive()),
        _ => None,
    }
}

fn parse_date_str(s: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(s, format).ok())
}

/// Parse a decimal number. Accepts `1234.5`, `1.234,56`, `1,234.56`, `R$ 99,90`.
#[must_use]
pub fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_number_str(s),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

fn parse_number_str(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches("R$")
        .trim_start_matches('$')
        .trim_end_matches('%')
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let last_dot = cleaned.rfind('.');
    let last_comma = cleaned.rfind(',');

    let normalized = match (last_dot, last_comma) {
        (Some(dot), Some(comma)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (None, Some(_)) if cleaned.matches(',').count() == 1 => cleaned.replace(',', "."),
        (None, Some(_)) => cleaned.replace(',', ""),
        (Some(_), None) if cleaned.matches('.').count() > 1 => cleaned.replace('.', ""),
        _ => cleaned,
    };

    normalized.parse::<f64>().ok()
}

/// Parse an integer, truncating any fractional part.
#[must_use]
pub fn parse_integer(value: &Value) -> Option<i64> {
    if let Value::Number(n) = value {
        if let Some(i) = n.as_i64() {
            return Some(i);
        }
    }
    if let Value::String(s) = value {
        if let Ok(i) = s.trim().parse::<i64>() {
            return Some(i);
        }
    }
    parse_number(value)
        .filter(|n| n.abs() < i64::MAX as f64)
        .map(|n| n.trunc() as i64)
}

/// Parse a boolean flag, including common Portuguese spellings.
#[must_use]
pub fn parse_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "t" | "1" | "yes" | "y" | "sim" | "s" => Some(true),
            "false" | "f" | "0" | "no" | "n" | "não" | "nao" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

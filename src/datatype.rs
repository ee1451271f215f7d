// used for date values, now() and date-range()
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
// used to recognise numbers the way a lenient float parser would
use regex::Regex;
// so regular expressions don't have to be recompiled
use lazy_static::lazy_static;
// used to print out readable forms of a data type
use std::fmt;
// used when parsing a value type tag
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

lazy_static! {
    static ref LEADING_FLOAT: Regex =
        Regex::new(r"^[+-]?(Infinity|(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?)").unwrap();
    static ref WHOLE_NUMBER: Regex =
        Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?$").unwrap();
    static ref YEAR: Regex = Regex::new(r"^(-?\d{1,4})$").unwrap();
    static ref YEAR_MONTH: Regex = Regex::new(r"^(-?\d{1,4})-(\d{1,2})$").unwrap();
}

// ------------- Value types -------------
/// The value type tag carried by properties and evaluation results.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ValueType {
    #[default]
    Text,
    Number,
    Date,
    Boolean,
    Url,
    Item,
    Currency,
    Image,
    Other(String),
}

impl ValueType {
    pub fn as_str(&self) -> &str {
        match self {
            ValueType::Text => "text",
            ValueType::Number => "number",
            ValueType::Date => "date",
            ValueType::Boolean => "boolean",
            ValueType::Url => "url",
            ValueType::Item => "item",
            ValueType::Currency => "currency",
            ValueType::Image => "image",
            ValueType::Other(tag) => tag,
        }
    }
    pub fn is_numeric(&self) -> bool {
        matches!(self, ValueType::Number | ValueType::Currency)
    }
}

impl FromStr for ValueType {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "text" => ValueType::Text,
            "number" => ValueType::Number,
            "date" => ValueType::Date,
            "boolean" => ValueType::Boolean,
            "url" => ValueType::Url,
            "item" => ValueType::Item,
            "currency" => ValueType::Currency,
            "image" => ValueType::Image,
            other => ValueType::Other(other.to_string()),
        })
    }
}
impl From<String> for ValueType {
    fn from(s: String) -> Self {
        match ValueType::from_str(&s) {
            Ok(value_type) => value_type,
            Err(never) => match never {},
        }
    }
}
impl From<&str> for ValueType {
    fn from(s: &str) -> Self {
        ValueType::from(s.to_string())
    }
}
impl From<ValueType> for String {
    fn from(value_type: ValueType) -> String {
        value_type.as_str().to_string()
    }
}
impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ------------- Numbers -------------
/// Parses the longest numeric prefix of `s`, yielding NaN when there is none.
pub fn parse_float(s: &str) -> f64 {
    let trimmed = s.trim_start();
    match LEADING_FLOAT.find(trimmed) {
        Some(m) => {
            let text = m.as_str();
            if text.ends_with("Infinity") {
                if text.starts_with('-') { f64::NEG_INFINITY } else { f64::INFINITY }
            } else {
                text.parse::<f64>().unwrap_or(f64::NAN)
            }
        }
        None => f64::NAN,
    }
}

/// Parses `s` only when the whole (trimmed) text is a number.
pub fn parse_number(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    if WHOLE_NUMBER.is_match(trimmed) {
        trimmed.parse::<f64>().ok()
    } else {
        None
    }
}

/// Canonical text form of a number: integral values print without a
/// fraction so that `7.0` and `7` are the same set key.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() }
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        if n == 0.0 { "0".to_string() } else { format!("{:.0}", n) }
    } else {
        format!("{}", n)
    }
}

// ------------- Dates -------------
/// Parses an ISO 8601 date or date-time into milliseconds since the epoch.
/// Values without an offset are taken as UTC.
pub fn parse_iso8601(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&naive).timestamp_millis());
        }
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%dT%H:%M:%S%z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, format) {
            return Some(dt.timestamp_millis());
        }
    }
    let date = if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        Some(date)
    } else if let Some(captures) = YEAR_MONTH.captures(s) {
        let year = captures[1].parse::<i32>().ok()?;
        let month = captures[2].parse::<u32>().ok()?;
        NaiveDate::from_ymd_opt(year, month, 1)
    } else if let Some(captures) = YEAR.captures(s) {
        let year = captures[1].parse::<i32>().ok()?;
        NaiveDate::from_ymd_opt(year, 1, 1)
    } else {
        None
    };
    date.and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive).timestamp_millis())
}

pub fn format_iso8601(millis: i64) -> Option<String> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
}

// ------------- Coercion -------------
/// Text form of a scalar JSON value as stored in the triple indexes.
/// Nested structures are kept as their JSON text; `null` has no value.
pub fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(u)) => u.to_string(),
            _ => format_number(n.as_f64().unwrap_or(f64::NAN)),
        }),
        other => Some(other.to_string()),
    }
}

/// Truthiness of a single evaluated value given the type of its collection.
pub fn is_truthy(value: &str, value_type: &ValueType) -> bool {
    match value_type {
        ValueType::Boolean => value == "true",
        ValueType::Number | ValueType::Currency => {
            let n = parse_float(value);
            !n.is_nan() && n != 0.0
        }
        _ => !value.is_empty() && value != "false",
    }
}

pub fn boolean_text(b: bool) -> String {
    if b { "true".to_string() } else { "false".to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lenient_float_parsing() {
        assert_eq!(parse_float("30"), 30.0);
        assert_eq!(parse_float("  2.5kg"), 2.5);
        assert_eq!(parse_float("-Infinity"), f64::NEG_INFINITY);
        assert!(parse_float("abc").is_nan());
        assert_eq!(parse_number("2.5kg"), None);
        assert_eq!(parse_number(" 12 "), Some(12.0));
    }

    #[test]
    fn canonical_numbers() {
        assert_eq!(format_number(7.0), "7");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(value_to_text(&serde_json::json!(30)), Some("30".to_string()));
        assert_eq!(value_to_text(&serde_json::json!(30.5)), Some("30.5".to_string()));
        assert_eq!(value_to_text(&serde_json::json!(null)), None);
    }

    #[test]
    fn iso8601_variants() {
        let day = parse_iso8601("2004-06-19").unwrap();
        assert_eq!(parse_iso8601("2004-06-19T00:00:00Z"), Some(day));
        assert_eq!(parse_iso8601("2004-06-19T02:00:00+02:00"), Some(day));
        assert_eq!(parse_iso8601("2004-06-19T00:00:00"), Some(day));
        assert_eq!(parse_iso8601("2004-06"), parse_iso8601("2004-06-01"));
        assert_eq!(parse_iso8601("2004"), parse_iso8601("2004-01-01"));
        assert_eq!(parse_iso8601("someday"), None);
        assert_eq!(format_iso8601(day).unwrap(), "2004-06-19T00:00:00Z");
    }

    #[test]
    fn value_type_tags() {
        assert_eq!(ValueType::from("number"), ValueType::Number);
        assert_eq!(ValueType::from("list"), ValueType::Other("list".to_string()));
        assert_eq!(ValueType::Item.to_string(), "item");
        assert!(is_truthy("true", &ValueType::Boolean));
        assert!(!is_truthy("false", &ValueType::Boolean));
        assert!(!is_truthy("0", &ValueType::Number));
        assert!(is_truthy("0", &ValueType::Text));
    }
}

//! The built-in function table. Functions receive fully evaluated
//! argument collections; the set of names is closed.

use chrono::Utc;

use super::evaluate::{ValueCollection, Values};
use crate::datatype::{boolean_text, format_iso8601, format_number, is_truthy, parse_float, parse_iso8601, ValueType};
use crate::error::{ExhibitError, Result};
use crate::set::Set;

pub type Function = fn(&[ValueCollection]) -> Result<ValueCollection>;

pub const NAMES: &[&str] = &[
    "union", "contains", "exists", "count", "not", "and", "or", "add", "concat", "multiply", "min", "max",
    "remove", "now", "date-range", "distance",
];

pub fn lookup(name: &str) -> Option<Function> {
    Some(match name {
        "union" => union,
        "contains" => contains,
        "exists" => exists,
        "count" => count,
        "not" => not,
        "and" => and,
        "or" => or,
        "add" => add,
        "concat" => concat,
        "multiply" => multiply,
        "min" => min,
        "max" => max,
        "remove" => remove,
        "now" => now,
        "date-range" => date_range,
        "distance" => distance,
        _ => return None,
    })
}

fn numbers(args: &[ValueCollection]) -> impl Iterator<Item = f64> + '_ {
    args.iter().flat_map(|arg| arg.iter()).map(parse_float).filter(|n| !n.is_nan())
}

fn first_text(args: &[ValueCollection], index: usize) -> Option<&str> {
    args.get(index).and_then(ValueCollection::first)
}

// JavaScript style rounding, halves go up
fn round(n: f64) -> f64 {
    (n + 0.5).floor()
}

fn union(args: &[ValueCollection]) -> Result<ValueCollection> {
    let mut set = Set::new();
    for arg in args {
        set.extend(arg.iter());
    }
    let value_type = args.first().map(|arg| arg.value_type.clone()).unwrap_or_default();
    Ok(ValueCollection::set(set, value_type))
}

/// True when the first argument holds any value of the second.
fn contains(args: &[ValueCollection]) -> Result<ValueCollection> {
    let found = match (args.first(), args.get(1)) {
        (Some(haystack), Some(needles)) => needles.iter().any(|needle| haystack.contains(needle)),
        _ => false,
    };
    Ok(ValueCollection::single(boolean_text(found), ValueType::Boolean))
}

fn exists(args: &[ValueCollection]) -> Result<ValueCollection> {
    let found = args.first().is_some_and(|arg| arg.size() > 0);
    Ok(ValueCollection::single(boolean_text(found), ValueType::Boolean))
}

fn count(args: &[ValueCollection]) -> Result<ValueCollection> {
    let size = args.first().map(ValueCollection::size).unwrap_or(0);
    Ok(ValueCollection::single(size.to_string(), ValueType::Number))
}

fn not(args: &[ValueCollection]) -> Result<ValueCollection> {
    let values = match args.first() {
        Some(arg) => arg.iter().map(|value| boolean_text(!is_truthy(value, &arg.value_type))).collect(),
        None => Vec::new(),
    };
    Ok(ValueCollection::list(values, ValueType::Boolean))
}

fn and(args: &[ValueCollection]) -> Result<ValueCollection> {
    let all = args.iter().all(|arg| arg.iter().all(|value| is_truthy(value, &arg.value_type)));
    Ok(ValueCollection::single(boolean_text(all), ValueType::Boolean))
}

fn or(args: &[ValueCollection]) -> Result<ValueCollection> {
    let any = args.iter().any(|arg| arg.iter().any(|value| is_truthy(value, &arg.value_type)));
    Ok(ValueCollection::single(boolean_text(any), ValueType::Boolean))
}

fn add(args: &[ValueCollection]) -> Result<ValueCollection> {
    Ok(ValueCollection::single(format_number(numbers(args).sum()), ValueType::Number))
}

fn concat(args: &[ValueCollection]) -> Result<ValueCollection> {
    let values = args.iter().flat_map(|arg| arg.iter().map(str::to_string)).collect();
    Ok(ValueCollection::list(values, ValueType::Text))
}

fn multiply(args: &[ValueCollection]) -> Result<ValueCollection> {
    Ok(ValueCollection::single(format_number(numbers(args).product()), ValueType::Number))
}

fn min(args: &[ValueCollection]) -> Result<ValueCollection> {
    Ok(match numbers(args).reduce(f64::min) {
        Some(n) => ValueCollection::single(format_number(n), ValueType::Number),
        None => ValueCollection::empty(ValueType::Number),
    })
}

fn max(args: &[ValueCollection]) -> Result<ValueCollection> {
    Ok(match numbers(args).reduce(f64::max) {
        Some(n) => ValueCollection::single(format_number(n), ValueType::Number),
        None => ValueCollection::empty(ValueType::Number),
    })
}

/// The first argument without any value of the remaining ones.
fn remove(args: &[ValueCollection]) -> Result<ValueCollection> {
    let Some((kept, removed)) = args.split_first() else {
        return Ok(ValueCollection::empty(ValueType::Text));
    };
    let keep = |value: &str| !removed.iter().any(|arg| arg.contains(value));
    let values = match &kept.values {
        Values::Set(set) => Values::Set(set.iter().filter(|v| keep(v)).collect()),
        Values::List(list) => Values::List(list.iter().filter(|v| keep(v)).cloned().collect()),
    };
    Ok(ValueCollection { values, value_type: kept.value_type.clone() })
}

fn now(_args: &[ValueCollection]) -> Result<ValueCollection> {
    let stamp = format_iso8601(Utc::now().timestamp_millis())
        .ok_or_else(|| ExhibitError::Evaluation("now() is outside the calendar".into()))?;
    Ok(ValueCollection::single(stamp, ValueType::Date))
}

fn unit_factor(unit: &str) -> Option<f64> {
    Some(match unit {
        "second" => 1_000.0,
        "minute" => 60_000.0,
        "hour" => 3_600_000.0,
        "day" => 86_400_000.0,
        "week" => 604_800_000.0,
        "month" => 2_629_743_830.0,
        "quarter" => 7_889_231_490.0,
        "year" => 31_556_926_000.0,
        "decade" => 315_569_260_000.0,
        "century" => 3_155_692_600_000.0,
        _ => return None,
    })
}

/// `date-range(from, to, unit)`: the rounded distance between two dates in
/// the unit, or in milliseconds for an unknown unit.
fn date_range(args: &[ValueCollection]) -> Result<ValueCollection> {
    let from = first_text(args, 0).and_then(parse_iso8601);
    let to = first_text(args, 1).and_then(parse_iso8601);
    let (Some(from), Some(to)) = (from, to) else {
        return Ok(ValueCollection::empty(ValueType::Number));
    };
    let mut range = (to - from) as f64;
    if let Some(factor) = first_text(args, 2).and_then(unit_factor) {
        range = round(range / factor);
    }
    Ok(ValueCollection::single(format_number(range), ValueType::Number))
}

const EARTH_RADIUS_METRES: f64 = 6_378_137.0;

/// `distance(origin, lat, lng, unit, round)` where origin is `"lat,lng"`.
fn distance(args: &[ValueCollection]) -> Result<ValueCollection> {
    let origin = first_text(args, 0).ok_or_else(|| ExhibitError::Evaluation("distance() needs an origin".into()))?;
    let mut parts = origin.split(',').map(parse_float);
    let (Some(lat1), Some(lng1)) = (parts.next(), parts.next()) else {
        return Err(ExhibitError::Evaluation(format!("distance() origin {} is not \"lat,lng\"", origin)));
    };
    let lat2 = first_text(args, 1).map(parse_float).unwrap_or(f64::NAN);
    let lng2 = first_text(args, 2).map(parse_float).unwrap_or(f64::NAN);
    if [lat1, lng1, lat2, lng2].iter().any(|n| n.is_nan()) {
        return Ok(ValueCollection::empty(ValueType::Number));
    }
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lng2 - lng1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let metres = 2.0 * a.sqrt().asin() * EARTH_RADIUS_METRES;
    let factor = match first_text(args, 3) {
        Some("km") => 1e3,
        Some("mile") => 1609.344,
        _ => 1.0,
    };
    let round_to = first_text(args, 4).map(parse_float).filter(|n| n.is_finite() && *n > 0.0).unwrap_or(1.0);
    let distance = round(metres / factor / round_to) * round_to;
    Ok(ValueCollection::single(format_number(distance), ValueType::Number))
}

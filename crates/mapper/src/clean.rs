//! Payload cleaning: turns a nested property bag into the flat key/value
//! shape the destination accepts.
//!
//! A first pass recognises ISO-8601 date strings anywhere in the tree. The
//! cleaning pass then drops nulls, turns dates into unix seconds, stringifies
//! scalars, comma-joins arrays, and flattens nested mappings into dot-path
//! keys (`address.city`). Literal top-level keys are written before any
//! flattened key, and a flattened key that would overwrite an existing one is
//! dropped.

use std::sync::OnceLock;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use kissmetrics_core::types::Properties;
use regex_lite::Regex;
use serde_json::{Number, Value};
use tracing::debug;

use crate::payload::{Payload, PayloadValue};

/// A property value after date normalization.
enum Node {
    Absent,
    Date(DateTime<Utc>),
    Text(String),
    Map(Vec<(String, Node)>),
}

impl Node {
    fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => Node::Absent,
            Value::String(s) => match parse_iso_date(s) {
                Some(date) => Node::Date(date),
                None => Node::Text(s.clone()),
            },
            Value::Bool(b) => Node::Text(b.to_string()),
            Value::Number(n) => Node::Text(number_text(n)),
            Value::Array(items) => Node::Text(join_array(items)),
            Value::Object(map) => Node::Map(
                map.iter()
                    .map(|(key, value)| (key.clone(), Node::from_value(value)))
                    .collect(),
            ),
        }
    }
}

/// Flatten `bag` into a destination payload.
pub fn clean(bag: &Properties) -> Payload {
    let mut out = Payload::new();
    let mut nested = Vec::new();

    for (key, value) in bag {
        match Node::from_value(value) {
            Node::Absent => {}
            Node::Date(date) => out.insert(key.clone(), unix_time(date)),
            Node::Text(text) => out.insert(key.clone(), text),
            Node::Map(children) => nested.push((key.as_str(), children)),
        }
    }

    for (key, children) in nested {
        flatten_into(&mut out, key, children);
    }

    out
}

fn flatten_into(out: &mut Payload, prefix: &str, children: Vec<(String, Node)>) {
    for (key, node) in children {
        let path = format!("{prefix}.{key}");
        let value = match node {
            Node::Absent => continue,
            Node::Date(date) => PayloadValue::Integer(unix_time(date)),
            Node::Text(text) => PayloadValue::Text(text),
            Node::Map(grandchildren) => {
                flatten_into(out, &path, grandchildren);
                continue;
            }
        };
        if !out.insert_vacant(path.as_str(), value) {
            debug!(key = %path, "flattened property collides with an existing key, dropped");
        }
    }
}

/// Comma-join array elements. Nested arrays join recursively, nulls render
/// empty and objects render as compact JSON.
fn join_array(items: &[Value]) -> String {
    items
        .iter()
        .map(|item| match item {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            Value::Number(n) => number_text(n),
            Value::Array(inner) => join_array(inner),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Whole-valued floats render without a fraction (`19.0` as `19`).
fn number_text(n: &Number) -> String {
    match n.as_f64() {
        Some(value) if n.is_f64() => PayloadValue::number(value).to_string(),
        _ => n.to_string(),
    }
}

/// Whole seconds since the unix epoch.
pub fn unix_time(date: DateTime<Utc>) -> i64 {
    date.timestamp()
}

// YYYY-MM-DD, then optionally a `T` or space, HH:MM with optional seconds and
// fraction, then optionally `Z` or an HH / HH:MM / HHMM offset.
const ISO_DATE: &str = r"^(\d{4})-(\d{2})-(\d{2})(?:[ T](\d{2}):?(\d{2})(?::?(\d{2})(?:[,.](\d+))?)?(Z|([+-])(\d{2})(?::?(\d{2}))?)?)?$";

fn iso_date_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(ISO_DATE).ok()).as_ref()
}

/// Recognise an ISO-8601 date or date-time string. Strings without an offset
/// are read as UTC.
pub fn parse_iso_date(s: &str) -> Option<DateTime<Utc>> {
    let caps = iso_date_pattern()?.captures(s)?;
    let field = |i: usize| -> Option<u32> {
        caps.get(i).map_or(Some(0), |m| m.as_str().parse().ok())
    };

    let date = NaiveDate::from_ymd_opt(i32::try_from(field(1)?).ok()?, field(2)?, field(3)?)?;
    let nanos = match caps.get(7) {
        Some(fraction) => {
            let digits = &fraction.as_str()[..fraction.as_str().len().min(9)];
            format!("{digits:0<9}").parse().ok()?
        }
        None => 0,
    };
    let time = NaiveTime::from_hms_nano_opt(field(4)?, field(5)?, field(6)?, nanos)?;

    let offset_secs = match caps.get(9) {
        Some(sign) => {
            let secs = i32::try_from(field(10)? * 3600 + field(11)? * 60).ok()?;
            if sign.as_str() == "-" {
                -secs
            } else {
                secs
            }
        }
        None => 0,
    };
    let offset = FixedOffset::east_opt(offset_secs)?;

    offset
        .from_local_datetime(&date.and_time(time))
        .single()
        .map(|date| date.with_timezone(&Utc))
}

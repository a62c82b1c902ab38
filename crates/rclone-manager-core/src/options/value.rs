//! Typed option values and string coercion.
//!
//! Environment overrides arrive as strings. Each target field declares a
//! [`FieldType`], and [`coerce`] turns the raw string into an [`OptionValue`]
//! of that type using the same grammars rclone accepts on its command line.

use crate::error::{ManagerError, Result};
use serde::{Serialize, Serializer};
use std::fmt;

const NANOS_PER_MILLI: i64 = 1_000_000;
const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Declared type of an option field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Integer,
    Float,
    Bool,
    /// Byte count with an optional binary suffix.
    Size,
    /// Time span, stored in nanoseconds like rclone's JSON.
    Duration,
    String,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Bool => "bool",
            FieldType::Size => "size",
            FieldType::Duration => "duration",
            FieldType::String => "string",
        };
        f.write_str(name)
    }
}

/// A single option value.
///
/// `Size` is in bytes and `Duration` in nanoseconds; `-1` means "off" for both.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Size(i64),
    Duration(i64),
    String(String),
    /// Anything the daemon reports that has no scalar form (lists, objects, null).
    Other(serde_json::Value),
}

impl OptionValue {
    /// Type a value from the daemon's JSON, honouring a declared type when given.
    pub fn from_json(value: &serde_json::Value, declared: Option<FieldType>) -> Self {
        use serde_json::Value;

        match (value, declared) {
            (Value::Number(n), Some(FieldType::Size)) if n.is_i64() => {
                OptionValue::Size(n.as_i64().unwrap_or_default())
            }
            (Value::Number(n), Some(FieldType::Duration)) if n.is_i64() => {
                OptionValue::Duration(n.as_i64().unwrap_or_default())
            }
            (Value::Number(n), Some(FieldType::Float)) => {
                OptionValue::Float(n.as_f64().unwrap_or_default())
            }
            (Value::Bool(b), _) => OptionValue::Bool(*b),
            (Value::Number(n), _) => match n.as_i64() {
                Some(i) => OptionValue::Integer(i),
                None => OptionValue::Float(n.as_f64().unwrap_or_default()),
            },
            (Value::String(s), _) => OptionValue::String(s.clone()),
            (other, _) => OptionValue::Other(other.clone()),
        }
    }

    /// Field type implied by the value itself, if it has a scalar one.
    pub fn field_type(&self) -> Option<FieldType> {
        match self {
            OptionValue::Bool(_) => Some(FieldType::Bool),
            OptionValue::Integer(_) => Some(FieldType::Integer),
            OptionValue::Float(_) => Some(FieldType::Float),
            OptionValue::Size(_) => Some(FieldType::Size),
            OptionValue::Duration(_) => Some(FieldType::Duration),
            OptionValue::String(_) => Some(FieldType::String),
            OptionValue::Other(_) => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            OptionValue::Bool(b) => serde_json::Value::from(*b),
            OptionValue::Integer(i) | OptionValue::Size(i) | OptionValue::Duration(i) => {
                serde_json::Value::from(*i)
            }
            OptionValue::Float(f) => serde_json::Value::from(*f),
            OptionValue::String(s) => serde_json::Value::from(s.as_str()),
            OptionValue::Other(v) => v.clone(),
        }
    }

    /// Render as a command-line flag value.
    pub fn to_flag_value(&self) -> String {
        match self {
            OptionValue::Bool(b) => b.to_string(),
            OptionValue::Integer(i) => i.to_string(),
            OptionValue::Float(f) => f.to_string(),
            OptionValue::Size(bytes) if *bytes < 0 => "off".to_string(),
            OptionValue::Size(bytes) => format!("{}B", bytes),
            OptionValue::Duration(nanos) if *nanos < 0 => "off".to_string(),
            OptionValue::Duration(nanos) => format!("{}ms", nanos / NANOS_PER_MILLI),
            OptionValue::String(s) => s.clone(),
            OptionValue::Other(v) => v.to_string(),
        }
    }
}

impl Serialize for OptionValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Coerce a raw override string into a value of `field_type`.
pub fn coerce(field_type: FieldType, raw: &str) -> Result<OptionValue> {
    let trimmed = raw.trim();
    let invalid = || {
        ManagerError::validation(
            field_type.to_string(),
            format!("cannot interpret {:?} as a {}", raw, field_type),
        )
    };

    match field_type {
        FieldType::Integer => trimmed
            .parse::<i64>()
            .map(OptionValue::Integer)
            .map_err(|_| invalid()),
        FieldType::Float => trimmed
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(OptionValue::Float)
            .ok_or_else(invalid),
        FieldType::Bool => parse_bool(trimmed).map(OptionValue::Bool).ok_or_else(invalid),
        FieldType::Size => parse_size(trimmed).map(OptionValue::Size).ok_or_else(invalid),
        FieldType::Duration => parse_duration(trimmed)
            .map(OptionValue::Duration)
            .ok_or_else(invalid),
        FieldType::String => Ok(OptionValue::String(raw.to_string())),
    }
}

/// `true/false/1/0/yes/no/on/off`, case-insensitive.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a size in rclone's `SizeSuffix` grammar into bytes.
///
/// A bare number is KiB. Suffixes `B`, `K`, `M`, `G`, `T`, `P` are powers of
/// 1024 and may be followed by `i` or `iB`. `off` is `-1`.
pub fn parse_size(raw: &str) -> Option<i64> {
    let s = raw.trim();
    if s.eq_ignore_ascii_case("off") {
        return Some(-1);
    }

    let mut body = s;
    let lower = s.to_ascii_lowercase();
    if lower.ends_with("ib") {
        body = &s[..s.len() - 2];
    } else if lower.ends_with('i') {
        body = &s[..s.len() - 1];
    }

    let (number, multiplier) = match body.chars().last()? {
        c if c.is_ascii_digit() || c == '.' => (body, 1u64 << 10),
        c => {
            let shift = match c.to_ascii_uppercase() {
                'B' => 0,
                'K' => 10,
                'M' => 20,
                'G' => 30,
                'T' => 40,
                'P' => 50,
                _ => return None,
            };
            (&body[..body.len() - 1], 1u64 << shift)
        }
    };

    let value: f64 = number.trim().parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let bytes = value * multiplier as f64;
    if bytes >= i64::MAX as f64 {
        return None;
    }
    Some(bytes as i64)
}

/// Parse a duration into nanoseconds.
///
/// Accepts a bare number of seconds, or one or more `<number><unit>` terms
/// with units `ms`, `s`, `m`, `h`, `d` (e.g. `1h30m`). `off` is `-1`.
pub fn parse_duration(raw: &str) -> Option<i64> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if s.eq_ignore_ascii_case("off") {
        return Some(-1);
    }
    if let Ok(seconds) = s.parse::<f64>() {
        return scale(seconds, NANOS_PER_SECOND);
    }

    let mut total: i64 = 0;
    let mut rest = s;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return None;
        }
        let (number, tail) = rest.split_at(number_len);
        let unit_len = tail
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);

        let unit_nanos = match unit {
            "ms" => NANOS_PER_MILLI,
            "s" => NANOS_PER_SECOND,
            "m" => 60 * NANOS_PER_SECOND,
            "h" => 3_600 * NANOS_PER_SECOND,
            "d" => 86_400 * NANOS_PER_SECOND,
            _ => return None,
        };
        let value: f64 = number.parse().ok()?;
        total = total.checked_add(scale(value, unit_nanos)?)?;
        rest = tail;
    }
    Some(total)
}

fn scale(value: f64, unit_nanos: i64) -> Option<i64> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let nanos = value * unit_nanos as f64;
    if nanos >= i64::MAX as f64 {
        return None;
    }
    Some(nanos.round() as i64)
}

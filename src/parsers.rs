//! Time and level parsing strategies.
//!
//! Each strategy is a plain function so a schema can pick one by name and
//! copy it around freely.

use crate::record::{kind_of, Level};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

pub type TimeParser = fn(&Value) -> Result<DateTime<Utc>, String>;
pub type LevelParser = fn(&Value) -> Result<Level, String>;

/// Numbers as seconds since the epoch, RFC3339-ish strings, or
/// `{"seconds": .., "nanos": ..}` objects.
pub fn default_time(value: &Value) -> Result<DateTime<Utc>, String> {
    match value {
        Value::Number(_) => unix_seconds(value),
        Value::String(s) => parse_rfc3339(s).or_else(|_| {
            dateparser::parse(s).map_err(|e| format!("parse {:?} as time: {}", s, e))
        }),
        Value::Object(obj) => {
            let seconds = obj.get("seconds").and_then(Value::as_i64);
            let nanos = obj.get("nanos").and_then(Value::as_i64);
            if seconds.is_none() && nanos.is_none() {
                return Err("object time must contain integer seconds or nanos".to_string());
            }
            from_parts(seconds.unwrap_or(0), nanos.unwrap_or(0))
        }
        other => Err(format!("unsupported time value of type {}", kind_of(other))),
    }
}

/// Integer or float seconds since the epoch only.
pub fn unix_seconds(value: &Value) -> Result<DateTime<Utc>, String> {
    let Value::Number(n) = value else {
        return Err(format!("want number of seconds, got {}", kind_of(value)));
    };
    if let Some(secs) = n.as_i64() {
        return from_parts(secs, 0);
    }
    let float = n
        .as_f64()
        .ok_or_else(|| format!("number {} out of range", n))?;
    if !float.is_finite() {
        return Err(format!("number {} out of range", n));
    }
    let secs = float.floor();
    let nanos = ((float - secs) * 1e9).round() as i64;
    from_parts(secs as i64, nanos)
}

/// RFC3339 strings at any subsecond precision.
pub fn rfc3339(value: &Value) -> Result<DateTime<Utc>, String> {
    match value {
        Value::String(s) => parse_rfc3339(s),
        other => Err(format!("want RFC3339 string, got {}", kind_of(other))),
    }
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("parse {:?} as RFC3339: {}", s, e))
}

fn from_parts(secs: i64, nanos: i64) -> Result<DateTime<Utc>, String> {
    let carry = nanos.div_euclid(1_000_000_000);
    let nanos = nanos.rem_euclid(1_000_000_000) as u32;
    Utc.timestamp_opt(secs.saturating_add(carry), nanos)
        .single()
        .ok_or_else(|| format!("time {}s {}ns out of range", secs, nanos))
}

/// Level names, case-insensitively. Unrecognized names are `Unknown`.
pub fn level_names(value: &Value) -> Result<Level, String> {
    match value {
        Value::String(s) => Ok(level_from_name(&s.to_ascii_lowercase())),
        other => Err(format!("invalid {} for log level", kind_of(other))),
    }
}

/// Lowercase level names only; `"INFO"` is `Unknown`.
pub fn level_names_case_sensitive(value: &Value) -> Result<Level, String> {
    match value {
        Value::String(s) => Ok(level_from_name(s)),
        other => Err(format!("invalid {} for log level", kind_of(other))),
    }
}

fn level_from_name(name: &str) -> Level {
    match name {
        "trace" => Level::Trace,
        "debug" => Level::Debug,
        "info" => Level::Info,
        "warn" | "warning" => Level::Warn,
        "error" => Level::Error,
        "panic" => Level::Panic,
        "dpanic" => Level::DPanic,
        "fatal" => Level::Fatal,
        _ => Level::Unknown,
    }
}

/// Bunyan's numeric scale: 10 trace through 60 fatal.
pub fn bunyan_level(value: &Value) -> Result<Level, String> {
    Ok(match level_code(value)? {
        10 => Level::Trace,
        20 => Level::Debug,
        30 => Level::Info,
        40 => Level::Warn,
        50 => Level::Error,
        60 => Level::Fatal,
        _ => Level::Unknown,
    })
}

/// Lager's numeric scale: 0 debug, 1 info, 2 error, 3 fatal.
pub fn lager_level(value: &Value) -> Result<Level, String> {
    Ok(match level_code(value)? {
        0 => Level::Debug,
        1 => Level::Info,
        2 => Level::Error,
        3 => Level::Fatal,
        _ => Level::Unknown,
    })
}

fn level_code(value: &Value) -> Result<i64, String> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .ok_or_else(|| format!("invalid level code {}", n)),
        other => Err(format!("invalid {} for log level", kind_of(other))),
    }
}

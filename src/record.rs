use crate::error::{FieldError, ParseErrors};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Decoded fields of a record. Values are the JSON tagged union.
pub type Fields = Map<String, Value>;

/// Log severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    #[default]
    Unknown = 0,
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Panic,
    DPanic,
    Fatal,
}

impl Level {
    pub const ALL: [Level; 9] = [
        Level::Unknown,
        Level::Trace,
        Level::Debug,
        Level::Info,
        Level::Warn,
        Level::Error,
        Level::Panic,
        Level::DPanic,
        Level::Fatal,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Level::Unknown => "unknown",
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Panic => "panic",
            Level::DPanic => "dpanic",
            Level::Fatal => "fatal",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One input line after decoding, or a synthesized separator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    /// 1-based input line; 0 for separators.
    pub line: usize,
    pub raw: Vec<u8>,
    pub message: String,
    pub time: Option<DateTime<Utc>>,
    pub level: Level,
    pub fields: Fields,
    pub highlight: bool,
    pub is_separator: bool,
    /// Printed as its raw bytes instead of being formatted.
    pub verbatim: bool,
    pub errors: ParseErrors,
}

impl Record {
    pub fn new(raw: &[u8]) -> Self {
        Record {
            raw: raw.to_vec(),
            ..Default::default()
        }
    }

    /// A line that could not be processed and is echoed unchanged.
    pub fn verbatim(raw: &[u8], line: usize) -> Self {
        Record {
            line,
            raw: raw.to_vec(),
            verbatim: true,
            ..Default::default()
        }
    }

    /// Marker between two non-contiguous context regions.
    pub fn separator() -> Self {
        Record {
            is_separator: true,
            ..Default::default()
        }
    }

    pub fn raw_text(&self) -> String {
        String::from_utf8_lossy(&self.raw).into_owned()
    }

    pub fn push_error(&mut self, err: FieldError) {
        self.errors.push(err);
    }

    pub fn has_error(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Name of a JSON value's variant, for error messages.
pub fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

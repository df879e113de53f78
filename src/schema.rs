use crate::error::FieldError;
use crate::output_format::Columns;
use crate::parsers::{self, LevelParser, TimeParser};
use crate::record::{kind_of, Fields, Record};
use serde_json::Value;
use tracing::debug;

/// How to pull time, level and message out of a decoded line.
///
/// When no key is configured and no `no_*_key` flag is set, the first
/// successfully decoded line is matched against a table of well-known
/// logger signatures and the winning row fixes the keys for the rest of the
/// run.
#[derive(Debug, Clone)]
pub struct SchemaConfig {
    pub time_key: String,
    pub level_key: String,
    pub message_key: String,
    pub no_time_key: bool,
    pub no_level_key: bool,
    pub no_message_key: bool,
    pub time_parser: TimeParser,
    pub level_parser: LevelParser,
    pub strict: bool,
    pub delete_keys: Vec<String>,
    pub upgrade_keys: Vec<String>,
    detection_done: bool,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        SchemaConfig {
            time_key: String::new(),
            level_key: String::new(),
            message_key: String::new(),
            no_time_key: false,
            no_level_key: false,
            no_message_key: false,
            time_parser: parsers::default_time,
            level_parser: parsers::level_names,
            strict: true,
            delete_keys: Vec::new(),
            upgrade_keys: Vec::new(),
            detection_done: false,
        }
    }
}

struct Signature {
    name: &'static str,
    keys: &'static [&'static str],
    exact: bool,
    check: Option<fn(&Fields) -> bool>,
    time_key: &'static str,
    time_parser: TimeParser,
    level_key: Option<&'static str>,
    level_parser: LevelParser,
    message_key: &'static str,
    upgrade: &'static [&'static str],
}

static SIGNATURES: &[Signature] = &[
    Signature {
        name: "zap",
        keys: &["ts", "level", "msg"],
        exact: false,
        check: None,
        time_key: "ts",
        time_parser: parsers::unix_seconds,
        level_key: Some("level"),
        level_parser: parsers::level_names,
        message_key: "msg",
        upgrade: &[],
    },
    Signature {
        name: "stackdriver",
        keys: &["timestamp", "severity", "message"],
        exact: false,
        check: None,
        time_key: "timestamp",
        time_parser: parsers::default_time,
        level_key: Some("severity"),
        level_parser: parsers::level_names,
        message_key: "message",
        upgrade: &[],
    },
    Signature {
        name: "stackdriver-time",
        keys: &["time", "severity", "message"],
        exact: false,
        check: None,
        time_key: "time",
        time_parser: parsers::default_time,
        level_key: Some("severity"),
        level_parser: parsers::level_names,
        message_key: "message",
        upgrade: &[],
    },
    Signature {
        name: "bunyan",
        keys: &["time", "level", "v", "msg"],
        exact: false,
        check: Some(bunyan_v0),
        time_key: "time",
        time_parser: parsers::rfc3339,
        level_key: Some("level"),
        level_parser: parsers::bunyan_level,
        message_key: "msg",
        upgrade: &[],
    },
    Signature {
        name: "logrus",
        keys: &["time", "level", "msg"],
        exact: false,
        check: None,
        time_key: "time",
        time_parser: parsers::rfc3339,
        level_key: Some("level"),
        level_parser: parsers::level_names,
        message_key: "msg",
        upgrade: &[],
    },
    Signature {
        name: "lager-pretty",
        keys: &["timestamp", "level", "message", "data", "source"],
        exact: true,
        check: None,
        time_key: "timestamp",
        time_parser: parsers::rfc3339,
        level_key: Some("level"),
        level_parser: parsers::level_names,
        message_key: "message",
        upgrade: &["data"],
    },
    Signature {
        name: "lager",
        keys: &["timestamp", "log_level", "message", "data", "source"],
        exact: true,
        check: None,
        time_key: "timestamp",
        time_parser: parsers::unix_seconds,
        level_key: Some("log_level"),
        level_parser: parsers::lager_level,
        message_key: "message",
        upgrade: &["data"],
    },
    Signature {
        name: "pachyderm",
        keys: &["ts", "message", "workerId", "pipelineName"],
        exact: false,
        check: None,
        time_key: "ts",
        time_parser: parsers::rfc3339,
        level_key: None,
        level_parser: parsers::level_names,
        message_key: "message",
        upgrade: &[],
    },
];

fn bunyan_v0(fields: &Fields) -> bool {
    fields.get("v").and_then(Value::as_f64) == Some(0.0)
}

impl Signature {
    fn matches(&self, fields: &Fields) -> bool {
        if self.exact && fields.len() != self.keys.len() {
            return false;
        }
        self.keys.iter().all(|k| fields.contains_key(*k))
            && self.check.map_or(true, |check| check(fields))
    }
}

impl SchemaConfig {
    /// A schema with fixed keys; auto-detection never runs.
    pub fn with_keys(time_key: &str, level_key: &str, message_key: &str) -> Self {
        SchemaConfig {
            time_key: time_key.to_string(),
            level_key: level_key.to_string(),
            message_key: message_key.to_string(),
            ..Default::default()
        }
    }

    fn wants_detection(&self) -> bool {
        !self.detection_done
            && self.time_key.is_empty()
            && self.level_key.is_empty()
            && self.message_key.is_empty()
            && !self.no_time_key
            && !self.no_level_key
            && !self.no_message_key
    }

    /// Columns to print; keys marked absent get no column.
    pub fn columns(&self) -> Columns {
        Columns {
            time: !self.no_time_key,
            level: !self.no_level_key,
            message: !self.no_message_key,
        }
    }

    /// Whether auto-detection has already consumed its single attempt.
    pub fn detection_done(&self) -> bool {
        self.detection_done
    }

    fn detect(&mut self, fields: &Fields) {
        self.detection_done = true;
        let Some(sig) = SIGNATURES.iter().find(|sig| sig.matches(fields)) else {
            debug!("no known logger signature matched; keys stay unset");
            return;
        };
        debug!(signature = sig.name, "detected log schema");
        self.time_key = sig.time_key.to_string();
        self.time_parser = sig.time_parser;
        match sig.level_key {
            Some(key) => self.level_key = key.to_string(),
            None => self.no_level_key = true,
        }
        self.level_parser = sig.level_parser;
        self.message_key = sig.message_key.to_string();
        self.upgrade_keys
            .extend(sig.upgrade.iter().map(|k| k.to_string()));
    }

    /// Decode one line. Problems are chained onto `Record::errors`; in lax
    /// mode the record is still filled in as far as possible.
    pub fn parse(&mut self, raw: &[u8]) -> Record {
        let mut record = Record::new(raw);
        let looks_like_object = raw
            .iter()
            .find(|b| !b.is_ascii_whitespace())
            .is_some_and(|b| *b == b'{');

        if raw.is_empty() || (!self.strict && !looks_like_object) {
            record.message = record.raw_text();
            record.push_error(FieldError::NotAnObject);
            return record;
        }

        match serde_json::from_slice::<Fields>(raw) {
            Ok(fields) => {
                if self.wants_detection() {
                    self.detect(&fields);
                }
                record.fields = fields;
            }
            Err(e) => {
                record.push_error(FieldError::Json(e.to_string()));
                if !self.strict {
                    record.message = record.raw_text();
                }
            }
        }

        if !self.no_time_key {
            self.extract_time(&mut record);
        }
        if !self.no_message_key {
            self.extract_message(&mut record);
        }
        if !self.no_level_key {
            self.extract_level(&mut record);
        }
        self.apply_upgrades(&mut record);
        for key in &self.delete_keys {
            record.fields.remove(key);
        }
        record
    }

    fn extract_time(&self, record: &mut Record) {
        let key = &self.time_key;
        match record.fields.get(key).map(self.time_parser) {
            None => record.push_error(FieldError::NoTimeKey(key.clone())),
            Some(Ok(time)) => {
                record.time = Some(time);
                record.fields.remove(key);
            }
            Some(Err(reason)) => record.push_error(FieldError::InvalidTime {
                key: key.clone(),
                reason,
            }),
        }
    }

    fn extract_message(&self, record: &mut Record) {
        let key = &self.message_key;
        match record.fields.get(key) {
            None => record.push_error(FieldError::NoMessageKey(key.clone())),
            Some(Value::String(msg)) => {
                record.message = msg.clone();
                record.fields.remove(key);
            }
            Some(_) => {
                record.message = record.raw_text();
                record.push_error(FieldError::NonStringMessage(key.clone()));
            }
        }
    }

    fn extract_level(&self, record: &mut Record) {
        let key = &self.level_key;
        match record.fields.get(key).map(self.level_parser) {
            None => record.push_error(FieldError::NoLevelKey(key.clone())),
            Some(Ok(level)) => {
                record.level = level;
                record.fields.remove(key);
            }
            Some(Err(reason)) => record.push_error(FieldError::InvalidLevel {
                key: key.clone(),
                reason,
            }),
        }
    }

    fn apply_upgrades(&self, record: &mut Record) {
        for key in &self.upgrade_keys {
            match record.fields.remove(key) {
                None => {}
                Some(Value::Object(nested)) => {
                    for (k, v) in nested {
                        record.fields.insert(k, v);
                    }
                }
                Some(other) => {
                    if self.strict {
                        record.push_error(FieldError::InvalidUpgrade {
                            key: key.clone(),
                            kind: kind_of(&other),
                        });
                    }
                    record.fields.insert(key.clone(), other);
                }
            }
        }
    }
}

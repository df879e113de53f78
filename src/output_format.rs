use crate::colors::ColorScheme;
use crate::error::{CompilationError, FormatError};
use crate::formatters::RecordFormatter;
use crate::record::Record;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, Utc};
use indexmap::IndexSet;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::str::FromStr;

/// Rendered between two non-contiguous context regions.
pub const SEPARATOR: &str = "---";

/// Named time layouts: (absolute layout, same-width subseconds-only layout).
pub static TIME_LAYOUTS: Lazy<HashMap<&'static str, (&'static str, Option<&'static str>)>> =
    Lazy::new(|| {
        let mut layouts = HashMap::new();
        layouts.insert("rfc3339", ("%Y-%m-%dT%H:%M:%S%:z", None));
        layouts.insert(
            "rfc3339milli",
            ("%Y-%m-%dT%H:%M:%S%.3f%:z", Some("                   %.3f%:z")),
        );
        layouts.insert(
            "rfc3339micro",
            ("%Y-%m-%dT%H:%M:%S%.6f%:z", Some("                   %.6f%:z")),
        );
        layouts.insert(
            "rfc3339nano",
            ("%Y-%m-%dT%H:%M:%S%.9f%:z", Some("                   %.9f%:z")),
        );
        layouts.insert("unix", ("%s", None));
        layouts.insert("stamp", ("%b %e %H:%M:%S", None));
        layouts.insert(
            "stampmilli",
            ("%b %e %H:%M:%S%.3f", Some("               %.3f")),
        );
        layouts.insert(
            "stampmicro",
            ("%b %e %H:%M:%S%.6f", Some("               %.6f")),
        );
        layouts.insert(
            "stampnano",
            ("%b %e %H:%M:%S%.9f", Some("               %.9f")),
        );
        layouts.insert("kitchen", ("%-I:%M%p", None));
        layouts
    });

/// An absolute time layout plus its optional subseconds-only companion.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeLayout {
    pub absolute: String,
    pub subseconds: Option<String>,
}

impl Default for TimeLayout {
    fn default() -> Self {
        TimeLayout {
            absolute: "%b %e %H:%M:%S".to_string(),
            subseconds: None,
        }
    }
}

impl FromStr for TimeLayout {
    type Err = CompilationError;

    /// A name from [`TIME_LAYOUTS`] or a strftime layout.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some((absolute, subseconds)) = TIME_LAYOUTS.get(s.to_ascii_lowercase().as_str()) {
            return Ok(TimeLayout {
                absolute: absolute.to_string(),
                subseconds: subseconds.map(str::to_string),
            });
        }
        if s.is_empty() || StrftimeItems::new(s).any(|item| matches!(item, Item::Error)) {
            return Err(CompilationError::ConfigError(format!(
                "invalid time format {:?}",
                s
            )));
        }
        Ok(TimeLayout {
            absolute: s.to_string(),
            subseconds: None,
        })
    }
}

/// Time zone for absolute timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Zone {
    #[default]
    Local,
    Utc,
    Fixed(FixedOffset),
}

impl FromStr for Zone {
    type Err = CompilationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Zone::Local),
            "utc" | "z" => Ok(Zone::Utc),
            _ => s
                .parse::<FixedOffset>()
                .map(Zone::Fixed)
                .map_err(|_| {
                    CompilationError::ConfigError(format!(
                        "invalid zone {:?}; use local, utc or an offset like +02:00",
                        s
                    ))
                }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeMode {
    #[default]
    Absolute,
    /// Duration between the run's start and the record.
    Relative,
    /// Only the fractional part when the second didn't change.
    SubSeconds,
}

/// Everything that controls how admitted records look.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub time_mode: TimeMode,
    pub layout: TimeLayout,
    pub zone: Zone,
    /// Reference point for [`TimeMode::Relative`].
    pub start: DateTime<Utc>,
    pub elide: bool,
    pub priority_fields: Vec<String>,
    pub highlight_fields: Vec<String>,
    pub colors: ColorScheme,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            time_mode: TimeMode::Absolute,
            layout: TimeLayout::default(),
            zone: Zone::Local,
            start: Utc::now(),
            elide: true,
            priority_fields: Vec::new(),
            highlight_fields: ["err", "error", "warn", "warning"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            colors: ColorScheme::new(false),
        }
    }
}

/// Which of the well-known columns this run prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Columns {
    pub time: bool,
    pub level: bool,
    pub message: bool,
}

impl Default for Columns {
    fn default() -> Self {
        Columns {
            time: true,
            level: true,
            message: true,
        }
    }
}

/// Time-column memory, handed to the formatter by value so a failed record
/// leaves it untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeState {
    pub last_time: Option<DateTime<Utc>>,
    pub padding: usize,
}

/// Cross-record memory of the output stage.
#[derive(Debug, Default)]
pub struct OutputState {
    seen_fields: IndexSet<String>,
    last_values: HashMap<String, String>,
    pub time: TimeState,
}

impl OutputState {
    /// Field names in first-seen order.
    pub fn seen_fields(&self) -> impl Iterator<Item = &str> {
        self.seen_fields.iter().map(String::as_str)
    }
}

/// Renders admitted records, keeping field order and elision memory stable
/// across the run.
pub struct OutputSchema {
    formatter: Box<dyn RecordFormatter>,
    priority_fields: Vec<String>,
    elide: bool,
    state: OutputState,
}

impl OutputSchema {
    pub fn new(config: &OutputConfig, formatter: Box<dyn RecordFormatter>) -> Self {
        OutputSchema {
            formatter,
            priority_fields: config.priority_fields.clone(),
            elide: config.elide,
            state: OutputState::default(),
        }
    }

    pub fn state(&self) -> &OutputState {
        &self.state
    }

    /// Append one rendered line to `out`. On error nothing is appended and
    /// the output state is unchanged.
    pub fn emit(
        &mut self,
        record: &Record,
        columns: Columns,
        out: &mut Vec<u8>,
    ) -> Result<(), FormatError> {
        if record.is_separator {
            out.extend_from_slice(SEPARATOR.as_bytes());
            out.push(b'\n');
            return Ok(());
        }
        if record.verbatim {
            out.extend_from_slice(&record.raw);
            out.push(b'\n');
            return Ok(());
        }

        let mut line = String::new();
        let mut time_state = self.state.time;

        if columns.level {
            start_column(&mut line);
            self.formatter.format_level(record.level, &mut line)?;
        }
        if columns.time {
            start_column(&mut line);
            self.formatter
                .format_time(&mut time_state, record.time, &mut line)?;
        }
        if columns.message {
            start_column(&mut line);
            self.formatter
                .format_message(&record.message, record.highlight, &mut line)?;
        }

        let (order, new_fields) = self.field_order(record);
        let mut remembered = HashMap::with_capacity(order.len());
        for key in order {
            let Some(value) = record.fields.get(key) else {
                continue;
            };
            let canonical = serde_json::to_string(value)?;
            let elided = self.elide && self.state.last_values.get(key) == Some(&canonical);
            start_column(&mut line);
            self.formatter.format_field(key, value, elided, &mut line)?;
            remembered.insert(key.to_string(), canonical);
        }

        out.extend_from_slice(line.as_bytes());
        out.push(b'\n');

        self.state.time = time_state;
        self.state.last_values = remembered;
        self.state.seen_fields.extend(new_fields);
        Ok(())
    }

    /// Priority fields, then previously seen fields, then new fields sorted.
    fn field_order<'r>(&self, record: &'r Record) -> (Vec<&'r str>, Vec<String>) {
        let fields = &record.fields;
        let is_priority = |k: &str| self.priority_fields.iter().any(|p| p == k);

        let mut order: Vec<&str> = Vec::with_capacity(fields.len());
        for key in &self.priority_fields {
            if let Some((k, _)) = fields.get_key_value(key.as_str()) {
                order.push(k.as_str());
            }
        }
        for key in &self.state.seen_fields {
            if !is_priority(key) {
                if let Some((k, _)) = fields.get_key_value(key.as_str()) {
                    order.push(k.as_str());
                }
            }
        }
        let mut new_fields: Vec<&str> = fields
            .keys()
            .map(String::as_str)
            .filter(|k| !is_priority(k) && !self.state.seen_fields.contains(*k))
            .collect();
        new_fields.sort_unstable();
        order.extend(new_fields.iter().copied());
        let new_fields = new_fields.into_iter().map(str::to_string).collect();
        (order, new_fields)
    }
}

fn start_column(line: &mut String) {
    if !line.is_empty() {
        line.push(' ');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_layouts() {
        let layout: TimeLayout = "StampMicro".parse().unwrap();
        assert_eq!(layout.absolute, "%b %e %H:%M:%S%.6f");
        assert_eq!(layout.subseconds.as_deref(), Some("               %.6f"));

        let custom: TimeLayout = "%H:%M".parse().unwrap();
        assert_eq!(custom.subseconds, None);
        assert!("%Q".parse::<TimeLayout>().is_err());
    }

    #[test]
    fn test_zones() {
        assert_eq!("UTC".parse::<Zone>().unwrap(), Zone::Utc);
        assert_eq!("local".parse::<Zone>().unwrap(), Zone::Local);
        assert_eq!(
            "+02:00".parse::<Zone>().unwrap(),
            Zone::Fixed(FixedOffset::east_opt(7200).unwrap())
        );
        assert!("mars".parse::<Zone>().is_err());
    }
}

use crate::colors::ColorScheme;
use crate::error::FormatError;
use crate::formatters::RecordFormatter;
use crate::output_format::{OutputConfig, TimeLayout, TimeMode, TimeState, Zone};
use crate::record::Level;
use chrono::{DateTime, Local, Utc};
use serde_json::Value;
use std::fmt::Write;
use std::time::Duration;

pub const ELIDED: &str = "↑";
pub const NEWLINE: char = '↩';

/// Column layout: `LEVEL time message key:value ...`
pub struct DefaultFormatter {
    colors: ColorScheme,
    time_mode: TimeMode,
    layout: TimeLayout,
    zone: Zone,
    start: DateTime<Utc>,
    highlight_fields: Vec<String>,
}

impl DefaultFormatter {
    pub fn new(config: &OutputConfig) -> Self {
        DefaultFormatter {
            colors: config.colors.clone(),
            time_mode: config.time_mode,
            layout: config.layout.clone(),
            zone: config.zone,
            start: config.start,
            highlight_fields: config.highlight_fields.clone(),
        }
    }

    fn render_absolute(&self, time: DateTime<Utc>, layout: &str) -> Result<String, FormatError> {
        let mut s = String::new();
        match self.zone {
            Zone::Utc => write!(s, "{}", time.format(layout)),
            Zone::Local => write!(s, "{}", time.with_timezone(&Local).format(layout)),
            Zone::Fixed(offset) => write!(s, "{}", time.with_timezone(&offset).format(layout)),
        }
        .map_err(|_| FormatError::Render {
            what: "time",
            message: format!("invalid layout {:?}", layout),
        })?;
        Ok(s)
    }

    fn render_time(&self, state: &mut TimeState, time: DateTime<Utc>) -> Result<String, FormatError> {
        match self.time_mode {
            TimeMode::Absolute => self.render_absolute(time, &self.layout.absolute),
            TimeMode::Relative => Ok(format_relative(self.start - time)),
            TimeMode::SubSeconds => {
                let same_second = state
                    .last_time
                    .is_some_and(|last| last.timestamp() == time.timestamp());
                state.last_time = Some(time);
                match &self.layout.subseconds {
                    Some(layout) if same_second => self.render_absolute(time, layout),
                    _ => self.render_absolute(time, &self.layout.absolute),
                }
            }
        }
    }
}

/// Signed, magnitude-truncated duration: `-1.5s` style precision is
/// dropped to whole seconds, sub-second values keep ms/µs/ns.
pub fn format_relative(elapsed: chrono::Duration) -> String {
    let negative = elapsed < chrono::Duration::zero();
    let magnitude = elapsed.abs().to_std().unwrap_or_default();
    let unit = if magnitude < Duration::from_micros(1) {
        1
    } else if magnitude < Duration::from_millis(1) {
        1_000
    } else if magnitude < Duration::from_secs(1) {
        1_000_000
    } else {
        1_000_000_000
    };
    let nanos = magnitude.as_nanos() / unit * unit;
    let truncated = Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX));
    let text = humantime::format_duration(truncated).to_string();
    if negative {
        format!("-{}", text)
    } else {
        text
    }
}

fn level_label(level: Level) -> &'static str {
    match level {
        Level::Unknown => "UNK  ",
        Level::Trace => "TRACE",
        Level::Debug => "DEBUG",
        Level::Info => "INFO ",
        Level::Warn => "WARN ",
        Level::Error => "ERROR",
        Level::Panic => "PANIC",
        Level::DPanic => "DPANI",
        Level::Fatal => "FATAL",
    }
}

impl RecordFormatter for DefaultFormatter {
    fn format_time(
        &self,
        state: &mut TimeState,
        time: Option<DateTime<Utc>>,
        out: &mut String,
    ) -> Result<(), FormatError> {
        let mut text = match time {
            None => format!("{:>width$}", "???", width = state.padding),
            Some(t) => self.render_time(state, t)?,
        };
        let width = text.chars().count();
        if width < state.padding {
            text.extend(std::iter::repeat(' ').take(state.padding - width));
        } else {
            state.padding = width;
        }
        write!(out, "{}{}{}", self.colors.time, text, self.colors.reset)?;
        Ok(())
    }

    fn format_level(&self, level: Level, out: &mut String) -> Result<(), FormatError> {
        write!(
            out,
            "{}{}{}",
            self.colors.level(level),
            level_label(level),
            self.colors.reset
        )?;
        Ok(())
    }

    fn format_message(&self, message: &str, highlight: bool, out: &mut String) -> Result<(), FormatError> {
        let message = message.replace('\n', &NEWLINE.to_string());
        if highlight {
            write!(out, "{}{}{}", self.colors.highlight, message, self.colors.reset)?;
        } else {
            out.push_str(&message);
        }
        Ok(())
    }

    fn format_field(
        &self,
        key: &str,
        value: &Value,
        elided: bool,
        out: &mut String,
    ) -> Result<(), FormatError> {
        let key_color = if self.highlight_fields.iter().any(|h| h == key) {
            self.colors.highlight
        } else {
            self.colors.key
        };
        write!(out, "{}{}:{}", key_color, key, self.colors.reset)?;
        match value {
            _ if elided => out.push_str(ELIDED),
            Value::String(s) => out.push_str(s),
            other => out.push_str(&serde_json::to_string(other)?),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn formatter(time_mode: TimeMode, layout: &str) -> DefaultFormatter {
        DefaultFormatter::new(&OutputConfig {
            time_mode,
            layout: layout.parse().unwrap(),
            zone: Zone::Utc,
            start: Utc.timestamp_opt(100, 0).unwrap(),
            ..Default::default()
        })
    }

    fn time(f: &DefaultFormatter, state: &mut TimeState, t: Option<DateTime<Utc>>) -> String {
        let mut out = String::new();
        f.format_time(state, t, &mut out).unwrap();
        out
    }

    #[test]
    fn test_level_labels_have_equal_width() {
        for level in Level::ALL {
            assert_eq!(level_label(level).len(), 5);
        }
    }

    #[test]
    fn test_absolute_time_and_padding() {
        let f = formatter(TimeMode::Absolute, "stamp");
        let mut state = TimeState::default();
        let t = Utc.timestamp_opt(1, 0).unwrap();
        assert_eq!(time(&f, &mut state, Some(t)), "Jan  1 00:00:01");
        assert_eq!(state.padding, 15);
        assert_eq!(time(&f, &mut state, None), "            ???");
    }

    #[test]
    fn test_unknown_time_before_any_known() {
        let f = formatter(TimeMode::Absolute, "stamp");
        let mut state = TimeState::default();
        assert_eq!(time(&f, &mut state, None), "???");
        assert_eq!(state.padding, 3);
    }

    #[test]
    fn test_subseconds_mode() {
        let f = formatter(TimeMode::SubSeconds, "stampmicro");
        let mut state = TimeState::default();
        let t1 = Utc.timestamp_opt(1, 0).unwrap();
        let t2 = Utc.timestamp_opt(1, 1_000).unwrap();
        let t3 = Utc.timestamp_opt(2, 999_999_999).unwrap();
        assert_eq!(time(&f, &mut state, Some(t1)), "Jan  1 00:00:01.000000");
        assert_eq!(time(&f, &mut state, Some(t2)), "               .000001");
        // Truncated, never rounded up into the next second.
        assert_eq!(time(&f, &mut state, Some(t3)), "Jan  1 00:00:02.999999");
    }

    #[test]
    fn test_relative_time() {
        let f = formatter(TimeMode::Relative, "stamp");
        let mut state = TimeState::default();
        let t = Utc.timestamp_opt(95, 500_000_000).unwrap();
        assert_eq!(time(&f, &mut state, Some(t)), "4s");
        let later = Utc.timestamp_opt(100, 1_500).unwrap();
        assert_eq!(time(&f, &mut state, Some(later)), "-1us");
    }

    #[test]
    fn test_format_relative_scaling() {
        assert_eq!(format_relative(chrono::Duration::nanoseconds(999)), "999ns");
        assert_eq!(format_relative(chrono::Duration::nanoseconds(123_456)), "123us");
        assert_eq!(format_relative(chrono::Duration::nanoseconds(12_345_678)), "12ms");
        assert_eq!(format_relative(chrono::Duration::seconds(-3723)), "-1h 2m 3s");
    }

    #[test]
    fn test_message_and_fields() {
        let f = formatter(TimeMode::Absolute, "stamp");
        let mut out = String::new();
        f.format_message("two\nlines", false, &mut out).unwrap();
        assert_eq!(out, "two↩lines");

        let mut out = String::new();
        f.format_field("user", &json!("bob"), false, &mut out).unwrap();
        f.format_field("n", &json!({"a": [1]}), false, &mut out).unwrap();
        f.format_field("n", &json!(1), true, &mut out).unwrap();
        assert_eq!(out, "user:bobn:{\"a\":[1]}n:↑");
    }

    #[test]
    fn test_colors() {
        let f = DefaultFormatter::new(&OutputConfig {
            colors: ColorScheme::new(true),
            ..Default::default()
        });
        let mut out = String::new();
        f.format_field("error", &json!("x"), false, &mut out).unwrap();
        assert_eq!(out, "\x1b[1;31merror:\x1b[0mx");
        let mut out = String::new();
        f.format_message("m", true, &mut out).unwrap();
        assert_eq!(out, "\x1b[1;31mm\x1b[0m");
    }
}

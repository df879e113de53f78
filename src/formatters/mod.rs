use crate::error::FormatError;
use crate::output_format::TimeState;
use crate::record::Level;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Renders the pieces of one log line. Ordering, spacing and elision
/// memory are handled by the caller; implementations only write text.
pub trait RecordFormatter {
    fn format_time(
        &self,
        state: &mut TimeState,
        time: Option<DateTime<Utc>>,
        out: &mut String,
    ) -> Result<(), FormatError>;

    fn format_level(&self, level: Level, out: &mut String) -> Result<(), FormatError>;

    fn format_message(&self, message: &str, highlight: bool, out: &mut String)
        -> Result<(), FormatError>;

    /// `elided` is set when the value equals the one printed for `key` on
    /// the previous line.
    fn format_field(
        &self,
        key: &str,
        value: &Value,
        elided: bool,
        out: &mut String,
    ) -> Result<(), FormatError>;
}

pub mod default;

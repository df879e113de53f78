use crate::record::Level;
use is_terminal::IsTerminal;

/// ANSI color codes for pretty-printed log lines
#[derive(Debug, Clone)]
pub struct ColorScheme {
    pub key: &'static str,          // Gray for field names
    pub time: &'static str,         // Green for the time column
    pub highlight: &'static str,    // Bold red for highlighted messages and keys
    pub level_trace: &'static str,  // Gray
    pub level_debug: &'static str,  // Blue
    pub level_info: &'static str,   // Cyan
    pub level_warn: &'static str,   // Yellow
    pub level_error: &'static str,  // Red
    pub level_panic: &'static str,  // Magenta for panic/dpanic
    pub level_fatal: &'static str,  // Magenta background
    pub level_unknown: &'static str, // Dim gray
    pub reset: &'static str,        // Reset to default color
}

impl ColorScheme {
    pub fn new(use_colors: bool) -> Self {
        if use_colors {
            Self {
                key: "\x1b[90m",
                time: "\x1b[32m",
                highlight: "\x1b[1;31m",
                level_trace: "\x1b[90m",
                level_debug: "\x1b[34m",
                level_info: "\x1b[36m",
                level_warn: "\x1b[33m",
                level_error: "\x1b[31m",
                level_panic: "\x1b[35m",
                level_fatal: "\x1b[45m",
                level_unknown: "\x1b[2;37m",
                reset: "\x1b[0m",
            }
        } else {
            // All empty strings for no-color mode
            Self {
                key: "",
                time: "",
                highlight: "",
                level_trace: "",
                level_debug: "",
                level_info: "",
                level_warn: "",
                level_error: "",
                level_panic: "",
                level_fatal: "",
                level_unknown: "",
                reset: "",
            }
        }
    }

    /// Colors on when stdout is a terminal, unless forced either way.
    pub fn detect(force: Option<bool>) -> Self {
        Self::new(force.unwrap_or_else(|| std::io::stdout().is_terminal()))
    }

    pub fn level(&self, level: Level) -> &'static str {
        match level {
            Level::Unknown => self.level_unknown,
            Level::Trace => self.level_trace,
            Level::Debug => self.level_debug,
            Level::Info => self.level_info,
            Level::Warn => self.level_warn,
            Level::Error => self.level_error,
            Level::Panic | Level::DPanic => self.level_panic,
            Level::Fatal => self.level_fatal,
        }
    }
}

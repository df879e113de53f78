use serde::Serialize;
use std::fmt;

/// Per-run counters, each bumped at most once per input line.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub lines_read: usize,
    pub lines_filtered: usize,
    pub lines_errored: usize,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.lines_read {
            1 => f.write_str("1 line read")?,
            n => write!(f, "{} lines read", n)?,
        }
        match self.lines_filtered {
            0 => {}
            1 => f.write_str(" (1 line filtered)")?,
            n => write!(f, " ({} lines filtered)", n)?,
        }
        match self.lines_errored {
            0 => f.write_str("; no parse errors.")?,
            1 => f.write_str("; 1 parse error.")?,
            n => write!(f, "; {} parse errors.", n)?,
        }
        Ok(())
    }
}

/// Which step of the per-line pipeline a diagnostic came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Parse,
    Filter,
    Format,
    Panic,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Parse => "parse",
            Stage::Filter => "filter",
            Stage::Format => "format",
            Stage::Panic => "panic",
        })
    }
}

/// A non-fatal problem with one input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub line: usize,
    pub stage: Stage,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}: {}", self.line, self.stage, self.message)
    }
}

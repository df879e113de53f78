use std::fmt;

/// Fatal errors that stop a run.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("read input at line {line}: {source}")]
    Read {
        line: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("write output at line {line}: {source}")]
    Write {
        line: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line} longer than {max_length} bytes")]
    LineTooLong { line: usize, max_length: usize },

    #[error("interrupted")]
    Interrupted,
}

impl ProcessingError {
    /// True when the output side went away (e.g. `jlog ... | head`).
    pub fn is_broken_pipe(&self) -> bool {
        matches!(self, ProcessingError::Write { source, .. }
            if source.kind() == std::io::ErrorKind::BrokenPipe)
    }
}

/// Errors raised while building a pipeline, before any input is read.
#[derive(Debug, thiserror::Error)]
pub enum CompilationError {
    #[error("Starlark syntax error: {0}")]
    SyntaxError(String),

    #[error("invalid regex: {0}")]
    Regex(#[from] regex::Error),

    #[error("{0}")]
    Conflict(&'static str),

    #[error("load module {path}: {message}")]
    Module { path: String, message: String },

    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

impl From<starlark::Error> for CompilationError {
    fn from(err: starlark::Error) -> Self {
        CompilationError::SyntaxError(format!("{}", err))
    }
}

/// One problem found while extracting a record's well-known fields.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FieldError {
    #[error("not a JSON object")]
    NotAnObject,

    #[error("unmarshal json: {0}")]
    Json(String),

    #[error("no time key {0:?} in incoming log")]
    NoTimeKey(String),

    #[error("invalid timestamp in key {key:?}: {reason}")]
    InvalidTime { key: String, reason: String },

    #[error("message key {0:?} contains non-string data")]
    NonStringMessage(String),

    #[error("no message key {0:?} in incoming log")]
    NoMessageKey(String),

    #[error("no level key {0:?} in incoming log")]
    NoLevelKey(String),

    #[error("invalid level in key {key:?}: {reason}")]
    InvalidLevel { key: String, reason: String },

    #[error("upgrade key {key:?}: invalid data type: want object, got {kind}")]
    InvalidUpgrade { key: String, kind: &'static str },
}

/// Accumulated parse errors for one record, printed joined by `"; "`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseErrors(Vec<FieldError>);

impl ParseErrors {
    pub fn push(&mut self, err: FieldError) {
        self.0.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.0
    }
}

impl fmt::Display for ParseErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseErrors {}

/// Per-line filter failures. Never fatal.
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("program: {0}")]
    Program(String),

    #[error("program: unexpected None result; return {{}} to drop all fields or skip() to filter the line")]
    NullResult,

    #[error("program: unexpected boolean output; use skip() to filter lines")]
    BooleanResult,

    #[error("program: unexpected {0} output; the program must produce a dict")]
    UnexpectedResult(&'static str),

    #[error("program: unexpectedly produced more than 1 output")]
    MultipleResults,
}

/// A fault raised by a record formatter.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("format {what}: {message}")]
    Render { what: &'static str, message: String },

    #[error("format: {0}")]
    Fmt(#[from] fmt::Error),

    #[error("serialize value: {0}")]
    Serialize(#[from] serde_json::Error),
}

use crate::error::{CompilationError, FilterError};
use crate::pipeline::engine::{CompiledProgram, ExpressionEngine};
use crate::record::{kind_of, Level, Record};
use regex::Regex;
use serde_json::Value;
use std::path::PathBuf;
use std::str::FromStr;

/// Private key a program sets to highlight its record. Stripped before output.
pub const HIGHLIGHT_KEY: &str = "__highlight";

/// Where value-scope matching records a value it could not serialize.
pub const SERIALIZE_ERROR_KEY: &str = "_jlog_serialize_error";

/// Names bound for every program run, in the order of [`program_variables`].
pub const PROGRAM_VARIABLES: [&str; 13] = [
    "TS", "RAW", "MSG", "LVL", "UNKNOWN", "TRACE", "DEBUG", "INFO", "WARN", "ERROR", "PANIC",
    "DPANIC", "FATAL",
];

/// Which parts of a record a regex is tried against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegexScope(u8);

impl RegexScope {
    pub const MESSAGE: RegexScope = RegexScope(1);
    pub const KEYS: RegexScope = RegexScope(2);
    pub const VALUES: RegexScope = RegexScope(4);
    pub const ALL: RegexScope = RegexScope(7);

    pub fn contains(self, other: RegexScope) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for RegexScope {
    fn default() -> Self {
        RegexScope::ALL
    }
}

impl std::ops::BitOr for RegexScope {
    type Output = RegexScope;

    fn bitor(self, rhs: RegexScope) -> RegexScope {
        RegexScope(self.0 | rhs.0)
    }
}

impl FromStr for RegexScope {
    type Err = CompilationError;

    /// Any combination of `k` (keys), `m` (message) and `v` (values).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut scope = RegexScope(0);
        for c in s.chars() {
            scope = scope
                | match c {
                    'm' => RegexScope::MESSAGE,
                    'k' => RegexScope::KEYS,
                    'v' => RegexScope::VALUES,
                    other => {
                        return Err(CompilationError::ConfigError(format!(
                            "unknown regex scope {:?}; use a combination of k, m and v",
                            other
                        )))
                    }
                };
        }
        if scope.0 == 0 {
            return Err(CompilationError::ConfigError(
                "regex scope must not be empty".to_string(),
            ));
        }
        Ok(scope)
    }
}

/// Builds an immutable [`FilterConfig`].
#[derive(Default)]
pub struct FilterBuilder {
    program: Option<Box<dyn CompiledProgram>>,
    match_regex: Option<Regex>,
    no_match_regex: Option<Regex>,
    scope: RegexScope,
}

impl FilterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and compile `text` with `engine`. Empty text is a no-op.
    pub fn program<E: ExpressionEngine>(
        mut self,
        engine: &E,
        text: &str,
        builtins: E::Builtins,
        search_path: &[PathBuf],
    ) -> Result<Self, CompilationError> {
        if text.trim().is_empty() {
            return Ok(self);
        }
        let parsed = engine.parse(text)?;
        self.program = Some(engine.compile(parsed, &PROGRAM_VARIABLES, builtins, search_path)?);
        Ok(self)
    }

    /// Drop lines that don't match `rx`. Empty is a no-op.
    pub fn match_regex(mut self, rx: &str) -> Result<Self, CompilationError> {
        if rx.is_empty() {
            return Ok(self);
        }
        if self.match_regex.is_some() {
            return Err(CompilationError::Conflict("regex already added"));
        }
        if self.no_match_regex.is_some() {
            return Err(CompilationError::Conflict(
                "cannot combine a match regex with a no-match regex",
            ));
        }
        self.match_regex = Some(Regex::new(rx)?);
        Ok(self)
    }

    /// Drop lines that match `rx`. Empty is a no-op.
    pub fn no_match_regex(mut self, rx: &str) -> Result<Self, CompilationError> {
        if rx.is_empty() {
            return Ok(self);
        }
        if self.no_match_regex.is_some() {
            return Err(CompilationError::Conflict("regex already added"));
        }
        if self.match_regex.is_some() {
            return Err(CompilationError::Conflict(
                "cannot combine a match regex with a no-match regex",
            ));
        }
        self.no_match_regex = Some(Regex::new(rx)?);
        Ok(self)
    }

    pub fn scope(mut self, scope: RegexScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn build(self) -> FilterConfig {
        FilterConfig {
            program: self.program,
            match_regex: self.match_regex,
            no_match_regex: self.no_match_regex,
            scope: self.scope,
        }
    }
}

/// Regex and program filtering for decoded records.
#[derive(Default)]
pub struct FilterConfig {
    program: Option<Box<dyn CompiledProgram>>,
    match_regex: Option<Regex>,
    no_match_regex: Option<Regex>,
    scope: RegexScope,
}

impl FilterConfig {
    pub fn is_empty(&self) -> bool {
        self.program.is_none() && self.match_regex.is_none() && self.no_match_regex.is_none()
    }

    /// Returns whether the record should be dropped. Regex capture groups are
    /// written into the record's fields whether or not it ends up dropped.
    pub fn run(&self, record: &mut Record) -> Result<bool, FilterError> {
        let mut filtered = false;
        if let Some(rx) = &self.no_match_regex {
            if self.regex_hit(rx, record) {
                filtered = true;
            }
        }
        if let Some(rx) = &self.match_regex {
            if !self.regex_hit(rx, record) {
                filtered = true;
            }
        }
        let program_filtered = self.run_program(record)?;
        Ok(filtered || program_filtered)
    }

    fn regex_hit(&self, rx: &Regex, record: &mut Record) -> bool {
        let mut hit: Option<String> = None;
        if self.scope.contains(RegexScope::MESSAGE) && rx.is_match(&record.message) {
            hit = Some(record.message.clone());
        }
        if hit.is_none() && self.scope.contains(RegexScope::KEYS) {
            hit = record.fields.keys().find(|k| rx.is_match(k)).cloned();
        }
        if hit.is_none() && self.scope.contains(RegexScope::VALUES) {
            let mut unserializable = None;
            for (key, value) in &record.fields {
                match serde_json::to_string(value) {
                    Ok(text) if rx.is_match(&text) => {
                        hit = Some(text);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => unserializable = Some(format!("{}: {}", key, e)),
                }
            }
            if let Some(err) = unserializable {
                record.fields.insert(SERIALIZE_ERROR_KEY.to_string(), Value::String(err));
            }
        }
        let Some(text) = hit else {
            return false;
        };
        if let Some(caps) = rx.captures(&text) {
            for (i, name) in rx.capture_names().enumerate().skip(1) {
                let key = match name {
                    Some(name) => name.to_string(),
                    None => format!("${}", i),
                };
                let value = caps.get(i).map_or("", |m| m.as_str());
                record.fields.insert(key, Value::String(value.to_string()));
            }
        }
        true
    }

    fn run_program(&self, record: &mut Record) -> Result<bool, FilterError> {
        let Some(program) = &self.program else {
            return Ok(false);
        };
        let input = Value::Object(record.fields.clone());
        let variables = program_variables(record);
        let mut results = program.run(input, &variables);

        let first = match results.next() {
            None => return Ok(true),
            Some(Err(e)) => return Err(FilterError::Program(e.to_string())),
            Some(Ok(value)) => value,
        };
        if results.next().is_some() {
            return Err(FilterError::MultipleResults);
        }
        match first {
            Value::Object(mut fields) => {
                match fields.remove(HIGHLIGHT_KEY) {
                    Some(Value::Bool(on)) => record.highlight = on,
                    Some(other) => record.highlight = !other.is_null(),
                    None => {}
                }
                record.fields = fields;
                Ok(false)
            }
            Value::Null => Err(FilterError::NullResult),
            Value::Bool(_) => Err(FilterError::BooleanResult),
            other => Err(FilterError::UnexpectedResult(kind_of(&other))),
        }
    }
}

/// Values for [`PROGRAM_VARIABLES`].
pub fn program_variables(record: &Record) -> Vec<Value> {
    let ts = record
        .time
        .and_then(|t| {
            serde_json::Number::from_f64(
                t.timestamp() as f64 + f64::from(t.timestamp_subsec_nanos()) / 1e9,
            )
        })
        .map_or(Value::Null, Value::Number);
    let mut vars = vec![
        ts,
        Value::String(record.raw_text()),
        Value::String(record.message.clone()),
        Value::from(record.level as u8),
    ];
    vars.extend(Level::ALL.iter().map(|l| Value::from(*l as u8)));
    vars
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::engine::NativeEngine;
    use crate::pipeline::global_functions::filter_functions;
    use crate::pipeline::script::StarlarkEngine;
    use serde_json::json;

    fn record(message: &str, fields: Value) -> Record {
        let mut r = Record::new(b"raw line");
        r.message = message.to_string();
        r.level = Level::Warn;
        if let Value::Object(map) = fields {
            r.fields = map;
        }
        r
    }

    fn starlark(text: &str) -> FilterConfig {
        FilterBuilder::new()
            .program(&StarlarkEngine, text, filter_functions, &[])
            .unwrap()
            .build()
    }

    #[test]
    fn test_scope_parse() {
        assert_eq!("kmv".parse::<RegexScope>().unwrap(), RegexScope::ALL);
        let scope: RegexScope = "m".parse().unwrap();
        assert!(scope.contains(RegexScope::MESSAGE));
        assert!(!scope.contains(RegexScope::KEYS));
        assert!("x".parse::<RegexScope>().is_err());
        assert!("".parse::<RegexScope>().is_err());
    }

    #[test]
    fn test_regex_conflicts() {
        let err = FilterBuilder::new()
            .match_regex("a")
            .unwrap()
            .no_match_regex("b")
            .err()
            .unwrap();
        assert!(matches!(err, CompilationError::Conflict(_)));

        let err = FilterBuilder::new()
            .no_match_regex("a")
            .unwrap()
            .no_match_regex("b")
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "regex already added");

        assert!(FilterBuilder::new().match_regex("(").is_err());
        assert!(FilterBuilder::new().match_regex("").unwrap().build().is_empty());
    }

    #[test]
    fn test_match_regex_captures() {
        let filter = FilterBuilder::new()
            .match_regex(r"took (?P<ms>\d+)ms in (\w+)")
            .unwrap()
            .build();
        let mut r = record("took 42ms in handler", json!({}));
        assert!(!filter.run(&mut r).unwrap());
        assert_eq!(r.fields["ms"], json!("42"));
        assert_eq!(r.fields["$2"], json!("handler"));

        let mut r = record("nothing here", json!({"a": 1}));
        assert!(filter.run(&mut r).unwrap());
    }

    #[test]
    fn test_scopes_restrict_matching() {
        let filter = FilterBuilder::new()
            .match_regex("^user$")
            .unwrap()
            .scope(RegexScope::MESSAGE)
            .build();
        let mut r = record("hello", json!({"user": "bob"}));
        assert!(filter.run(&mut r).unwrap());

        let filter = FilterBuilder::new()
            .match_regex("^user$")
            .unwrap()
            .scope(RegexScope::KEYS)
            .build();
        assert!(!filter.run(&mut r).unwrap());

        // Values are matched in their serialized form.
        let filter = FilterBuilder::new()
            .match_regex(r#"^"bob"$"#)
            .unwrap()
            .scope(RegexScope::VALUES)
            .build();
        assert!(!filter.run(&mut r).unwrap());
    }

    #[test]
    fn test_first_hit_wins() {
        let filter = FilterBuilder::new()
            .match_regex("(?P<word>[a-z]+)")
            .unwrap()
            .build();
        let mut r = record("first", json!({"second": "third"}));
        filter.run(&mut r).unwrap();
        assert_eq!(r.fields["word"], json!("first"));
    }

    #[test]
    fn test_no_match_regex_captures_even_when_dropped() {
        let filter = FilterBuilder::new()
            .no_match_regex("id=(?P<id>\\d+)")
            .unwrap()
            .build();
        let mut r = record("request id=7", json!({}));
        assert!(filter.run(&mut r).unwrap());
        assert_eq!(r.fields["id"], json!("7"));
    }

    #[test]
    fn test_program_transforms_fields() {
        let filter = starlark("data['upper'] = MSG.upper()\ndata.pop('drop')\ndata");
        let mut r = record("hi", json!({"drop": 1, "keep": 2}));
        assert!(!filter.run(&mut r).unwrap());
        assert_eq!(Value::Object(r.fields), json!({"keep": 2, "upper": "HI"}));
    }

    #[test]
    fn test_program_sees_level_constants() {
        let filter = starlark("if LVL < ERROR:\n    skip()");
        let mut r = record("hi", json!({}));
        assert!(filter.run(&mut r).unwrap());
    }

    #[test]
    fn test_program_highlight_key_is_stripped() {
        let filter = starlark("data['__highlight'] = LVL == WARN\ndata");
        let mut r = record("hi", json!({"a": 1}));
        assert!(!filter.run(&mut r).unwrap());
        assert!(r.highlight);
        assert!(!r.fields.contains_key(HIGHLIGHT_KEY));
    }

    #[test]
    fn test_program_bad_results() {
        let mut r = record("hi", json!({}));
        assert!(matches!(
            starlark("True").run(&mut r),
            Err(FilterError::BooleanResult)
        ));
        assert!(matches!(
            starlark("data = None").run(&mut r),
            Err(FilterError::NullResult)
        ));
        assert!(matches!(
            starlark("42").run(&mut r),
            Err(FilterError::UnexpectedResult("number"))
        ));
        assert!(matches!(
            starlark("[data, data]").run(&mut r),
            Err(FilterError::MultipleResults)
        ));
        assert!(matches!(
            starlark("fail('boom')").run(&mut r),
            Err(FilterError::Program(_))
        ));
    }

    #[test]
    fn test_program_runs_after_regex() {
        let filter = FilterBuilder::new()
            .match_regex("n=(?P<n>\\d+)")
            .unwrap()
            .program(&StarlarkEngine, "data['n2'] = int(data['n']) * 2\ndata", filter_functions, &[])
            .unwrap()
            .build();
        let mut r = record("n=21", json!({}));
        assert!(!filter.run(&mut r).unwrap());
        assert_eq!(r.fields["n2"], json!(42));
    }

    #[test]
    fn test_native_program() {
        let filter = FilterBuilder::new()
            .program(
                &NativeEngine,
                r#"[{"select": {"level_at_least": "error"}}]"#,
                (),
                &[],
            )
            .unwrap()
            .build();
        let mut r = record("hi", json!({}));
        assert!(filter.run(&mut r).unwrap());
        r.level = Level::Fatal;
        assert!(!filter.run(&mut r).unwrap());
    }

    #[test]
    fn test_program_variables() {
        use chrono::{TimeZone, Utc};
        let mut r = record("m", json!({}));
        r.time = Some(Utc.timestamp_opt(1, 500_000_000).unwrap());
        let vars = program_variables(&r);
        assert_eq!(vars.len(), PROGRAM_VARIABLES.len());
        assert_eq!(vars[0], json!(1.5));
        assert_eq!(vars[1], json!("raw line"));
        assert_eq!(vars[3], json!(Level::Warn as u8));
        assert_eq!(vars[12], json!(8));
    }
}

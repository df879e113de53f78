//! The seam between the filter and whatever evaluates filter programs.
//!
//! `StarlarkEngine` (in `script`) is the full embedded language.
//! `NativeEngine` below is a small step list for callers that only need
//! selection and projection.

use crate::error::CompilationError;
use crate::pipeline::filter::HIGHLIGHT_KEY;
use crate::record::Level;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;

/// Program outputs, in order. Filters only ever pull two of them; engines
/// may compute them all up front.
pub type ProgramResults<'a> = Box<dyn Iterator<Item = anyhow::Result<Value>> + 'a>;

/// Compiles program text into something the filter can run per record.
pub trait ExpressionEngine {
    type Program;
    type Builtins;

    fn parse(&self, text: &str) -> Result<Self::Program, CompilationError>;

    /// `variables` are the names bound on every run, in the order their
    /// values will be passed to [`CompiledProgram::run`].
    fn compile(
        &self,
        program: Self::Program,
        variables: &[&str],
        builtins: Self::Builtins,
        search_path: &[PathBuf],
    ) -> Result<Box<dyn CompiledProgram>, CompilationError>;
}

pub trait CompiledProgram {
    fn run(&self, input: Value, variables: &[Value]) -> ProgramResults<'_>;
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Has(String),
    Equals { key: String, value: Value },
    LevelAtLeast(Level),
    Not(Box<Predicate>),
}

/// One step of a native program, applied in order.
///
/// Written as JSON, e.g.
/// `[{"select": {"level_at_least": "warn"}}, {"delete": ["caller"]}]`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Drop the record unless the predicate holds.
    Select(Predicate),
    /// Keep only the named fields.
    Project(Vec<String>),
    Delete(Vec<String>),
    /// Highlight the record when the predicate holds.
    Highlight(Predicate),
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NativeEngine;

impl ExpressionEngine for NativeEngine {
    type Program = Vec<Step>;
    type Builtins = ();

    fn parse(&self, text: &str) -> Result<Vec<Step>, CompilationError> {
        serde_json::from_str(text)
            .map_err(|e| CompilationError::SyntaxError(format!("native steps: {}", e)))
    }

    fn compile(
        &self,
        program: Vec<Step>,
        variables: &[&str],
        _builtins: (),
        search_path: &[PathBuf],
    ) -> Result<Box<dyn CompiledProgram>, CompilationError> {
        if !search_path.is_empty() {
            return Err(CompilationError::ConfigError(
                "native steps cannot load modules".to_string(),
            ));
        }
        Ok(Box::new(NativeProgram {
            steps: program,
            level_index: variables.iter().position(|v| *v == "LVL"),
        }))
    }
}

pub struct NativeProgram {
    steps: Vec<Step>,
    level_index: Option<usize>,
}

impl NativeProgram {
    fn level(&self, variables: &[Value]) -> Level {
        self.level_index
            .and_then(|i| variables.get(i))
            .and_then(Value::as_u64)
            .and_then(|n| Level::ALL.get(n as usize).copied())
            .unwrap_or_default()
    }
}

impl Predicate {
    fn holds(&self, fields: &serde_json::Map<String, Value>, level: Level) -> bool {
        match self {
            Predicate::Has(key) => fields.contains_key(key),
            Predicate::Equals { key, value } => fields.get(key) == Some(value),
            Predicate::LevelAtLeast(min) => level >= *min,
            Predicate::Not(inner) => !inner.holds(fields, level),
        }
    }
}

impl CompiledProgram for NativeProgram {
    fn run(&self, input: Value, variables: &[Value]) -> ProgramResults<'_> {
        let Value::Object(mut fields) = input else {
            return Box::new(std::iter::once(Err(anyhow::anyhow!(
                "native steps need an object input"
            ))));
        };
        let level = self.level(variables);
        for step in &self.steps {
            match step {
                Step::Select(pred) => {
                    if !pred.holds(&fields, level) {
                        return Box::new(std::iter::empty());
                    }
                }
                Step::Project(keys) => fields.retain(|k, _| keys.contains(k)),
                Step::Delete(keys) => {
                    for key in keys {
                        fields.remove(key);
                    }
                }
                Step::Highlight(pred) => {
                    if pred.holds(&fields, level) {
                        fields.insert(HIGHLIGHT_KEY.to_string(), Value::Bool(true));
                    }
                }
            }
        }
        Box::new(std::iter::once(Ok(Value::Object(fields))))
    }
}

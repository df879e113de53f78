// src/lib.rs
pub mod colors;
pub mod error;
pub mod formatters;
pub mod interruptible;
pub mod output_format;
pub mod parsers;
pub mod pipeline;
pub mod processors;
pub mod record;
pub mod schema;

pub use error::*;

pub use colors::ColorScheme;
pub use formatters::{default::DefaultFormatter, RecordFormatter};
pub use output_format::{Columns, OutputConfig, OutputSchema, OutputState, TimeLayout, TimeMode, Zone};
pub use pipeline::config::PipelineConfig;
pub use pipeline::context::{Diagnostic, Stage, Summary};
pub use pipeline::engine::{CompiledProgram, ExpressionEngine, NativeEngine, Predicate, Step};
pub use pipeline::filter::{FilterBuilder, FilterConfig, RegexScope};
pub use pipeline::global_functions::filter_functions;
pub use pipeline::script::StarlarkEngine;
pub use pipeline::stream::{DiagnosticSink, StreamPipeline};
pub use processors::ContextWindow;
pub use record::{Fields, Level, Record};
pub use schema::SchemaConfig;

// src/pipeline/stream.rs
use std::any::Any;
use std::io::{BufRead, Read, Write};
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, warn};

use crate::error::ProcessingError;
use crate::interruptible::is_interrupted;
use crate::output_format::OutputSchema;
use crate::pipeline::config::PipelineConfig;
use crate::pipeline::context::{Diagnostic, Stage, Summary};
use crate::pipeline::filter::FilterConfig;
use crate::processors::ContextWindow;
use crate::record::Record;
use crate::schema::SchemaConfig;

/// Receives non-fatal, per-line problems. Kept apart from formatted output.
pub type DiagnosticSink = Box<dyn FnMut(&Diagnostic)>;

fn stderr_sink() -> DiagnosticSink {
    Box::new(|diagnostic: &Diagnostic| eprintln!("    ↳ {}", diagnostic))
}

#[derive(Debug, Default, Clone, Copy)]
struct LineOutcome {
    filtered: bool,
    errored: bool,
}

/// Main pipeline orchestrator: parse, filter, window and render one line at
/// a time, falling back to the raw bytes whenever a stage fails.
pub struct StreamPipeline {
    config: PipelineConfig,
    schema: SchemaConfig,
    filter: FilterConfig,
    window: ContextWindow,
    output: OutputSchema,
    diagnostics: DiagnosticSink,
    stats: Summary,
    line_number: usize,
}

impl StreamPipeline {
    pub fn new(
        config: PipelineConfig,
        schema: SchemaConfig,
        filter: FilterConfig,
        window: ContextWindow,
        output: OutputSchema,
    ) -> Self {
        StreamPipeline {
            config,
            schema,
            filter,
            window,
            output,
            diagnostics: stderr_sink(),
            stats: Summary::default(),
            line_number: 0,
        }
    }

    /// Replace the default stderr diagnostic sink.
    pub fn with_diagnostics(mut self, sink: impl FnMut(&Diagnostic) + 'static) -> Self {
        self.diagnostics = Box::new(sink);
        self
    }

    /// Counts accumulated over every stream processed so far.
    pub fn summary(&self) -> Summary {
        self.stats
    }

    pub fn schema(&self) -> &SchemaConfig {
        &self.schema
    }

    pub fn output(&self) -> &OutputSchema {
        &self.output
    }

    /// Process a single file/stream. State carries over between calls, so
    /// several inputs can be fed through one pipeline in order.
    ///
    /// Output is flushed after every input line. Read and write failures are
    /// fatal; a partial line read before a read failure is still rendered.
    pub fn process_stream<R: BufRead, W: Write>(
        &mut self,
        mut input: R,
        output: &mut W,
    ) -> Result<Summary, ProcessingError> {
        let limit = self.config.max_line_length as u64 + 1;
        let mut line = Vec::new();
        let mut rendered = Vec::new();

        loop {
            line.clear();
            rendered.clear();
            match (&mut input).take(limit).read_until(b'\n', &mut line) {
                Ok(0) => break,
                Ok(n) => {
                    if n as u64 == limit && line.last() != Some(&b'\n') {
                        return Err(ProcessingError::LineTooLong {
                            line: self.line_number + 1,
                            max_length: self.config.max_line_length,
                        });
                    }
                    self.process_line(strip_line_ending(&line), &mut rendered);
                    self.write(output, &rendered)?;
                }
                Err(source) => {
                    let failed_at = self.line_number + 1;
                    if !line.is_empty() {
                        self.process_line(strip_line_ending(&line), &mut rendered);
                        self.write(output, &rendered)?;
                    }
                    if is_interrupted(&source) {
                        debug!(line = failed_at, "input interrupted");
                        return Err(ProcessingError::Interrupted);
                    }
                    return Err(ProcessingError::Read {
                        line: failed_at,
                        source,
                    });
                }
            }
        }

        debug!(
            lines_read = self.stats.lines_read,
            lines_filtered = self.stats.lines_filtered,
            lines_errored = self.stats.lines_errored,
            "finished input"
        );
        Ok(self.stats)
    }

    /// Run one input line (without its line ending) through every stage and
    /// append whatever it renders to `out`. Never fails: faults are reported
    /// to the diagnostic sink and the raw line is written instead.
    ///
    /// Lines that fail to parse or filter still go through the context
    /// window as selected raw records, so output keeps input order.
    pub fn process_line(&mut self, raw: &[u8], out: &mut Vec<u8>) {
        self.line_number += 1;
        self.stats.lines_read += 1;

        let (record, mut outcome) =
            match panic::catch_unwind(AssertUnwindSafe(|| self.classify(raw))) {
                Ok(classified) => classified,
                Err(payload) => {
                    self.recovered(self.line_number, payload.as_ref());
                    let outcome = LineOutcome {
                        filtered: false,
                        errored: true,
                    };
                    (Record::verbatim(raw, self.line_number), outcome)
                }
            };

        let mut admitted = Vec::new();
        self.window.admit(record, !outcome.filtered, &mut admitted);
        if self.render(admitted, out) {
            outcome.errored = true;
        }

        if outcome.filtered {
            self.stats.lines_filtered += 1;
        }
        if outcome.errored {
            self.stats.lines_errored += 1;
        }
    }

    /// Parse and filter one line. Failed lines come back as verbatim records.
    fn classify(&mut self, raw: &[u8]) -> (Record, LineOutcome) {
        let mut outcome = LineOutcome::default();

        let mut record = self.schema.parse(raw);
        record.line = self.line_number;
        if self.schema.strict && record.has_error() {
            self.report(self.line_number, Stage::Parse, record.errors.to_string());
            outcome.errored = true;
            return (Record::verbatim(raw, self.line_number), outcome);
        }

        match self.filter.run(&mut record) {
            Ok(filtered) => outcome.filtered = filtered,
            Err(err) => {
                self.report(self.line_number, Stage::Filter, err.to_string());
                outcome.errored = true;
                return (Record::verbatim(raw, self.line_number), outcome);
            }
        }
        (record, outcome)
    }

    /// Format each admitted record on its own, echoing the raw bytes of any
    /// record the formatter rejects or panics on. Returns whether one did.
    fn render(&mut self, admitted: Vec<Record>, out: &mut Vec<u8>) -> bool {
        let columns = self.schema.columns();
        let mut errored = false;
        for record in admitted {
            let output = &mut self.output;
            match panic::catch_unwind(AssertUnwindSafe(|| output.emit(&record, columns, out))) {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => self.report(record.line, Stage::Format, err.to_string()),
                Err(payload) => self.recovered(record.line, payload.as_ref()),
            }
            echo_raw(&record.raw, out);
            errored = true;
        }
        errored
    }

    fn recovered(&mut self, line: usize, payload: &(dyn Any + Send)) {
        let message = panic_message(payload);
        warn!(line, %message, "recovered from panic");
        self.report(line, Stage::Panic, message);
    }

    fn report(&mut self, line: usize, stage: Stage, message: String) {
        let diagnostic = Diagnostic {
            line,
            stage,
            message,
        };
        (self.diagnostics)(&diagnostic);
    }

    fn write<W: Write>(&self, output: &mut W, rendered: &[u8]) -> Result<(), ProcessingError> {
        output
            .write_all(rendered)
            .and_then(|_| output.flush())
            .map_err(|source| ProcessingError::Write {
                line: self.line_number,
                source,
            })
    }
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn echo_raw(raw: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(raw);
    out.push(b'\n');
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_line_ending() {
        assert_eq!(strip_line_ending(b"abc\n"), b"abc");
        assert_eq!(strip_line_ending(b"abc\r\n"), b"abc");
        assert_eq!(strip_line_ending(b"abc"), b"abc");
        assert_eq!(strip_line_ending(b"\n"), b"");
    }

    #[test]
    fn test_panic_message() {
        let payload = panic::catch_unwind(|| panic!("boom {}", 1)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom 1");
        let payload = panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static");
    }
}

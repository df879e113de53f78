use anyhow::Context;
use chrono::Utc;
use clap::{ArgAction, Parser};
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use jlog::interruptible::{cancel_on_signal, InterruptibleReader};
use jlog::{
    filter_functions, ColorScheme, ContextWindow, DefaultFormatter, FilterBuilder, NativeEngine,
    OutputConfig, OutputSchema, PipelineConfig, ProcessingError, RegexScope, SchemaConfig,
    StarlarkEngine, StreamPipeline, TimeMode,
};

#[derive(Parser)]
#[command(name = "jlog")]
#[command(about = "Pretty-print, filter and window structured JSON logs")]
#[command(version = "0.1.0")]
#[command(args_override_self = true)]
struct Args {
    /// Input files (default: stdin)
    #[arg(value_name = "FILE")]
    files: Vec<PathBuf>,

    /// Best-effort parsing: salvage malformed lines instead of echoing them
    #[arg(short = 'l', long, env = "JLOG_LAX")]
    lax: bool,

    /// Key holding the log level (disables auto-detection)
    #[arg(long, env = "JLOG_LEVELKEY")]
    levelkey: Option<String>,

    /// Key holding the timestamp (disables auto-detection)
    #[arg(long, env = "JLOG_TIMEKEY")]
    timekey: Option<String>,

    /// Key holding the message (disables auto-detection)
    #[arg(long, env = "JLOG_MESSAGEKEY")]
    messagekey: Option<String>,

    /// Lines have no level
    #[arg(long, env = "JLOG_NOLEVELKEY")]
    nolevelkey: bool,

    /// Lines have no timestamp
    #[arg(long, env = "JLOG_NOTIMEKEY")]
    notimekey: bool,

    /// Lines have no message
    #[arg(long, env = "JLOG_NOMESSAGEKEY")]
    nomessagekey: bool,

    /// Drop a key from every line
    #[arg(long, action = ArgAction::Append, value_delimiter = ',', env = "JLOG_DELETE")]
    delete: Vec<String>,

    /// Merge the object under a key into the top level
    #[arg(long, action = ArgAction::Append, value_delimiter = ',', env = "JLOG_UPGRADE")]
    upgrade: Vec<String>,

    /// Print repeated field values instead of eliding them
    #[arg(long, env = "JLOG_NO_ELIDE")]
    no_elide: bool,

    /// Print times relative to the start of the run
    #[arg(short = 'r', long, env = "JLOG_RELATIVE", conflicts_with = "only_subseconds")]
    relative: bool,

    /// Time layout: a name like rfc3339 or stampmilli, or a strftime string
    #[arg(short = 't', long, default_value = "stamp", env = "JLOG_TIME_FORMAT")]
    time_format: String,

    /// Time zone for absolute times: local, utc or an offset like +02:00
    #[arg(long, default_value = "local", env = "JLOG_ZONE")]
    zone: String,

    /// Print only the fractional seconds when the second didn't change
    #[arg(short = 's', long, env = "JLOG_ONLY_SUBSECONDS")]
    only_subseconds: bool,

    /// Don't print the summary at the end
    #[arg(long, env = "JLOG_NO_SUMMARY")]
    no_summary: bool,

    /// Fields to print first, in this order
    #[arg(short = 'p', long, action = ArgAction::Append, value_delimiter = ',', env = "JLOG_PRIORITY")]
    priority: Vec<String>,

    /// Fields whose key is printed in the highlight color
    #[arg(
        short = 'H',
        long,
        action = ArgAction::Append,
        value_delimiter = ',',
        default_value = "err,error,warn,warning",
        env = "JLOG_HIGHLIGHT"
    )]
    highlight: Vec<String>,

    /// Lines of context after a match
    #[arg(short = 'A', long = "after-context", env = "JLOG_AFTER_CONTEXT")]
    after: Option<usize>,

    /// Lines of context before a match
    #[arg(short = 'B', long = "before-context", env = "JLOG_BEFORE_CONTEXT")]
    before: Option<usize>,

    /// Lines of context before and after a match
    #[arg(short = 'C', long = "context", default_value_t = 0, env = "JLOG_CONTEXT")]
    context: usize,

    /// Only print lines matching this regex
    #[arg(short = 'g', long, env = "JLOG_REGEX")]
    regex: Option<String>,

    /// Don't print lines matching this regex
    #[arg(short = 'G', long, env = "JLOG_NO_REGEX")]
    no_regex: Option<String>,

    /// Where regexes look: any of k (keys), m (message), v (values)
    #[arg(short = 'S', long, default_value = "kmv", env = "JLOG_REGEX_SCOPE")]
    regex_scope: String,

    /// Starlark filter program
    #[arg(short = 'e', long, env = "JLOG_PROGRAM")]
    program: Option<String>,

    /// Native filter steps as JSON, an alternative to --program
    #[arg(long, conflicts_with = "program", env = "JLOG_STEPS")]
    steps: Option<String>,

    /// Directory searched by load() in filter programs
    #[arg(short = 'L', long, action = ArgAction::Append, env = "JLOG_MODULE_PATH")]
    module_path: Vec<PathBuf>,

    /// Never color output
    #[arg(short = 'M', long, conflicts_with = "color", env = "JLOG_NO_COLOR")]
    no_color: bool,

    /// Always color output
    #[arg(short = 'c', long, env = "JLOG_COLOR")]
    color: bool,

    /// Maximum line length
    #[arg(long, default_value = "1048576", env = "JLOG_MAX_LINE_LENGTH")] // 1MB
    max_line_length: usize,

    /// Debug logging on stderr (same as JLOG_LOG=jlog=debug)
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn color_choice(&self) -> Option<bool> {
        match (self.color, self.no_color) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

fn main() {
    let args = Args::parse();
    init_tracing(args.debug);

    if let Err(e) = run(args) {
        if is_broken_pipe(&e) {
            std::process::exit(2);
        }
        eprintln!("jlog: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("jlog=debug")
    } else {
        EnvFilter::try_from_env("JLOG_LOG").unwrap_or_else(|_| EnvFilter::new("error"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(args: Args) -> anyhow::Result<()> {
    let config = PipelineConfig {
        max_line_length: args.max_line_length,
        ..Default::default()
    };

    let mut schema = SchemaConfig::default();
    schema.strict = !args.lax;
    if let Some(key) = &args.timekey {
        schema.time_key = key.clone();
    }
    if let Some(key) = &args.levelkey {
        schema.level_key = key.clone();
    }
    if let Some(key) = &args.messagekey {
        schema.message_key = key.clone();
    }
    schema.no_time_key = args.notimekey;
    schema.no_level_key = args.nolevelkey;
    schema.no_message_key = args.nomessagekey;
    schema.delete_keys = args.delete.clone();
    schema.upgrade_keys = args.upgrade.clone();

    let mut filter = FilterBuilder::new().scope(args.regex_scope.parse::<RegexScope>()?);
    if let Some(rx) = &args.regex {
        filter = filter.match_regex(rx)?;
    }
    if let Some(rx) = &args.no_regex {
        filter = filter.no_match_regex(rx)?;
    }
    if let Some(program) = &args.program {
        filter = filter.program(&StarlarkEngine, program, filter_functions, &args.module_path)?;
    }
    if let Some(steps) = &args.steps {
        filter = filter.program(&NativeEngine, steps, (), &args.module_path)?;
    }

    let window = ContextWindow::new(
        args.before.unwrap_or(args.context),
        args.after.unwrap_or(args.context),
    );

    let time_mode = if args.relative {
        TimeMode::Relative
    } else if args.only_subseconds {
        TimeMode::SubSeconds
    } else {
        TimeMode::Absolute
    };
    let output_config = OutputConfig {
        time_mode,
        layout: args.time_format.parse()?,
        zone: args.zone.parse()?,
        start: Utc::now(),
        elide: !args.no_elide,
        priority_fields: args.priority.clone(),
        highlight_fields: args.highlight.clone(),
        colors: ColorScheme::detect(args.color_choice()),
    };
    let output_schema = OutputSchema::new(
        &output_config,
        Box::new(DefaultFormatter::new(&output_config)),
    );

    let mut pipeline = StreamPipeline::new(
        config.clone(),
        schema,
        filter.build(),
        window,
        output_schema,
    );

    let cancel = cancel_on_signal().context("install signal handler")?;
    let mut output = io::BufWriter::with_capacity(config.buffer_size, io::stdout());

    let result = if args.files.is_empty() {
        process(&mut pipeline, io::stdin(), &config, &cancel, &mut output)
    } else {
        let mut result = Ok(());
        for path in &args.files {
            let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
            result = process(&mut pipeline, file, &config, &cancel, &mut output);
            if result.is_err() {
                break;
            }
        }
        result
    };

    if let Err(e) = &result {
        if !matches!(e, ProcessingError::Interrupted) && !e.is_broken_pipe() {
            print_summary(&args, &pipeline);
        }
    }
    finish(result, &mut output)?;
    print_summary(&args, &pipeline);
    Ok(())
}

/// Flush what is left unless the run failed. An interrupted run still flushes
/// and ends cleanly.
fn finish<W: Write>(result: Result<(), ProcessingError>, output: &mut W) -> anyhow::Result<()> {
    match result {
        Ok(()) | Err(ProcessingError::Interrupted) => output.flush().context("flush output"),
        Err(e) => Err(e.into()),
    }
}

fn is_broken_pipe(e: &anyhow::Error) -> bool {
    e.chain().any(|cause| {
        cause
            .downcast_ref::<ProcessingError>()
            .is_some_and(ProcessingError::is_broken_pipe)
            || cause
                .downcast_ref::<io::Error>()
                .is_some_and(|e| e.kind() == io::ErrorKind::BrokenPipe)
    })
}

fn process<R: Read + Send + 'static, W: Write>(
    pipeline: &mut StreamPipeline,
    input: R,
    config: &PipelineConfig,
    cancel: &crossbeam_channel::Receiver<()>,
    output: &mut W,
) -> Result<(), ProcessingError> {
    let reader = InterruptibleReader::new(input, cancel.clone());
    let input = BufReader::with_capacity(config.buffer_size, reader);
    pipeline.process_stream(input, output).map(|_| ())
}

fn print_summary(args: &Args, pipeline: &StreamPipeline) {
    if !args.no_summary {
        eprintln!("  {}", pipeline.summary());
    }
}

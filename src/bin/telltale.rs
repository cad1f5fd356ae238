//! Telltale CLI - Command-line interface for Telltale
//!
//! Commands:
//! - detect: Evaluate every configured channel of a session
//! - values: Transform-only pass for fitting channel baselines
//! - summarize: Windowed anomaly summaries
//! - speakers: Speaker intervals of a session
//! - config: Print the effective configuration

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use telltale::speaker::{intervals_for, speaker_intervals, SpeakerInterval, SpeakerTimeline};
use telltale::{
    Channel, DetectError, PipelineConfig, ProcessingMode, Session, SessionProcessor,
    SummaryEncoder, WindowSummarizer, PRODUCER_NAME, TELLTALE_VERSION,
};

/// Telltale - Behavioral anomaly and episode detection
#[derive(Parser)]
#[command(name = "telltale")]
#[command(version = TELLTALE_VERSION)]
#[command(about = "Detect behavioral anomalies and episodes in recorded sessions", long_about = None)]
struct Cli {
    /// Default log filter when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command that runs the pipeline
#[derive(clap::Args)]
struct PipelineArgs {
    /// Session file path (use - for stdin)
    #[arg(short, long)]
    input: PathBuf,

    /// Output file path (use - for stdout)
    #[arg(short, long, default_value = "-")]
    output: PathBuf,

    /// Configuration file (JSON); defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Forest seed for reproducible output
    #[arg(long)]
    seed: Option<u64>,

    /// Channels to process (comma-separated)
    #[arg(long, value_delimiter = ',')]
    channels: Vec<Channel>,

    /// Target speaker label
    #[arg(long)]
    target: Option<String>,

    /// Process channels one after another on the calling thread
    #[arg(long)]
    sequential: bool,

    /// Output format
    #[arg(long, default_value = "json-pretty")]
    format: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate every configured channel of a session
    Detect(PipelineArgs),

    /// Transform channels without scoring
    Values(PipelineArgs),

    /// Summarize anomalies in fixed-length windows
    Summarize {
        #[command(flatten)]
        pipeline: PipelineArgs,

        /// Window length in seconds
        #[arg(long, default_value = "30")]
        window: f64,
    },

    /// List speaker intervals of a session
    Speakers {
        /// Session file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Only list intervals of this speaker
        #[arg(long)]
        speaker: Option<String>,
    },

    /// Print the effective configuration
    Config {
        /// Configuration file to validate and print
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one channel per line)
    Ndjson,
    /// Compact JSON
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), TelltaleCliError> {
    match cli.command {
        Commands::Detect(args) => cmd_detect(&args),
        Commands::Values(args) => cmd_values(&args),
        Commands::Summarize { pipeline, window } => cmd_summarize(&pipeline, window),
        Commands::Speakers { input, speaker } => cmd_speakers(&input, speaker.as_deref()),
        Commands::Config { config } => cmd_config(config.as_deref()),
    }
}

fn cmd_detect(args: &PipelineArgs) -> Result<(), TelltaleCliError> {
    let session = read_session(&args.input)?;
    let processor = SessionProcessor::new(build_config(args, ProcessingMode::Evaluation)?)?;
    let evaluation = processor.evaluate(&session)?;

    let body = match args.format {
        OutputFormat::Ndjson => ndjson(&evaluation.channels)?,
        OutputFormat::Json => serde_json::to_string(&evaluation)?,
        OutputFormat::JsonPretty => serde_json::to_string_pretty(&evaluation)?,
    };
    write_output(&args.output, &body)?;

    if evaluation.channels.is_empty() && !evaluation.failures.is_empty() {
        return Err(TelltaleCliError::AllChannelsFailed(evaluation.failures.len()));
    }
    Ok(())
}

fn cmd_values(args: &PipelineArgs) -> Result<(), TelltaleCliError> {
    let session = read_session(&args.input)?;
    let processor = SessionProcessor::new(build_config(args, ProcessingMode::ValueOnly)?)?;
    let values = processor.values(&session)?;

    let body = match args.format {
        OutputFormat::Ndjson => ndjson(&values.channels)?,
        OutputFormat::Json => serde_json::to_string(&values)?,
        OutputFormat::JsonPretty => serde_json::to_string_pretty(&values)?,
    };
    write_output(&args.output, &body)
}

fn cmd_summarize(args: &PipelineArgs, window: f64) -> Result<(), TelltaleCliError> {
    let session = read_session(&args.input)?;
    let processor = SessionProcessor::new(build_config(args, ProcessingMode::Evaluation)?)?;
    let evaluation = processor.evaluate(&session)?;

    let windows = WindowSummarizer::new().windows(&evaluation, window)?;
    let payload = SummaryEncoder::new().encode(&session.session_id, windows);

    let body = match args.format {
        OutputFormat::Ndjson => ndjson(&payload.windows)?,
        OutputFormat::Json => serde_json::to_string(&payload)?,
        OutputFormat::JsonPretty => serde_json::to_string_pretty(&payload)?,
    };
    write_output(&args.output, &body)
}

fn cmd_speakers(input: &Path, speaker: Option<&str>) -> Result<(), TelltaleCliError> {
    let session = read_session(input)?;
    let timeline = SpeakerTimeline::from_session(&session);
    let intervals = speaker_intervals(&timeline, &session.times(), session.cadence_sec);

    let selected: Vec<&SpeakerInterval> = match speaker {
        Some(label) => intervals_for(&intervals, label).collect(),
        None => intervals.iter().collect(),
    };
    println!("{}", serde_json::to_string_pretty(&selected)?);
    Ok(())
}

fn cmd_config(path: Option<&Path>) -> Result<(), TelltaleCliError> {
    let config = match path {
        Some(path) => PipelineConfig::load_from_file(path)?,
        None => PipelineConfig::default(),
    };
    println!("{}", config.to_json()?);
    Ok(())
}

// Helper functions

fn build_config(
    args: &PipelineArgs,
    mode: ProcessingMode,
) -> Result<PipelineConfig, TelltaleCliError> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load_from_file(path)?,
        None => PipelineConfig::default(),
    };
    if args.seed.is_some() {
        config.forest.seed = args.seed;
    }
    if !args.channels.is_empty() {
        config.channels = args.channels.clone();
    }
    if let Some(target) = &args.target {
        config.target_speaker = target.clone();
    }
    if args.sequential {
        config.parallel = false;
    }
    config.mode = mode;
    Ok(config)
}

fn read_session(input: &Path) -> Result<Session, TelltaleCliError> {
    let content = if input.as_os_str() == "-" {
        if atty::is(atty::Stream::Stdin) {
            return Err(TelltaleCliError::NoInput);
        }
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(input)?
    };
    if content.trim().is_empty() {
        return Err(TelltaleCliError::NoInput);
    }
    Ok(serde_json::from_str(&content)?)
}

fn write_output(output: &Path, body: &str) -> Result<(), TelltaleCliError> {
    if output.as_os_str() == "-" {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle.write_all(body.as_bytes())?;
        if !body.ends_with('\n') {
            handle.write_all(b"\n")?;
        }
        handle.flush()?;
    } else {
        fs::write(output, body)?;
    }
    Ok(())
}

fn ndjson<T: serde::Serialize>(items: &[T]) -> Result<String, TelltaleCliError> {
    let mut lines: Vec<String> = Vec::new();
    for item in items {
        lines.push(serde_json::to_string(item)?);
    }
    Ok(lines.join("\n") + "\n")
}

// Error types

#[derive(Debug)]
enum TelltaleCliError {
    Io(io::Error),
    Detect(DetectError),
    Json(serde_json::Error),
    NoInput,
    AllChannelsFailed(usize),
}

impl From<io::Error> for TelltaleCliError {
    fn from(e: io::Error) -> Self {
        TelltaleCliError::Io(e)
    }
}

impl From<DetectError> for TelltaleCliError {
    fn from(e: DetectError) -> Self {
        TelltaleCliError::Detect(e)
    }
}

impl From<serde_json::Error> for TelltaleCliError {
    fn from(e: serde_json::Error) -> Self {
        TelltaleCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    producer: &'static str,
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<TelltaleCliError> for CliError {
    fn from(e: TelltaleCliError) -> Self {
        let (code, message, hint) = match e {
            TelltaleCliError::Io(e) => (
                "IO_ERROR",
                e.to_string(),
                Some("Check file paths and permissions"),
            ),
            TelltaleCliError::Detect(e) => {
                let (code, hint) = match &e {
                    DetectError::EmptySession => ("EMPTY_SESSION", "Ensure the session has frames"),
                    DetectError::InvalidConfig(_) => {
                        ("INVALID_CONFIG", "Run 'telltale config' to see the defaults")
                    }
                    _ => ("DETECT_ERROR", "Check the session against the input format"),
                };
                (code, e.to_string(), Some(hint))
            }
            TelltaleCliError::Json(e) => ("JSON_ERROR", e.to_string(), Some("Check JSON syntax")),
            TelltaleCliError::NoInput => (
                "NO_INPUT",
                "No session found in input".to_string(),
                Some("Pipe a session JSON document or pass --input <file>"),
            ),
            TelltaleCliError::AllChannelsFailed(count) => (
                "ALL_CHANNELS_FAILED",
                format!("All {count} channels failed"),
                Some("See the failures list in the output"),
            ),
        };
        CliError {
            producer: PRODUCER_NAME,
            code: code.to_string(),
            message,
            hint: hint.map(str::to_string),
        }
    }
}

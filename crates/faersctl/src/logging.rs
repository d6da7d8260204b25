//! Logging bootstrap shared by all faersctl subcommands. CLI flags override
//! the configuration file, which overrides the interactive-terminal default.

use models::LoggingConfig;
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Debug, clap::Args)]
pub struct LogArgs {
    /// The log verbosity: an env-filter directive like `info` or
    /// `debug,sqlx=warn`.
    #[arg(long = "log.level", group = "logging", global = true)]
    pub level: Option<String>,

    #[arg(long = "log.format", value_enum, global = true, group = "logging")]
    pub format: Option<LogFormat>,
}

/// The format for logs.
#[derive(Debug, clap::ValueEnum, Clone, Copy)]
pub enum LogFormat {
    /// Logs are written to stderr in jsonl format, one flattened event per
    /// line, for programmatic consumers.
    Json,
    /// Plain text with no colors.
    Text,
    /// Same as plain text, but with colors for interactive terminals.
    Color,
}

fn default_text_format() -> LogFormat {
    if atty::is(atty::Stream::Stderr) {
        LogFormat::Color
    } else {
        LogFormat::Text
    }
}

/// Initializes logging once, from the CLI args and the file configuration.
/// Panics if called twice.
pub fn init_logging(args: &LogArgs, config: &LoggingConfig) {
    let level = args
        .level
        .clone()
        .unwrap_or_else(|| config.level.clone());

    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(level.as_str())
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        // CLOSE span events give one line per finished stage, with timing.
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false);

    let format = args.format.unwrap_or(match config.format {
        models::LogFormat::Json => LogFormat::Json,
        models::LogFormat::Text => default_text_format(),
    });

    match format {
        LogFormat::Json => {
            builder
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(false)
                .init();
        }
        LogFormat::Text => {
            builder.compact().with_ansi(false).init();
        }
        LogFormat::Color => {
            builder.compact().with_ansi(true).init();
        }
    }
}

//! Structured logging initialization for pistat.
//!
//! The CLI writes telemetry as JSON on stdout, so console logs default to
//! stderr. An optional daily-rotating log file can be enabled for boards that
//! run the collector unattended.

use crate::config::{EnvError, EnvParser};
use anyhow::Result;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, fmt,
    fmt::writer::{BoxMakeWriter, MakeWriterExt},
    util::SubscriberInitExt,
};

/// Logging output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-friendly, pretty-printed logs.
    Pretty,
    /// JSON-formatted logs for machine parsing.
    Json,
    /// Compact single-line logs.
    Compact,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            "compact" => Some(Self::Compact),
            _ => None,
        }
    }
}

/// Configuration for logging initialization.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base log level (trace, debug, info, warn, error, off).
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// Optional file path for rotating logs.
    pub file_path: Option<PathBuf>,
    /// Per-target log level overrides.
    pub targets: BTreeMap<String, String>,
    /// Include target in log output.
    pub with_target: bool,
    /// Include file and line number in log output.
    pub with_file_line: bool,
    /// Write console logs to stderr instead of stdout.
    pub use_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            file_path: None,
            targets: BTreeMap::new(),
            with_target: true,
            with_file_line: false,
            use_stderr: true,
        }
    }
}

impl LogConfig {
    /// Build a logging configuration from `PISTAT_LOG_*` environment variables.
    ///
    /// Supported environment variables:
    /// - PISTAT_LOG_LEVEL
    /// - PISTAT_LOG_FORMAT (pretty|json|compact)
    /// - PISTAT_LOG_FILE (path to rotating log file)
    /// - PISTAT_LOG_TARGETS (comma-separated target=level list)
    pub fn from_env(default_level: &str) -> Self {
        Self::from_parser(&mut EnvParser::new(), default_level)
    }

    /// Build a logging configuration from an existing parser.
    ///
    /// Invalid values fall back to defaults and are left in the parser's
    /// error list for the caller to report.
    pub fn from_parser(parser: &mut EnvParser, default_level: &str) -> Self {
        let mut config = Self {
            level: parser.get_log_level("LOG_LEVEL", default_level).value,
            ..Self::default()
        };

        if let Some(format) = parser.get_optional_string("LOG_FORMAT").value {
            match LogFormat::parse(&format) {
                Some(parsed) => config.format = parsed,
                None => parser.push_error(EnvError::InvalidValue {
                    var: parser.var_name("LOG_FORMAT"),
                    expected: "pretty, json or compact".to_string(),
                    value: format,
                }),
            }
        }

        if let Some(path) = parser.get_optional_string("LOG_FILE").value
            && !path.trim().is_empty()
        {
            config.file_path = Some(PathBuf::from(path));
        }

        config.targets = parse_target_overrides(&parser.get_string("LOG_TARGETS", "").value);

        config
    }

    /// Override the base log level.
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Override the output format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Build the effective EnvFilter, honoring RUST_LOG if set.
    pub fn env_filter(&self) -> EnvFilter {
        if std::env::var_os("RUST_LOG").is_some()
            && let Ok(filter) = EnvFilter::try_from_default_env()
        {
            return filter;
        }

        let mut filter = self.level.clone();
        for (target, level) in &self.targets {
            filter.push_str(&format!(",{}={}", target, level));
        }
        EnvFilter::new(filter)
    }
}

/// Guards required to keep background logging workers alive.
pub struct LoggingGuards {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize tracing-based logging for the current process.
///
/// Returns guards that must be kept alive for the duration of the program
/// (particularly when file logging is enabled). Calling this twice is not an
/// error; the first subscriber stays installed.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuards> {
    let filter = config.env_filter();
    let (writer, file_guard) = build_writer(config);
    let ansi = file_guard.is_none() && config.format != LogFormat::Json;

    let builder = fmt::Subscriber::builder()
        .with_writer(writer)
        .with_target(config.with_target)
        .with_file(config.with_file_line)
        .with_line_number(config.with_file_line)
        .with_env_filter(filter)
        .with_ansi(ansi);

    match config.format {
        LogFormat::Pretty => finish_subscriber(builder.pretty().finish(), file_guard),
        LogFormat::Json => finish_subscriber(builder.json().finish(), file_guard),
        LogFormat::Compact => finish_subscriber(builder.compact().finish(), file_guard),
    }
}

fn build_writer(config: &LogConfig) -> (BoxMakeWriter, Option<WorkerGuard>) {
    let Some(path) = config.file_path.as_ref() else {
        return (console_writer(config.use_stderr), None);
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path.file_name().unwrap_or_else(|| OsStr::new("pistat.log"));
    let appender = tracing_appender::rolling::daily(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    let writer = if config.use_stderr {
        BoxMakeWriter::new(std::io::stderr.and(non_blocking))
    } else {
        BoxMakeWriter::new(std::io::stdout.and(non_blocking))
    };
    (writer, Some(guard))
}

fn console_writer(use_stderr: bool) -> BoxMakeWriter {
    if use_stderr {
        BoxMakeWriter::new(std::io::stderr)
    } else {
        BoxMakeWriter::new(std::io::stdout)
    }
}

fn finish_subscriber<S>(subscriber: S, file_guard: Option<WorkerGuard>) -> Result<LoggingGuards>
where
    S: Subscriber + Send + Sync + 'static,
{
    if let Err(err) = subscriber.try_init()
        && !err.to_string().contains("already")
    {
        return Err(err.into());
    }

    Ok(LoggingGuards {
        _file_guard: file_guard,
    })
}

fn parse_target_overrides(value: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for entry in value.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let Some((target, level)) = entry.split_once('=') else {
            continue;
        };
        let target = target.trim();
        let level = level.trim().to_lowercase();
        if target.is_empty() || !is_valid_level(&level) {
            continue;
        }
        map.insert(target.to_string(), level);
    }
    map
}

pub(crate) fn is_valid_level(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error" | "off")
}

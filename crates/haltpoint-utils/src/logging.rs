//! # Logging Utilities
//!
//! Logging infrastructure for Haltpoint using `tracing`.
//!
//! This module provides structured logging with support for:
//! - Human-readable output for development and JSON for machines
//! - Environment variable configuration
//! - An optional log file next to the console output
//!
//! Console output goes to **stderr**: the command-line driver prints stop
//! reasons and register dumps on stdout, and the two must not interleave.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use haltpoint_utils::init_logging;
//!
//! // Keep the guard alive until the program ends, or buffered file lines are lost.
//! let _guard = init_logging().expect("Failed to initialize logging");
//!
//! tracing::info!("Application started");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: level filter (e.g., `RUST_LOG=debug`, `RUST_LOG=haltpoint_core=trace`)
//! - `HALTPOINT_LOG_FORMAT`: output format (`json` or `pretty`, default: `pretty`)
//! - `HALTPOINT_LOG_FILE`: optional log file; a directory gets a dated
//!   `YYYY-MM-DD-haltpoint.log` inside it

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, io};

use chrono::Utc;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Variable selecting the output format.
pub const LOG_FORMAT_VAR: &str = "HALTPOINT_LOG_FORMAT";
/// Variable naming the log file or directory.
pub const LOG_FILE_VAR: &str = "HALTPOINT_LOG_FILE";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat
{
    /// Pretty-printed, human-readable format
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

impl FromStr for LogFormat
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "dev" | "development" => Ok(LogFormat::Pretty),
            "json" | "prod" | "production" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidFormat(s.to_string())),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel
{
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level (default)
    Info,
    /// Debug level
    Debug,
    /// Trace level (most verbose)
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" | "err" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" | "dbg" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(LoggingError::InvalidLevel(s.to_string())),
        }
    }
}

/// Resolved logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogSettings
{
    /// Output format for console and file.
    pub format: LogFormat,
    /// Level forced by the caller; overrides `RUST_LOG`.
    pub level: Option<LogLevel>,
    /// Log file, if any.
    pub file: Option<PathBuf>,
}

impl LogSettings
{
    /// Settings from the `HALTPOINT_LOG_*` environment variables.
    ///
    /// An unparsable format falls back to [`LogFormat::Pretty`].
    #[must_use]
    pub fn from_env() -> Self
    {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Settings from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let format = lookup(LOG_FORMAT_VAR).and_then(|value| value.parse().ok()).unwrap_or_default();
        let file = lookup(LOG_FILE_VAR).filter(|value| !value.is_empty()).map(PathBuf::from);
        Self {
            format,
            level: None,
            file,
        }
    }

    /// The file log lines are appended to. A directory gets a dated file.
    #[must_use]
    pub fn resolved_file(&self) -> Option<PathBuf>
    {
        let file = self.file.as_ref()?;
        if file.is_dir() {
            let today = Utc::now().format("%Y-%m-%d");
            Some(file.join(format!("{today}-haltpoint.log")))
        } else {
            Some(file.clone())
        }
    }

    fn filter(&self) -> EnvFilter
    {
        // Priority: explicit level, then RUST_LOG, then INFO.
        match self.level {
            Some(level) => EnvFilter::new(Level::from(level).to_string()),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string())),
        }
    }
}

/// Keeps the background file writer alive; buffered lines are flushed when
/// it is dropped.
#[derive(Debug)]
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard
{
    _file: Option<WorkerGuard>,
    /// Where file output goes, if enabled.
    pub file: Option<PathBuf>,
}

/// Initialize logging from the environment.
///
/// ## Errors
///
/// Returns an error if a global subscriber is already installed or the log
/// file cannot be opened.
pub fn init_logging() -> Result<LoggingGuard, LoggingError>
{
    init_with(&LogSettings::from_env())
}

/// Initialize logging with an explicit level and format; `HALTPOINT_LOG_FILE`
/// is still honoured.
///
/// ```rust,no_run
/// use haltpoint_utils::{LogFormat, LogLevel, init_logging_with_level};
///
/// let _guard = init_logging_with_level(LogLevel::Debug, LogFormat::Pretty)
///     .expect("Failed to initialize logging");
/// ```
///
/// ## Errors
///
/// Same as [`init_logging`].
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<LoggingGuard, LoggingError>
{
    let settings = LogSettings {
        format,
        level: Some(level),
        ..LogSettings::from_env()
    };
    init_with(&settings)
}

/// Initialize logging from resolved settings.
///
/// ## Errors
///
/// Same as [`init_logging`].
pub fn init_with(settings: &LogSettings) -> Result<LoggingGuard, LoggingError>
{
    let mut layers: Vec<BoxedLayer> = vec![console_layer(settings.format, settings.filter())];

    let file = settings.resolved_file();
    let mut worker = None;
    if let Some(path) = &file {
        let (layer, guard) = file_layer(path, settings.format, settings.filter())?;
        layers.push(layer);
        worker = Some(guard);
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;

    Ok(LoggingGuard { _file: worker, file })
}

fn console_layer(format: LogFormat, filter: EnvFilter) -> BoxedLayer
{
    let layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_writer(io::stderr);
    match format {
        LogFormat::Pretty => layer.with_ansi(true).with_filter(filter).boxed(),
        LogFormat::Json => layer.json().with_current_span(true).with_filter(filter).boxed(),
    }
}

fn file_layer(path: &Path, format: LogFormat, filter: EnvFilter) -> Result<(BoxedLayer, WorkerGuard), LoggingError>
{
    let directory = path.parent().filter(|parent| !parent.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let name = path
        .file_name()
        .ok_or_else(|| LoggingError::FileError(io::Error::new(io::ErrorKind::InvalidInput, "log file has no name")))?;
    std::fs::create_dir_all(directory)?;

    // The file name already carries the date when one was wanted.
    let appender = tracing_appender::rolling::never(directory, name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_ansi(false);
    let layer = match format {
        LogFormat::Pretty => layer.with_filter(filter).boxed(),
        LogFormat::Json => layer.json().with_current_span(true).with_span_list(true).with_filter(filter).boxed(),
    };
    Ok((layer, guard))
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid log format
    #[error("Unknown log format: {0}. Use 'pretty' or 'json'")]
    InvalidFormat(String),

    /// Invalid log level
    #[error("Unknown log level: {0}. Use 'error', 'warn', 'info', 'debug', or 'trace'")]
    InvalidLevel(String),

    /// Failed to initialize logging
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// File logging error
    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}

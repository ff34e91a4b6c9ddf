//! # Structured Logging
//!
//! `tracing` subscriber setup with:
//!
//! - JSON, Pretty and Compact output formats
//! - Level filtering, overridable through `RUST_LOG`
//! - Optional log file
//! - Thread names, so pipeline worker output is attributable
//!
//! ## Example
//!
//! ```rust,ignore
//! use echoscan_core::observe::{init_logging, LogConfig, LogLevel};
//!
//! let config = LogConfig {
//!     level: LogLevel::Debug,
//!     ..Default::default()
//! };
//! init_logging(&config);
//!
//! tracing::info!(lines = 128, "Scan sequence rebuilt");
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::{fmt, fmt::writer::BoxMakeWriter, prelude::*, EnvFilter, Layer};

/// Log level configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Map a `-v` count onto a level (0 = info, 1 = debug, 2+ = trace).
    pub fn from_verbosity(count: u8) -> Self {
        match count {
            0 => LogLevel::Info,
            1 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Machine-readable
    Json,
    /// Multi-line, colored
    Pretty,
    /// One line per event
    #[default]
    Compact,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    /// Log file path (stderr when unset)
    pub file: Option<PathBuf>,
    /// Include source location (file:line)
    pub source_location: bool,
    pub thread_ids: bool,
    pub thread_names: bool,
    /// Module filter (e.g. "echoscan_session=debug,echoscan_sim=info")
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            file: None,
            source_location: false,
            thread_ids: false,
            thread_names: true,
            filter: None,
        }
    }
}

impl LogConfig {
    /// Verbose configuration for development.
    pub fn development() -> Self {
        Self {
            level: LogLevel::Debug,
            format: LogFormat::Pretty,
            source_location: true,
            ..Default::default()
        }
    }

    /// Errors only.
    pub fn quiet() -> Self {
        Self {
            level: LogLevel::Error,
            ..Default::default()
        }
    }

    fn env_filter(&self) -> EnvFilter {
        match self.filter {
            Some(ref custom) => {
                EnvFilter::try_new(custom).unwrap_or_else(|_| EnvFilter::new(self.level.to_string()))
            }
            None => EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(self.level.to_string())),
        }
    }

    fn writer(&self) -> BoxMakeWriter {
        if let Some(ref path) = self.file {
            match std::fs::OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => return BoxMakeWriter::new(Mutex::new(file)),
                Err(e) => eprintln!("cannot open log file {}: {}, logging to stderr", path.display(), e),
            }
        }
        BoxMakeWriter::new(std::io::stderr)
    }
}

/// Initialize the global logging subscriber.
///
/// Call once at startup; later calls are ignored.
pub fn init_logging(config: &LogConfig) {
    let base = fmt::layer()
        .with_writer(config.writer())
        .with_ansi(config.file.is_none())
        .with_file(config.source_location)
        .with_line_number(config.source_location)
        .with_thread_ids(config.thread_ids)
        .with_thread_names(config.thread_names);

    let layer = match config.format {
        LogFormat::Json => base.json().boxed(),
        LogFormat::Pretty => base.pretty().boxed(),
        LogFormat::Compact => base.compact().boxed(),
    };

    let _ = tracing_subscriber::registry()
        .with(layer)
        .with(config.env_filter())
        .try_init();
}

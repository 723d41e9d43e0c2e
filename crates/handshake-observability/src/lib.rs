//! # Handshake Observability
//!
//! Logging setup for processes that embed the login handshake.
//!
//! Callers invoke [`init`] or [`init_with_config`] once at startup and then
//! use plain `tracing` macros. Every event becomes one JSON line in an
//! append-only file (`~/.login-handshake/logs/handshake.jsonl` unless
//! configured otherwise), so a session can be followed with
//! `tail -f ... | jq`.
//!
//! Handshake logs sit next to credentials, so every field is passed through
//! [`redact`] before it is written. Field names that look like secrets and
//! long opaque values never reach the file.
//!
//! ```rust,ignore
//! fn main() -> anyhow::Result<()> {
//!     let path = handshake_observability::init_with_config(LogConfig {
//!         service_name: "handshake-sim".into(),
//!         default_level: "debug".into(),
//!         also_stderr: true,
//!         ..Default::default()
//!     })?;
//!     tracing::info!(log_path = %path.display(), "ready");
//!     Ok(())
//! }
//! ```

mod file_writer;
mod json_layer;
pub mod redact;

pub use file_writer::{default_log_path, LogFileWriter};
pub use json_layer::{JsonLayer, LogEntry};

use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name written into every log line (e.g. "handshake-sim").
    pub service_name: String,

    /// Default filter directive. `RUST_LOG` takes precedence when set.
    pub default_level: String,

    /// Log file location. Defaults to [`default_log_path`].
    pub log_path: Option<PathBuf>,

    /// Also emit compact human-readable lines to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Errors from [`init_with_config`].
#[derive(Error, Debug)]
pub enum LogInitError {
    #[error("no home directory to place the default log file in")]
    NoHomeDir,

    #[error("failed to open log file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("a global tracing subscriber is already installed: {0}")]
    AlreadyInitialized(#[from] tracing_subscriber::util::TryInitError),
}

/// Initialize logging with default settings for `service_name`.
///
/// Failures are reported on stderr rather than aborting the process; a
/// handshake can run without its log file.
pub fn init(service_name: &str) {
    let config = LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    };
    if let Err(e) = init_with_config(config) {
        eprintln!("logging disabled: {e}");
    }
}

/// Initialize logging and return the path of the log file in use.
pub fn init_with_config(config: LogConfig) -> Result<PathBuf, LogInitError> {
    let log_path = match config.log_path.clone() {
        Some(path) => path,
        None => default_log_path().ok_or(LogInitError::NoHomeDir)?,
    };

    let writer = LogFileWriter::open(&log_path).map_err(|source| LogInitError::Io {
        path: log_path.clone(),
        source,
    })?;

    let json_layer = JsonLayer::new(config.service_name.clone(), writer)
        .with_filter(env_filter(&config.default_level));

    let stderr_layer = config.also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(io::stderr)
            .with_filter(env_filter(&config.default_level))
    });

    tracing_subscriber::registry()
        .with(json_layer)
        .with(stderr_layer)
        .try_init()?;

    tracing::info!(
        service = %config.service_name,
        log_path = %log_path.display(),
        "logging initialized"
    );

    Ok(log_path)
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

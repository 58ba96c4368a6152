//! Logging setup.
//!
//! Installs the global `tracing` subscriber: an optional console layer and
//! an optional plain-text file layer, both filtered by `RUST_LOG` when set
//! and by the configured level otherwise.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::env::{AppConfig, Environment};
use crate::error::{AppError, AppResult};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const PROD_LOG_FILE: &str = "logs/app.log";

/// Maps a level name to a `tracing` level. Unknown names fall back to INFO.
pub fn parse_level(name: &str) -> Level {
    match name.trim().to_ascii_uppercase().as_str() {
        "TRACE" => Level::TRACE,
        "DEBUG" => Level::DEBUG,
        "WARN" | "WARNING" => Level::WARN,
        "ERROR" | "CRITICAL" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Logging options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingOptions {
    pub level: Level,
    pub log_file: Option<PathBuf>,
    pub enable_console: bool,
    pub enable_colors: bool,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            log_file: None,
            enable_console: true,
            enable_colors: true,
        }
    }
}

impl LoggingOptions {
    /// Production logs to `logs/app.log` without colours; the other
    /// environments log to the console with colours.
    pub fn for_config(config: &AppConfig) -> Self {
        let level = parse_level(&config.log_level);
        match config.env {
            Environment::Prod => Self {
                level,
                log_file: Some(PathBuf::from(PROD_LOG_FILE)),
                enable_console: true,
                enable_colors: false,
            },
            Environment::Dev | Environment::Test => Self {
                level,
                ..Self::default()
            },
        }
    }
}

/// Keeps the non-blocking file writer alive. Pending records are flushed
/// when it is dropped.
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

fn file_writer(path: &Path) -> AppResult<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let file_name = path
        .file_name()
        .ok_or_else(|| AppError::Config(format!("Invalid log file path: {}", path.display())))?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let appender = tracing_appender::rolling::never(dir, file_name);
    Ok(tracing_appender::non_blocking(appender))
}

/// Installs the global subscriber.
///
/// Fails if the log file cannot be created or a global subscriber is
/// already installed.
pub fn init_logging(options: &LoggingOptions) -> AppResult<LogGuard> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if options.enable_console {
        let ansi = options.enable_colors && std::io::stdout().is_terminal();
        let console_layer = fmt::layer()
            .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
            .with_target(true)
            .with_line_number(true)
            .with_ansi(ansi)
            .with_filter(env_filter(options.level));
        layers.push(Box::new(console_layer));
    }

    let file_guard = match &options.log_file {
        Some(path) => {
            let (writer, guard) = file_writer(path)?;
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
                .with_target(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_filter(env_filter(options.level));
            layers.push(Box::new(file_layer));
            Some(guard)
        }
        None => None,
    };

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| AppError::Internal(format!("Failed to initialize logging: {e}")))?;

    tracing::debug!(
        level = %options.level,
        log_file = ?options.log_file,
        "Logging initialized"
    );

    Ok(LogGuard {
        _file_guard: file_guard,
    })
}

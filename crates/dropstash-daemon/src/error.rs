//! Error types for the daemon.

use std::path::PathBuf;
use thiserror::Error;

use dropstash_core::StashError;

/// Result type alias for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;

/// Error variants for configuration, watchers and lifecycle control.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON configuration could not be parsed or written.
    #[error("Config JSON error: {0}")]
    ConfigJson(#[from] serde_json::Error),

    /// TOML configuration could not be parsed.
    #[error("Config TOML error: {0}")]
    ConfigToml(#[from] toml::de::Error),

    /// Configuration file has an extension we do not read.
    #[error("Unsupported config file extension: {0}")]
    UnsupportedConfig(String),

    /// A required directory could not be created.
    #[error("Cannot create directory {path}: {source}")]
    CreateDir {
        /// Directory that failed.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },

    /// No locations are configured.
    #[error("Must have one or more locations to monitor; edit the config file")]
    NoLocations,

    /// A watched location does not exist or cannot be inspected.
    #[error("Location {path} unavailable: {source}")]
    LocationUnavailable {
        /// The location.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },

    /// A watched location is not a directory.
    #[error("Location {0} is not a directory")]
    NotADirectory(PathBuf),

    /// A watched location lacks the set-group-id bit.
    #[error("Location {0} must have the set-group-id bit set (chmod g+s)")]
    MissingSetgid(PathBuf),

    /// The rolling log file could not be set up.
    #[error("Log file error: {0}")]
    LogInit(#[from] tracing_appender::rolling::InitError),

    /// The notification subsystem failed.
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    /// Stash engine failure.
    #[error(transparent)]
    Stash(#[from] StashError),

    /// The engine task panicked or was cancelled.
    #[error("Engine task failed: {0}")]
    EngineTask(#[from] tokio::task::JoinError),

    /// No running daemon was found.
    #[error("Dropstash daemon not running: {0}")]
    NotRunning(String),

    /// Another daemon already holds the pid file.
    #[error("Dropstash daemon already running with pid {0}")]
    AlreadyRunning(i32),
}

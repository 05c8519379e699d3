//! Error types for the stash engine.

use thiserror::Error;

/// Result type alias for stash operations.
pub type StashResult<T> = Result<T, StashError>;

/// Error variants for stash operations.
#[derive(Debug, Error)]
pub enum StashError {
    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The metadata file could not be encoded or decoded.
    #[error("Metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    /// A staged file referenced by a command is missing or unreadable.
    #[error("Staged file {id} unavailable: {source}")]
    StagedFile {
        /// Staging identifier of the file.
        id: String,
        /// Underlying I/O failure.
        source: std::io::Error,
    },

    /// The physical content of a unit could not be opened.
    #[error("Stash unit {id} unavailable: {source}")]
    UnitUnavailable {
        /// Unit identifier.
        id: String,
        /// Underlying I/O failure.
        source: std::io::Error,
    },

    /// Export destination could not be created or written.
    #[error("Export to {path} failed: {source}")]
    ExportFailed {
        /// Destination that failed.
        path: String,
        /// Underlying I/O failure.
        source: std::io::Error,
    },

    /// No unit matches the lookup key.
    #[error("Nothing in the stash matches {0}")]
    KeyNotFound(String),

    /// The key resolved to a unit but not to any single version.
    #[error("{0} does not select a version; use id/name[:version]")]
    NoVersionSelected(String),

    /// A stored digest string was not valid hex of the right length.
    #[error("Invalid digest: {0}")]
    InvalidDigest(String),

    /// The engine queue has been closed.
    #[error("Stash engine is not running")]
    EngineStopped,
}

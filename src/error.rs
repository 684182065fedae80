//! Error types for modcache-race
//!
//! Two failure classes matter to the harness:
//! - anything the cache writer returns is fatal and ends the run
//! - reader-side access failures are transient and never become an [`Error`]
//!
//! Every writer failure is expressed as an [`Error`], most of them through the
//! [`ExtractionError`] variant which carries the module and path involved.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for modcache-race operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for modcache-race
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The environment key that caused the error (e.g., "MODCACHE_TRIALS")
        key: Option<String>,
    },

    /// Module path or version failed validation
    #[error("invalid module {module}: {reason}")]
    InvalidModule {
        /// The offending module identity as given
        module: String,
        /// Why it was rejected
        reason: String,
    },

    /// Populating a cache entry failed
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A spawned writer or reader task panicked or was cancelled
    #[error("task failed: {0}")]
    TaskFailed(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Errors raised while downloading or extracting a module into a cache root
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Copying the module archive into the download cache failed
    #[error("download of {module} failed: {reason}")]
    Download {
        /// Module identity (`path@version`)
        module: String,
        /// The reason the download failed
        reason: String,
    },

    /// The downloaded archive does not hash to the expected digest
    #[error("checksum mismatch for {module}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Module identity (`path@version`)
        module: String,
        /// Digest recorded by the module source
        expected: String,
        /// Digest of the bytes actually written
        actual: String,
    },

    /// The archive is unreadable or contains entries outside the module prefix
    #[error("invalid module archive {archive}: {reason}")]
    InvalidArchive {
        /// Path of the archive being extracted
        archive: PathBuf,
        /// The reason the archive was rejected
        reason: String,
    },

    /// Renaming the staging directory into place failed after all retries
    #[error("failed to rename {from} to {to}: {source}")]
    Rename {
        /// Staging directory
        from: PathBuf,
        /// Final cache entry directory
        to: PathBuf,
        /// Last error reported by the rename
        source: std::io::Error,
    },

    /// Creating or removing the `.partial` extraction marker failed
    #[error("failed to update extraction marker {path}: {source}")]
    Marker {
        /// Path of the marker file
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },
}

impl Error {
    /// Build a [`Error::Config`] for an environment key
    pub(crate) fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

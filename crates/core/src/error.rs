//! Unified error types for the sensor ETL.
//!
//! Errors split into two families:
//! - fatal: structural invariant violations that must abort the run
//! - transient/per-item: isolated, logged, and retried on the next
//!   scheduled run

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the sensor ETL.
#[derive(Debug, Error)]
pub enum Error {
    /// A structural invariant was violated (e.g. a directory appeared in
    /// the flat processing area). Always fatal.
    #[error("structural invariant violated: {0}")]
    Structural(String),

    /// Object store operation failed.
    #[error("store error: {0}")]
    Store(String),

    /// An archive could not be read or extracted. Isolated per archive.
    #[error("bad archive {name}: {reason}")]
    Archive { name: String, reason: String },

    /// A filename did not match the stream naming convention.
    #[error("unparseable filename: {0}")]
    Naming(String),

    /// A stream pipeline failed to process a file.
    #[error("pipeline error on {file}: {reason}")]
    Pipeline { file: PathBuf, reason: String },

    /// Journal append or read failed.
    #[error("journal error: {0}")]
    Journal(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An operation exceeded its deadline.
    #[error("timed out after {0:?}: {1}")]
    Timeout(std::time::Duration, String),

    #[error("configuration error: {0}")]
    Config(String),

    /// A spawned task panicked or was aborted.
    #[error("task join error: {0}")]
    Join(String),
}

impl Error {
    /// Create a store error.
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a structural-invariant error.
    pub fn structural(msg: impl Into<String>) -> Self {
        Self::Structural(msg.into())
    }

    /// Create a per-archive error.
    pub fn archive(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Archive {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a pipeline error for a specific input file.
    pub fn pipeline(file: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Pipeline {
            file: file.into(),
            reason: reason.into(),
        }
    }

    pub fn journal(msg: impl Into<String>) -> Self {
        Self::Journal(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error must abort the whole run rather than be
    /// isolated to the item that produced it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Structural(_) | Self::Config(_) | Self::Join(_))
    }
}

//! Error types for the tuning engine.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using [`TuningError`].
pub type Result<T> = std::result::Result<T, TuningError>;

/// Top-level error type for everything below the scheduler boundary.
#[derive(Debug, Error)]
pub enum TuningError {
    /// Filesystem operation on a store or rules file failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        /// Path the operation targeted.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to serialize a persisted document.
    #[error("Failed to serialize document: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Rules file does not exist.
    #[error("Rules file not found: {0}")]
    RulesNotFound(String),

    /// Rules file is not valid RON.
    #[error("Failed to parse rules: {0}")]
    RulesParse(#[from] ron::error::SpannedError),

    /// Rules parsed but are inconsistent.
    #[error("Invalid rules: {0}")]
    InvalidRules(String),

    /// Pipeline aborted for a reason other than I/O.
    #[error("Pipeline failed: {0}")]
    Pipeline(String),
}

impl TuningError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

//! Error types for runpad-core.

use thiserror::Error;

use crate::compile::Diagnostic;

/// Result type for runpad-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in runpad-core.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or contradictory host configuration (no toolchain, managed
    /// platform without launcher, unusable build directory).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Dependency restore failed with the given tool errors.
    #[error("restore failed with {} error(s)", .0.len())]
    Restore(Vec<Diagnostic>),

    /// Malformed child output.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Launching, signalling or reaping the child failed.
    #[error("process error: {0}")]
    Process(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The operation was superseded or cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Whether this error represents cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

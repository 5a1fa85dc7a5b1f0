//! Leader detection error types

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during leader detection
///
/// Cloneable so the same error can ride on an [`crate::Event`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LeaderError {
    /// The leader file could not be read
    #[error("Failed to read leader file {path}: {message}")]
    Read { path: PathBuf, message: String },

    /// The leader file could not be written
    #[error("Failed to write leader file {path}: {message}")]
    Write { path: PathBuf, message: String },

    /// A caller-supplied probe failed
    #[error("Leader probe failed: {0}")]
    Probe(String),

    /// The poll interval must be positive
    #[error("Leader poll interval must be greater than zero")]
    ZeroInterval,

    /// The detector was started outside a Tokio runtime
    #[error("Leader detector requires a Tokio runtime")]
    NoRuntime,
}

//! Error type for the crate.
//!
//! The numeric core asserts its preconditions instead of returning errors, so the only
//! recoverable failures come from reading and validating configuration.

use std::io;

use thiserror::Error;

/// Main library error type.
#[derive(Error, Debug)]
pub enum BatchNormError {
    /// I/O error while reading a config file.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Malformed JSON.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// A config value outside its valid range.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, BatchNormError>;

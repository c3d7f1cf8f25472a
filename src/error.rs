//! Error types for codetext
//!
//! Run-level failures abort a consolidation pass and surface as [`Error`].
//! Per-file problems never abort a pass; they are recorded as a
//! [`SkipReason`] on the result instead.

use std::path::PathBuf;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that abort a consolidation run or a watch session
#[derive(Error, Debug)]
pub enum Error {
    /// Bad root folder, bad output path or an invalid filter
    #[error("Configuration error: {0}")]
    Config(String),

    /// The output artifact could not be written
    #[error("Failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Filesystem notifications could not be established
    #[error("Watch subscription error: {0}")]
    WatchSubscription(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<notify::Error> for Error {
    fn from(err: notify::Error) -> Self {
        Error::WatchSubscription(err.to_string())
    }
}

/// Result type alias for codetext operations
pub type Result<T> = std::result::Result<T, Error>;

/// Why a file was left out of the artifact
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    #[error("binary content")]
    Binary,

    #[error("cannot decode as text: {0}")]
    Undecodable(String),

    #[error("unreadable: {0}")]
    Unreadable(String),

    #[error("larger than {limit} bytes ({size} bytes)")]
    TooLarge { size: u64, limit: u64 },
}

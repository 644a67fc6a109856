//! Error types for the download engine.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::integrity::IntegrityError;

/// Result type for download operations.
pub type DownloadResult<T> = Result<T, DownloadError>;

/// Errors raised while fetching a remote artifact.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Connection failure, timeout, truncated body or a retryable status.
    #[error("transient failure fetching {url}: {reason}")]
    Transient {
        url: String,
        reason: String,
        /// Server-supplied `Retry-After` hint, if any.
        retry_after: Option<Duration>,
    },

    /// Non-retryable HTTP status.
    #[error("{url} returned HTTP {status}")]
    Permanent { url: String, status: u16 },

    /// The request could not be built (bad URL, bad header).
    #[error("invalid request for {url}: {reason}")]
    Request { url: String, reason: String },

    /// The transferred file failed its integrity check.
    #[error("downloaded file {path} failed verification: {source}")]
    CorruptArchive {
        path: PathBuf,
        #[source]
        source: IntegrityError,
    },

    #[error("download of {url} was cancelled")]
    Cancelled { url: String },

    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("giving up on {url} after {attempts} attempts: {last}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        #[source]
        last: Box<DownloadError>,
    },

    #[error("failed to create HTTP client: {0}")]
    Client(String),
}

impl DownloadError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::CorruptArchive { .. })
    }

    /// Server-supplied delay before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub(crate) fn transient(url: &str, reason: impl Into<String>) -> Self {
        Self::Transient {
            url: url.to_string(),
            reason: reason.into(),
            retry_after: None,
        }
    }

    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }
}

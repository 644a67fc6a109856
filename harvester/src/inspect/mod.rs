//! Offline inspection of harvested archives.
//!
//! - `stats`: compressed vs uncompressed size per directory
//! - `compare`: member listings and digests across archives
//! - `checksum`: SHA-256 file digests

mod checksum;
mod compare;
mod stats;

use std::path::PathBuf;

use thiserror::Error;

pub use checksum::{file_sha256, verify_sha256};
pub use compare::{compare_archives, summarize, ArchiveSummary, Comparison, MemberDifference};
pub use stats::{archive_stats, format_size, SizeStats, TreeStats};

pub type InspectResult<T> = Result<T, InspectError>;

#[derive(Debug, Error)]
pub enum InspectError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("invalid search pattern {pattern}: {reason}")]
    Pattern { pattern: String, reason: String },
}

//! Integrity checking for downloaded artifacts.
//!
//! An artifact is valid when:
//! - it is a ZIP archive that opens and whose members all pass their CRC
//!   check within a bounded scan time (`archive`), or
//! - it is any other file and is non-empty.
//!
//! Verdicts are cached by file identity (size + mtime) and persisted to a JSON
//! side file (`cache`), so unchanged files are not rescanned across runs.
//! [`IntegrityChecker`] ties both together and offers a batch API that runs
//! checks on a bounded worker pool (`checker`).

mod archive;
mod cache;
mod checker;

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

pub use archive::{list_members, scan_archive, scan_archive_with_timeout, ArchiveMember, ArchiveScan};
pub use cache::{CacheEntry, FileIdentity, IntegrityCache};
pub use checker::{BatchOptions, IntegrityChecker};

#[cfg(test)]
pub(crate) use archive::test_support as archive_test_support;

/// Default wall-clock bound for a single archive scan.
pub const DEFAULT_ARCHIVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Expected kind of a local artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// ZIP archive, verified by a full member scan.
    Archive,
    /// Any other file, verified by a non-empty check.
    Plain,
}

impl ArtifactKind {
    /// Infer the kind from a path's extension.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("zip") => Self::Archive,
            _ => Self::Plain,
        }
    }
}

/// Reasons an artifact fails its integrity check.
#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("{0} does not exist")]
    Missing(PathBuf),

    #[error("{0} is empty")]
    Empty(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not a valid archive: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("{path} has a corrupted member: {member}")]
    CorruptMember { path: PathBuf, member: String },

    #[error("scanning {path} exceeded {}s", .timeout.as_secs())]
    Timeout { path: PathBuf, timeout: Duration },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_kind_from_path() {
        assert_eq!(ArtifactKind::from_path(Path::new("a/b.zip")), ArtifactKind::Archive);
        assert_eq!(ArtifactKind::from_path(Path::new("a/b.ZIP")), ArtifactKind::Archive);
        assert_eq!(ArtifactKind::from_path(Path::new("a/b.xsd")), ArtifactKind::Plain);
        assert_eq!(ArtifactKind::from_path(Path::new("a/zip")), ArtifactKind::Plain);
    }

    #[test]
    fn test_timeout_display() {
        let err = IntegrityError::Timeout {
            path: PathBuf::from("big.zip"),
            timeout: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "scanning big.zip exceeded 30s");
    }
}

//! Compressed vs uncompressed size statistics for archive folders.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use glob::MatchOptions;
use serde::Serialize;

use super::{InspectError, InspectResult};
use crate::integrity::list_members;

/// Totals for one directory (or a whole tree).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SizeStats {
    pub archives: u64,
    /// Unreadable archives, counted with an uncompressed size of zero.
    pub unreadable: u64,
    /// On-disk size of the archives.
    pub compressed: u64,
    /// Sum of member sizes.
    pub uncompressed: u64,
}

impl SizeStats {
    /// Uncompressed over compressed size, if anything was compressed.
    pub fn ratio(&self) -> Option<f64> {
        (self.compressed > 0).then(|| self.uncompressed as f64 / self.compressed as f64)
    }

    fn add(&mut self, other: &SizeStats) {
        self.archives += other.archives;
        self.unreadable += other.unreadable;
        self.compressed += other.compressed;
        self.uncompressed += other.uncompressed;
    }
}

/// Per-directory statistics for every archive below a root.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TreeStats {
    /// Keyed by directory relative to the root; `.` for the root itself.
    pub directories: BTreeMap<PathBuf, SizeStats>,
}

impl TreeStats {
    pub fn total(&self) -> SizeStats {
        let mut total = SizeStats::default();
        for stats in self.directories.values() {
            total.add(stats);
        }
        total
    }
}

/// Collect archive size statistics below `root`, grouped by directory.
pub fn archive_stats(root: &Path) -> InspectResult<TreeStats> {
    if !root.is_dir() {
        return Err(InspectError::NotADirectory(root.to_path_buf()));
    }

    let pattern = root.join("**").join("*.zip");
    let pattern = pattern.to_string_lossy();
    let options = MatchOptions {
        case_sensitive: false,
        ..MatchOptions::new()
    };
    let entries = glob::glob_with(&pattern, options).map_err(|e| InspectError::Pattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })?;

    let mut tree = TreeStats::default();
    for entry in entries {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable path");
                continue;
            }
        };
        let Ok(meta) = fs::metadata(&path) else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }

        let dir = path
            .parent()
            .and_then(|p| p.strip_prefix(root).ok())
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let stats = tree.directories.entry(dir).or_default();
        stats.archives += 1;
        stats.compressed += meta.len();

        match list_members(&path) {
            Ok(members) => stats.uncompressed += members.iter().map(|m| m.size).sum::<u64>(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Unreadable archive");
                stats.unreadable += 1;
            }
        }
    }

    tracing::debug!(root = %root.display(), directories = tree.directories.len(), "Collected archive statistics");
    Ok(tree)
}

/// Human-readable byte size with binary units.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    for unit in UNITS {
        if size < 1024.0 {
            return format!("{:.2} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.2} PiB", size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::archive_test_support::write_zip;
    use tempfile::TempDir;

    #[test]
    fn test_stats_grouped_by_directory() {
        let temp = TempDir::new().unwrap();
        let month = temp.path().join("248").join("2023-09");
        fs::create_dir_all(&month).unwrap();
        write_zip(&month.join("a.zip"), &[("a.xml", &[b'a'; 5000])]);
        write_zip(&month.join("b.zip"), &[("b.xml", &[b'b'; 3000])]);
        write_zip(&temp.path().join("top.zip"), &[("t.xml", b"<t/>")]);
        fs::write(month.join("broken.zip"), b"not an archive").unwrap();
        fs::write(month.join("notes.txt"), b"ignored").unwrap();

        let tree = archive_stats(temp.path()).unwrap();
        let month_stats = &tree.directories[Path::new("248/2023-09")];
        assert_eq!(month_stats.archives, 3);
        assert_eq!(month_stats.unreadable, 1);
        assert_eq!(month_stats.uncompressed, 8000);
        assert!(month_stats.ratio().unwrap() > 1.0);

        let root_stats = &tree.directories[Path::new(".")];
        assert_eq!(root_stats.archives, 1);
        assert_eq!(tree.total().archives, 4);
    }

    #[test]
    fn test_stats_require_directory() {
        assert!(matches!(
            archive_stats(Path::new("/nonexistent/dir")),
            Err(InspectError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_ratio_without_data() {
        assert_eq!(SizeStats::default().ratio(), None);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0.00 B");
        assert_eq!(format_size(1536), "1.50 KiB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MiB");
    }
}

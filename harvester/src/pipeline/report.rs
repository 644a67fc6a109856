//! Run counters, final report and resume point.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters shared with download worker threads.
#[derive(Debug, Default)]
pub struct RunCounters {
    pub manifests_processed: AtomicU64,
    pub manifests_completed: AtomicU64,
    pub manifests_incomplete: AtomicU64,
    pub manifests_skipped: AtomicU64,
    pub manifests_failed: AtomicU64,
    pub files_downloaded: AtomicU64,
    pub files_existing: AtomicU64,
    pub files_failed: AtomicU64,
    pub bytes_downloaded: AtomicU64,
}

impl RunCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Snapshot into a report.
    pub fn snapshot(&self) -> RunReport {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        RunReport {
            manifests_processed: load(&self.manifests_processed),
            manifests_completed: load(&self.manifests_completed),
            manifests_incomplete: load(&self.manifests_incomplete),
            manifests_skipped: load(&self.manifests_skipped),
            manifests_failed: load(&self.manifests_failed),
            files_downloaded: load(&self.files_downloaded),
            files_existing: load(&self.files_existing),
            files_failed: load(&self.files_failed),
            bytes_downloaded: load(&self.bytes_downloaded),
            resume: None,
        }
    }
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub manifests_processed: u64,
    pub manifests_completed: u64,
    pub manifests_incomplete: u64,
    pub manifests_skipped: u64,
    pub manifests_failed: u64,
    pub files_downloaded: u64,
    pub files_existing: u64,
    pub files_failed: u64,
    pub bytes_downloaded: u64,
    /// Set when the run was interrupted.
    pub resume: Option<ResumePoint>,
}

impl RunReport {
    pub fn was_interrupted(&self) -> bool {
        self.resume.is_some()
    }

    /// Whether every processed manifest completed.
    pub fn is_clean(&self) -> bool {
        self.manifests_incomplete == 0 && self.manifests_failed == 0 && self.files_failed == 0
    }
}

/// Position reached when a run was interrupted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResumePoint {
    pub category: String,
    /// First manifest that was not fully processed.
    pub manifest: String,
    pub year: Option<i32>,
    pub month: Option<u32>,
}

impl ResumePoint {
    /// Command-line arguments that restart the run at this point.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(year) = self.year {
            args.push("--start-year".to_string());
            args.push(year.to_string());
        }
        if let Some(month) = self.month {
            args.push("--start-month".to_string());
            args.push(month.to_string());
        }
        args
    }
}

impl fmt::Display for ResumePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.manifest)?;
        if let (Some(year), Some(month)) = (self.year, self.month) {
            write!(f, " ({:04}-{:02})", year, month)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let counters = RunCounters::new();
        RunCounters::bump(&counters.files_downloaded);
        RunCounters::add(&counters.bytes_downloaded, 1024);
        let report = counters.snapshot();
        assert_eq!(report.files_downloaded, 1);
        assert_eq!(report.bytes_downloaded, 1024);
        assert!(report.is_clean());
        assert!(!report.was_interrupted());
    }

    #[test]
    fn test_resume_args() {
        let point = ResumePoint {
            category: "248".into(),
            manifest: "list-20230901.xml".into(),
            year: Some(2023),
            month: Some(9),
        };
        assert_eq!(point.to_args(), vec!["--start-year", "2023", "--start-month", "9"]);
        assert_eq!(point.to_string(), "248/list-20230901.xml (2023-09)");
    }

    #[test]
    fn test_resume_args_undated() {
        let point = ResumePoint {
            category: "248".into(),
            manifest: "list.xml".into(),
            year: None,
            month: None,
        };
        assert!(point.to_args().is_empty());
    }
}

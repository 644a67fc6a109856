//! Cached integrity checking with a bounded worker pool.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rayon::prelude::*;

use super::archive::scan_archive_with_timeout;
use super::cache::{FileIdentity, IntegrityCache};
use super::{ArtifactKind, IntegrityError, DEFAULT_ARCHIVE_TIMEOUT};
use crate::state::StateError;

/// Worker pool settings for [`IntegrityChecker::check_batch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Number of worker threads.
    pub workers: usize,
    /// Files per batch; the cache is flushed after each batch.
    pub batch_size: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            workers: 8,
            batch_size: 1000,
        }
    }
}

/// Integrity checker with a (size, mtime)-keyed verdict cache.
///
/// The cache is held behind a single mutex; lookups and records are short
/// critical sections around an unlocked scan.
#[derive(Debug)]
pub struct IntegrityChecker {
    archive_timeout: Duration,
    cache: Mutex<IntegrityCache>,
    cache_path: Option<PathBuf>,
    dirty: AtomicBool,
}

impl Default for IntegrityChecker {
    fn default() -> Self {
        Self::new(DEFAULT_ARCHIVE_TIMEOUT)
    }
}

impl IntegrityChecker {
    /// Create a checker with an in-memory cache only.
    pub fn new(archive_timeout: Duration) -> Self {
        Self {
            archive_timeout,
            cache: Mutex::new(IntegrityCache::new()),
            cache_path: None,
            dirty: AtomicBool::new(false),
        }
    }

    /// Create a checker backed by a cache file, loading any existing verdicts.
    pub fn with_cache_file(cache_path: PathBuf, archive_timeout: Duration) -> Self {
        let cache = IntegrityCache::load(&cache_path);
        Self {
            archive_timeout,
            cache: Mutex::new(cache),
            cache_path: Some(cache_path),
            dirty: AtomicBool::new(false),
        }
    }

    /// Wall-clock bound for one archive scan.
    pub fn archive_timeout(&self) -> Duration {
        self.archive_timeout
    }

    /// Verify a file without consulting the cache.
    pub fn verify(&self, path: &Path) -> Result<(), IntegrityError> {
        self.verify_as(path, ArtifactKind::from_path(path))
    }

    /// Verify a file as the given kind, regardless of its extension.
    pub fn verify_as(&self, path: &Path, kind: ArtifactKind) -> Result<(), IntegrityError> {
        let meta = fs::metadata(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => IntegrityError::Missing(path.to_path_buf()),
            _ => IntegrityError::Io {
                path: path.to_path_buf(),
                source: e,
            },
        })?;

        match kind {
            ArtifactKind::Archive => {
                let scan = scan_archive_with_timeout(path, self.archive_timeout)?;
                match scan.first_corrupt {
                    None => Ok(()),
                    Some(member) => Err(IntegrityError::CorruptMember {
                        path: path.to_path_buf(),
                        member,
                    }),
                }
            }
            ArtifactKind::Plain if meta.len() == 0 => {
                Err(IntegrityError::Empty(path.to_path_buf()))
            }
            ArtifactKind::Plain => Ok(()),
        }
    }

    /// Whether the file at `path` is valid, using the cache when the file is
    /// unchanged since its last check.
    pub fn is_valid(&self, path: &Path) -> bool {
        let Some(identity) = FileIdentity::of(path) else {
            return false;
        };

        if let Some(verdict) = self.cache.lock().lookup(path, identity) {
            tracing::trace!(path = %path.display(), verdict, "Integrity cache hit");
            return verdict;
        }

        let verdict = match self.verify(path) {
            Ok(()) => true,
            Err(e) => {
                tracing::info!(error = %e, "Integrity check failed");
                false
            }
        };

        // Record against the identity observed before the scan so a file
        // modified mid-scan is rechecked next time.
        self.cache.lock().record(path, identity, verdict);
        self.dirty.store(true, Ordering::Release);
        verdict
    }

    /// Forget the cached verdict for `path`.
    pub fn invalidate(&self, path: &Path) {
        if self.cache.lock().invalidate(path) {
            self.dirty.store(true, Ordering::Release);
        }
    }

    /// Check many files on a bounded worker pool.
    ///
    /// Files are processed in batches of `options.batch_size`; after each
    /// batch the cache is flushed so a crash loses at most one batch of work.
    pub fn check_batch(&self, paths: &[PathBuf], options: BatchOptions) -> HashMap<PathBuf, bool> {
        let mut results = HashMap::with_capacity(paths.len());
        if paths.is_empty() {
            return results;
        }

        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(options.workers.max(1))
            .thread_name(|i| format!("integrity-{}", i))
            .build()
        {
            Ok(pool) => Some(pool),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to build integrity pool, checking sequentially");
                None
            }
        };

        let batch_size = options.batch_size.max(1);
        let total_batches = paths.len().div_ceil(batch_size);

        for (batch_num, batch) in paths.chunks(batch_size).enumerate() {
            tracing::debug!(
                batch = batch_num + 1,
                total_batches,
                files = batch.len(),
                "Checking integrity batch"
            );

            let verdicts: Vec<(PathBuf, bool)> = match &pool {
                Some(pool) => pool.install(|| {
                    batch
                        .par_iter()
                        .map(|p| (p.clone(), self.is_valid(p)))
                        .collect()
                }),
                None => batch.iter().map(|p| (p.clone(), self.is_valid(p))).collect(),
            };
            results.extend(verdicts);

            if let Err(e) = self.flush() {
                tracing::warn!(error = %e, "Failed to flush integrity cache");
            }
        }

        let valid = results.values().filter(|v| **v).count();
        tracing::info!(
            checked = results.len(),
            valid,
            invalid = results.len() - valid,
            "Integrity check complete"
        );

        results
    }

    /// Write the cache to its side file if it changed.
    pub fn flush(&self) -> Result<(), StateError> {
        let Some(path) = &self.cache_path else {
            return Ok(());
        };
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let snapshot = self.cache.lock().clone();
        snapshot.save(path).inspect_err(|_| {
            self.dirty.store(true, Ordering::Release);
        })
    }
}

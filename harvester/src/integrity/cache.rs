//! Persisted integrity verdicts keyed by file identity.

use std::collections::BTreeMap;
use std::fs::Metadata;
use std::path::Path;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use crate::state::{self, StateError};

/// Size and modification time of a file.
///
/// `mtime` is nanoseconds since the Unix epoch; an integer keeps the JSON
/// round trip exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileIdentity {
    pub size: u64,
    pub mtime: u64,
}

impl FileIdentity {
    /// Identity from filesystem metadata.
    pub fn from_metadata(meta: &Metadata) -> Self {
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Self {
            size: meta.len(),
            mtime,
        }
    }

    /// Identity of the file at `path`, or `None` if it cannot be stat'ed.
    pub fn of(path: &Path) -> Option<Self> {
        std::fs::metadata(path).ok().map(|m| Self::from_metadata(&m))
    }
}

/// One cached verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub size: u64,
    pub mtime: u64,
    pub is_valid: bool,
}

impl CacheEntry {
    fn matches(&self, identity: FileIdentity) -> bool {
        self.size == identity.size && self.mtime == identity.mtime
    }
}

/// Map from path to last-known verdict.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntegrityCache {
    entries: BTreeMap<String, CacheEntry>,
}

impl IntegrityCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a cache file; missing or malformed files yield an empty cache.
    pub fn load(path: &Path) -> Self {
        let cache: Self = state::load_or_default(path);
        tracing::debug!(path = %path.display(), entries = cache.len(), "Loaded integrity cache");
        cache
    }

    /// Persist the cache as indented JSON.
    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        state::save_atomic(path, self)
    }

    /// Cached verdict for `path`, only if its identity is unchanged.
    pub fn lookup(&self, path: &Path, identity: FileIdentity) -> Option<bool> {
        self.entries
            .get(&key(path))
            .filter(|entry| entry.matches(identity))
            .map(|entry| entry.is_valid)
    }

    /// Record a verdict for the given identity.
    pub fn record(&mut self, path: &Path, identity: FileIdentity, is_valid: bool) {
        self.entries.insert(
            key(path),
            CacheEntry {
                size: identity.size,
                mtime: identity.mtime,
                is_valid,
            },
        );
    }

    /// Drop any verdict for `path`.
    pub fn invalidate(&mut self, path: &Path) -> bool {
        self.entries.remove(&key(path)).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const ID: FileIdentity = FileIdentity {
        size: 10,
        mtime: 1_700_000_000_123_456_789,
    };

    #[test]
    fn test_lookup_requires_identity_match() {
        let mut cache = IntegrityCache::new();
        let path = Path::new("data/a.zip");
        cache.record(path, ID, true);

        assert_eq!(cache.lookup(path, ID), Some(true));
        assert_eq!(cache.lookup(path, FileIdentity { size: 11, ..ID }), None);
        assert_eq!(cache.lookup(path, FileIdentity { mtime: ID.mtime + 1, ..ID }), None);
        assert_eq!(cache.lookup(Path::new("data/b.zip"), ID), None);
    }

    #[test]
    fn test_invalidate() {
        let mut cache = IntegrityCache::new();
        let path = Path::new("a.zip");
        cache.record(path, ID, false);
        assert!(cache.invalidate(path));
        assert!(!cache.invalidate(path));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_persistence_is_exact() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("integrity_cache.json");

        let mut cache = IntegrityCache::new();
        cache.record(Path::new("x/a.zip"), ID, true);
        cache.record(Path::new("x/b.xsd"), FileIdentity { size: 1, mtime: 2 }, false);
        cache.save(&file).unwrap();

        let loaded = IntegrityCache::load(&file);
        assert_eq!(loaded, cache);
        assert_eq!(loaded.lookup(Path::new("x/a.zip"), ID), Some(true));

        let json = std::fs::read_to_string(&file).unwrap();
        assert!(json.contains("\"is_valid\": true"));
    }

    #[test]
    fn test_identity_of_missing_file() {
        assert!(FileIdentity::of(Path::new("/nonexistent/file")).is_none());
    }
}

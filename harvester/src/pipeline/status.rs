//! Persisted per-manifest processing status.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::state::{self, StateError};

/// Overall state of one manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Completed,
    /// Download phase started but never finished; treated like `Incomplete`.
    InProgress,
    Incomplete,
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::InProgress => "in_progress",
            Self::Incomplete => "incomplete",
        };
        f.write_str(s)
    }
}

/// State of one artifact after processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    /// Already present and valid.
    Exists,
    Downloaded,
    Failed,
    /// Not attempted (manifest aborted or run interrupted).
    Missing,
}

impl FileState {
    /// Present and valid on disk.
    pub fn is_present(self) -> bool {
        matches!(self, Self::Exists | Self::Downloaded)
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Exists => "exists",
            Self::Downloaded => "downloaded",
            Self::Failed => "failed",
            Self::Missing => "missing",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStatus {
    pub filename: String,
    pub status: FileState,
}

impl FileStatus {
    pub fn new(filename: impl Into<String>, status: FileState) -> Self {
        Self {
            filename: filename.into(),
            status,
        }
    }
}

/// Status record for one manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestStatus {
    pub status: StatusKind,
    #[serde(default)]
    pub zip_files: Vec<FileStatus>,
    #[serde(default)]
    pub xsd_files: Vec<FileStatus>,
    #[serde(default)]
    pub errors: Vec<String>,
    /// RFC 3339 timestamp of the last update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl ManifestStatus {
    /// Build a record, deriving `completed` vs `incomplete` from its contents.
    pub fn finished(zip_files: Vec<FileStatus>, xsd_files: Vec<FileStatus>, errors: Vec<String>) -> Self {
        let all_present = zip_files
            .iter()
            .chain(xsd_files.iter())
            .all(|f| f.status.is_present());
        let status = if all_present && errors.is_empty() {
            StatusKind::Completed
        } else {
            StatusKind::Incomplete
        };
        Self {
            status,
            zip_files,
            xsd_files,
            errors,
            updated_at: Some(chrono::Utc::now().to_rfc3339()),
        }
    }

    /// A record for a manifest that failed before any artifact was resolved.
    pub fn failed(error: impl Into<String>) -> Self {
        Self::finished(Vec::new(), Vec::new(), vec![error.into()])
    }

    fn in_progress() -> Self {
        Self {
            status: StatusKind::InProgress,
            zip_files: Vec::new(),
            xsd_files: Vec::new(),
            errors: Vec::new(),
            updated_at: Some(chrono::Utc::now().to_rfc3339()),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == StatusKind::Completed
    }

    /// Files in the record with the given state.
    pub fn count(&self, state: FileState) -> usize {
        self.zip_files
            .iter()
            .chain(self.xsd_files.iter())
            .filter(|f| f.status == state)
            .count()
    }
}

/// All manifest status records, keyed by manifest filename.
#[derive(Debug, Default)]
pub struct StatusStore {
    path: Option<PathBuf>,
    records: BTreeMap<String, ManifestStatus>,
}

impl StatusStore {
    /// Store that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the store from `path`; missing or malformed files start empty.
    pub fn load(path: &Path) -> Self {
        let records: BTreeMap<String, ManifestStatus> = state::load_or_default(path);
        tracing::debug!(path = %path.display(), manifests = records.len(), "Loaded processing status");
        Self {
            path: Some(path.to_path_buf()),
            records,
        }
    }

    pub fn get(&self, manifest: &str) -> Option<&ManifestStatus> {
        self.records.get(manifest)
    }

    pub fn is_completed(&self, manifest: &str) -> bool {
        self.get(manifest).is_some_and(ManifestStatus::is_completed)
    }

    /// Mark a manifest as being downloaded and persist.
    ///
    /// Returns the previous record so an interrupted manifest can be rolled
    /// back with [`StatusStore::restore`].
    pub fn begin(&mut self, manifest: &str) -> Result<Option<ManifestStatus>, StateError> {
        let previous = self
            .records
            .insert(manifest.to_string(), ManifestStatus::in_progress());
        self.save()?;
        Ok(previous)
    }

    /// Put back the record returned by [`StatusStore::begin`] and persist.
    pub fn restore(&mut self, manifest: &str, previous: Option<ManifestStatus>) -> Result<(), StateError> {
        match previous {
            Some(record) => self.records.insert(manifest.to_string(), record),
            None => self.records.remove(manifest),
        };
        self.save()
    }

    /// Record the final status of a manifest and persist.
    pub fn record(&mut self, manifest: &str, status: ManifestStatus) -> Result<(), StateError> {
        self.records.insert(manifest.to_string(), status);
        self.save()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ManifestStatus)> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn save(&self) -> Result<(), StateError> {
        match &self.path {
            Some(path) => state::save_atomic(path, &self.records),
            None => Ok(()),
        }
    }
}

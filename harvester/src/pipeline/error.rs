//! Top-level pipeline errors.

use thiserror::Error;

use crate::download::DownloadError;

/// Result type for pipeline runs.
pub type HarvestResult<T> = Result<T, HarvestError>;

/// Errors that end a run.
///
/// Per-manifest and per-artifact failures never surface here; they are
/// counted and attributed to the owning manifest's status record.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("no manifest could be read ({attempted} configured)")]
    NoManifests { attempted: usize },

    #[error(transparent)]
    Transport(#[from] DownloadError),
}

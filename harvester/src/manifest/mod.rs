//! Manifest discovery and link extraction.
//!
//! The portal publishes a top-level manifest per data category (`list.xml`)
//! whose `item` elements point at dated sub-manifests. Each sub-manifest in
//! turn references ZIP archives and XSD schemas, in whatever XML structure
//! that month's export happened to use.
//!
//! - `index`: reads the top-level manifest into [`SubManifest`] references
//! - `links`: walks a sub-manifest and collects [`ArtifactLink`]s

mod index;
mod links;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use reqwest::Url;
use thiserror::Error;

pub use index::{parse_index, SubManifest};
pub use links::{extract_links, parse_iso_date, ArtifactLink, ExtractedLinks, LinkKind, LinkSet};

/// Maximum number of characters of raw manifest content logged on parse failure.
pub const RAW_EXCERPT_CHARS: usize = 1000;

/// Errors raised while loading or parsing manifests.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to fetch manifest {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("failed to parse manifest {location}: {reason}")]
    Parse { location: String, reason: String },

    #[error("invalid manifest reference '{0}': expected CATEGORY=LOCATION")]
    InvalidReference(String),
}

/// Where a top-level manifest lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestLocation {
    /// Fetched over HTTP(S).
    Remote(Url),
    /// Read from the local filesystem.
    Local(PathBuf),
}

impl ManifestLocation {
    /// Parse a location string; `http://` and `https://` prefixes select
    /// [`ManifestLocation::Remote`], anything else is a path.
    pub fn parse(location: &str) -> Self {
        let lower = location.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            if let Ok(url) = Url::parse(location) {
                return Self::Remote(url);
            }
        }
        Self::Local(PathBuf::from(location))
    }

    /// Base URL against which relative links in this manifest resolve.
    pub fn base_url(&self) -> Option<&Url> {
        match self {
            Self::Remote(url) => Some(url),
            Self::Local(_) => None,
        }
    }
}

impl fmt::Display for ManifestLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(url) => write!(f, "{}", url),
            Self::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

/// A top-level manifest together with the data category it feeds.
///
/// The category becomes the first path segment of archive target folders
/// (`{category}/{YYYY}-{MM}`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRef {
    pub category: String,
    pub location: ManifestLocation,
}

impl ManifestRef {
    /// Create a manifest reference.
    pub fn new(category: impl Into<String>, location: &str) -> Self {
        Self {
            category: category.into(),
            location: ManifestLocation::parse(location),
        }
    }
}

impl FromStr for ManifestRef {
    type Err = ManifestError;

    /// Parse the `CATEGORY=LOCATION` form used on the command line.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (category, location) = s
            .split_once('=')
            .ok_or_else(|| ManifestError::InvalidReference(s.to_string()))?;
        let (category, location) = (category.trim(), location.trim());
        if category.is_empty() || location.is_empty() {
            return Err(ManifestError::InvalidReference(s.to_string()));
        }
        Ok(Self::new(category, location))
    }
}

/// Cut raw manifest content down to a loggable excerpt.
pub fn raw_excerpt(content: &str) -> &str {
    match content.char_indices().nth(RAW_EXCERPT_CHARS) {
        Some((idx, _)) => &content[..idx],
        None => content,
    }
}

//! Top-level manifest parsing.

use std::collections::HashSet;

use chrono::NaiveDate;
use reqwest::Url;
use roxmltree::Document;

use super::{raw_excerpt, ManifestError};
use crate::resolver::{basename_of, resolve_date};

/// A dated sub-manifest listed by a top-level manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubManifest {
    /// Data category of the owning top-level manifest.
    pub category: String,
    /// Normalized local filename, also the key of its status record.
    pub filename: String,
    /// Absolute URL (or raw link when no base was known).
    pub url: String,
    /// Date encoded in the filename.
    pub date: Option<NaiveDate>,
}

/// Parse a top-level manifest into its sub-manifest references.
///
/// Only `item` elements whose `link` attribute ends in `.xml` are considered.
/// Duplicate filenames keep their first occurrence.
pub fn parse_index(
    content: &str,
    category: &str,
    location: &str,
    base: Option<&Url>,
) -> Result<Vec<SubManifest>, ManifestError> {
    let doc = Document::parse(content).map_err(|e| {
        tracing::warn!(
            manifest = %location,
            error = %e,
            raw = raw_excerpt(content),
            "Manifest is not well-formed XML"
        );
        ManifestError::Parse {
            location: location.to_string(),
            reason: e.to_string(),
        }
    })?;

    let mut seen = HashSet::new();
    let mut subs = Vec::new();

    for item in doc
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "item")
    {
        let Some(link) = item.attribute("link").map(str::trim) else {
            continue;
        };
        if !link.to_ascii_lowercase().ends_with(".xml") {
            continue;
        }

        let filename = basename_of(link);
        if !seen.insert(filename.clone()) {
            continue;
        }

        let url = match base.and_then(|b| b.join(link).ok()) {
            Some(u) => u.to_string(),
            None => link.to_string(),
        };

        subs.push(SubManifest {
            category: category.to_string(),
            date: resolve_date(&filename),
            filename,
            url,
        });
    }

    tracing::debug!(
        manifest = %location,
        category,
        sub_manifests = subs.len(),
        "Parsed manifest index"
    );

    Ok(subs)
}

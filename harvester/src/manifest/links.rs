//! Artifact link extraction from sub-manifests.
//!
//! Sub-manifest exports are not schema-stable: a link may sit in an `href`
//! attribute one month and in the text of a `<file>` element the next. The
//! extractor therefore looks everywhere: every element's link-bearing
//! attributes and every element's own text.
//!
//! Several historical links to the same file often coexist in one document.
//! Each candidate is dated from its element (attributes or child elements such
//! as `<modified>`), and only the newest link per basename is kept.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use reqwest::Url;
use roxmltree::{Document, Node};

use crate::resolver::basename_of;

/// Attributes that may carry a download link.
const LINK_ATTRIBUTES: &[&str] = &["link", "href", "url", "file", "source"];

/// Attributes or child element names that may carry a date for the link.
const DATE_FIELDS: &[&str] = &["date", "datetime", "time", "created", "modified"];

/// Classification of a candidate link by its suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    /// A `.zip` data archive.
    Archive,
    /// A `.xsd` schema definition.
    Schema,
}

impl LinkKind {
    /// Classify a link, returning `None` for anything that is not an artifact.
    pub fn classify(link: &str) -> Option<Self> {
        let lower = link.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            Some(Self::Archive)
        } else if lower.ends_with(".xsd") {
            Some(Self::Schema)
        } else {
            None
        }
    }
}

/// A discovered download link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLink {
    /// Absolute URL when a base was known, otherwise the raw link text.
    pub url: String,
    /// Local filename the artifact is stored under.
    pub filename: String,
    /// Date derived from the surrounding element, if any.
    pub date: Option<NaiveDateTime>,
}

/// Newest link per filename, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkSet {
    links: Vec<ArtifactLink>,
    index: HashMap<String, usize>,
}

impl LinkSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a candidate link.
    ///
    /// The candidate replaces the current holder of its filename only if its
    /// date is strictly newer; an undated candidate never displaces anything.
    /// Returns `true` if the candidate was kept.
    pub fn offer(&mut self, link: ArtifactLink) -> bool {
        match self.index.get(&link.filename) {
            Some(&pos) => {
                if link.date > self.links[pos].date {
                    self.links[pos] = link;
                    true
                } else {
                    false
                }
            }
            None => {
                self.index.insert(link.filename.clone(), self.links.len());
                self.links.push(link);
                true
            }
        }
    }

    /// Look up the winning link for a filename.
    pub fn get(&self, filename: &str) -> Option<&ArtifactLink> {
        self.index.get(filename).map(|&pos| &self.links[pos])
    }

    /// Winning links in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &ArtifactLink> {
        self.links.iter()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

impl IntoIterator for LinkSet {
    type Item = ArtifactLink;
    type IntoIter = std::vec::IntoIter<ArtifactLink>;

    fn into_iter(self) -> Self::IntoIter {
        self.links.into_iter()
    }
}

/// Links extracted from one document, split by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedLinks {
    pub archives: LinkSet,
    pub schemas: LinkSet,
}

impl ExtractedLinks {
    /// Total number of distinct artifacts.
    pub fn len(&self) -> usize {
        self.archives.len() + self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archives.is_empty() && self.schemas.is_empty()
    }

    fn offer(&mut self, kind: LinkKind, link: ArtifactLink) {
        match kind {
            LinkKind::Archive => self.archives.offer(link),
            LinkKind::Schema => self.schemas.offer(link),
        };
    }
}

/// Extract archive and schema links from a parsed document.
///
/// Relative links are resolved against `base` when it is given.
pub fn extract_links(doc: &Document<'_>, base: Option<&Url>) -> ExtractedLinks {
    let mut found = ExtractedLinks::default();

    for node in doc.descendants().filter(|n| n.is_element()) {
        let mut element_date = None;
        let mut date_resolved = false;
        let mut candidate = |raw: &str, found: &mut ExtractedLinks| {
            let raw = raw.trim();
            let Some(kind) = LinkKind::classify(raw) else {
                return;
            };
            if !date_resolved {
                element_date = element_date_of(node);
                date_resolved = true;
            }
            found.offer(
                kind,
                ArtifactLink {
                    url: resolve_url(raw, base),
                    filename: basename_of(raw),
                    date: element_date,
                },
            );
        };

        for attr in LINK_ATTRIBUTES {
            if let Some(value) = node.attribute(*attr) {
                candidate(value, &mut found);
            }
        }

        if let Some(text) = node.text() {
            candidate(text, &mut found);
        }
    }

    found
}

/// Date of an element, from its date attributes or date child elements.
fn element_date_of(node: Node<'_, '_>) -> Option<NaiveDateTime> {
    let from_attrs = DATE_FIELDS
        .iter()
        .filter_map(|name| node.attribute(*name))
        .find_map(parse_iso_date);
    if from_attrs.is_some() {
        return from_attrs;
    }

    DATE_FIELDS.iter().find_map(|name| {
        node.children()
            .find(|c| c.is_element() && c.tag_name().name() == *name)
            .and_then(|c| c.text())
            .and_then(parse_iso_date)
    })
}

/// Parse an ISO-8601 timestamp.
///
/// Accepts RFC 3339 (offsets are normalized to UTC), naive date-times with a
/// `T` or space separator, plain dates and `YYYY-MM` month stamps.
pub fn parse_iso_date(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    NaiveDate::parse_from_str(&format!("{value}-01"), "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn resolve_url(raw: &str, base: Option<&Url>) -> String {
    if Url::parse(raw).is_ok() {
        return raw.to_string();
    }
    base.and_then(|b| b.join(raw).ok())
        .map(|u| u.to_string())
        .unwrap_or_else(|| raw.to_string())
}

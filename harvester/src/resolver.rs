//! Filename conventions for portal artifacts.
//!
//! Portal snapshots encode their publication date in the filename, e.g.
//! `data-20230902-structure-20220125.zip` or `list-2023-9.xml`. This module is
//! the single place that knows how to read those dates back:
//!
//! - [`resolve_date`] extracts a sortable date key from a filename
//! - [`sort_by_recency`] orders names newest-first with undated names last
//! - [`target_directory`] maps an artifact to its `{category}/{YYYY}-{MM}` folder
//! - [`normalize_filename`] and [`basename_of`] clean up names taken from URLs

use std::cmp::Reverse;
use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;

/// Extensions the portal is known to double up (`foo.xml.xml`).
const DOUBLED_EXTENSIONS: &[&str] = &[".xml", ".zip", ".xsd"];

fn full_date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d{8}").expect("valid regex"))
}

fn year_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d{4}").expect("valid regex"))
}

fn month_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"-(\d{1,2})[.-]").expect("valid regex"))
}

/// Extract the date key encoded in a filename.
///
/// Resolution order:
/// 1. The first 8-digit `YYYYMMDD` run that forms a valid calendar date.
/// 2. A 4-digit year token together with a `-M.` / `-M-` month token,
///    yielding the first day of that month.
/// 3. `None` for undated names.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use harvester::resolver::resolve_date;
///
/// assert_eq!(
///     resolve_date("data-20230902-structure-20220125.zip"),
///     NaiveDate::from_ymd_opt(2023, 9, 2)
/// );
/// assert_eq!(resolve_date("list-2023-9.xml"), NaiveDate::from_ymd_opt(2023, 9, 1));
/// assert_eq!(resolve_date("schema.xsd"), None);
/// ```
pub fn resolve_date(filename: &str) -> Option<NaiveDate> {
    if let Some(m) = full_date_pattern().find(filename) {
        if let Ok(date) = NaiveDate::parse_from_str(m.as_str(), "%Y%m%d") {
            return Some(date);
        }
    }

    let year: i32 = year_pattern().find(filename)?.as_str().parse().ok()?;
    let month: u32 = month_pattern()
        .captures(filename)?
        .get(1)?
        .as_str()
        .parse()
        .ok()?;

    NaiveDate::from_ymd_opt(year, month, 1)
}

/// Sort filenames newest-first.
///
/// Undated names sort after every dated one; the sort is stable so names with
/// equal keys keep their relative order.
pub fn sort_by_recency<S: AsRef<str>>(names: &mut [S]) {
    names.sort_by_key(|name| Reverse(resolve_date(name.as_ref())));
}

/// Collapse repeated extensions such as `list.xml.xml` into `list.xml`.
pub fn normalize_filename(filename: &str) -> String {
    let mut name = filename.to_string();
    for ext in DOUBLED_EXTENSIONS {
        let doubled = format!("{ext}{ext}");
        while name.to_ascii_lowercase().ends_with(&doubled) {
            name.truncate(name.len() - ext.len());
        }
    }
    name
}

/// Derive the local filename for a URL or path.
///
/// Takes the last path segment, drops any query string or fragment and
/// normalizes doubled extensions.
pub fn basename_of(link: &str) -> String {
    let without_suffix = link
        .split(['?', '#'])
        .next()
        .unwrap_or(link)
        .trim_end_matches('/');
    let segment = without_suffix
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(without_suffix);
    normalize_filename(segment)
}

/// Compute the archive folder for an artifact: `{category}/{YYYY}-{MM}`.
///
/// The date comes from the owning manifest's filename, falling back to the
/// artifact's own filename. Returns `None` when neither carries a date.
pub fn target_directory(category: &str, manifest_name: &str, artifact_name: &str) -> Option<String> {
    let date = resolve_date(manifest_name).or_else(|| resolve_date(artifact_name))?;
    Some(format!("{}/{:04}-{:02}", category, date.year(), date.month()))
}

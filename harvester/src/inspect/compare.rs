//! Side-by-side comparison of archive contents.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::checksum::file_sha256;
use super::InspectResult;
use crate::integrity::{list_members, ArchiveMember};

/// One archive's digest and member listing.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveSummary {
    pub path: PathBuf,
    pub size: u64,
    pub sha256: String,
    /// `None` when the archive could not be opened.
    pub members: Option<Vec<ArchiveMember>>,
}

/// A member whose size or CRC differs between archives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberDifference {
    pub name: String,
    pub sizes: BTreeSet<u64>,
    pub crcs: BTreeSet<u32>,
    /// Archives (by index into [`Comparison::archives`]) missing this member.
    pub absent_from: Vec<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Comparison {
    pub archives: Vec<ArchiveSummary>,
    pub differences: Vec<MemberDifference>,
}

impl Comparison {
    /// Whether every readable archive holds the same members.
    pub fn is_identical(&self) -> bool {
        self.differences.is_empty()
    }
}

/// Summarize one archive.
pub fn summarize(path: &Path) -> InspectResult<ArchiveSummary> {
    let sha256 = file_sha256(path)?;
    let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    let members = match list_members(path) {
        Ok(members) => Some(members),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Cannot list archive members");
            None
        }
    };
    Ok(ArchiveSummary {
        path: path.to_path_buf(),
        size,
        sha256,
        members,
    })
}

/// Compare member listings across archives.
///
/// Unreadable archives are summarized but take no part in the member diff.
pub fn compare_archives(paths: &[PathBuf]) -> InspectResult<Comparison> {
    let archives = paths
        .iter()
        .map(|p| summarize(p))
        .collect::<InspectResult<Vec<_>>>()?;

    let mut by_name: BTreeMap<&str, Vec<(usize, &ArchiveMember)>> = BTreeMap::new();
    let readable: Vec<usize> = archives
        .iter()
        .enumerate()
        .filter(|(_, a)| a.members.is_some())
        .map(|(i, _)| i)
        .collect();
    for &i in &readable {
        for member in archives[i].members.iter().flatten() {
            by_name.entry(member.name.as_str()).or_default().push((i, member));
        }
    }

    let differences = by_name
        .into_iter()
        .filter_map(|(name, seen)| {
            let sizes: BTreeSet<u64> = seen.iter().map(|(_, m)| m.size).collect();
            let crcs: BTreeSet<u32> = seen.iter().map(|(_, m)| m.crc32).collect();
            let absent_from: Vec<usize> = readable
                .iter()
                .copied()
                .filter(|i| !seen.iter().any(|(j, _)| j == i))
                .collect();
            (sizes.len() > 1 || crcs.len() > 1 || !absent_from.is_empty()).then(|| MemberDifference {
                name: name.to_string(),
                sizes,
                crcs,
                absent_from,
            })
        })
        .collect();

    Ok(Comparison {
        archives,
        differences,
    })
}

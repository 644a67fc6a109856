//! Global newest-wins deduplication across manifests.

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};

use crate::manifest::{ArtifactLink, ExtractedLinks, LinkKind};

/// An artifact a manifest is responsible for downloading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedArtifact {
    pub kind: LinkKind,
    pub link: ArtifactLink,
}

struct Winner {
    owner: usize,
    link: ArtifactLink,
    /// Link date, or the owning manifest's date when the link is undated.
    effective: Option<NaiveDateTime>,
}

/// Assign every distinct `(kind, filename)` to exactly one manifest.
///
/// `manifests` must be in processing order. A later link replaces the current
/// winner only if its effective date is strictly newer, so ties go to the
/// first manifest seen. Returns, for each input manifest, the artifacts it
/// owns in extraction order.
pub fn assign_owners(manifests: &[(Option<NaiveDate>, &ExtractedLinks)]) -> Vec<Vec<OwnedArtifact>> {
    let mut winners: HashMap<(LinkKind, String), Winner> = HashMap::new();

    for (owner, (manifest_date, links)) in manifests.iter().enumerate() {
        let fallback = manifest_date.and_then(|d| d.and_hms_opt(0, 0, 0));
        let candidates = links
            .archives
            .iter()
            .map(|l| (LinkKind::Archive, l))
            .chain(links.schemas.iter().map(|l| (LinkKind::Schema, l)));

        for (kind, link) in candidates {
            let effective = link.date.or(fallback);
            let key = (kind, link.filename.clone());
            match winners.get_mut(&key) {
                Some(current) if effective > current.effective => {
                    tracing::trace!(
                        filename = %link.filename,
                        from = current.owner,
                        to = owner,
                        "Newer link takes over artifact"
                    );
                    *current = Winner {
                        owner,
                        link: link.clone(),
                        effective,
                    };
                }
                Some(_) => {}
                None => {
                    winners.insert(
                        key,
                        Winner {
                            owner,
                            link: link.clone(),
                            effective,
                        },
                    );
                }
            }
        }
    }

    let mut owned = vec![Vec::new(); manifests.len()];
    for (idx, (_, links)) in manifests.iter().enumerate() {
        let candidates = links
            .archives
            .iter()
            .map(|l| (LinkKind::Archive, l))
            .chain(links.schemas.iter().map(|l| (LinkKind::Schema, l)));
        for (kind, link) in candidates {
            if let Some(winner) = winners.get(&(kind, link.filename.clone())) {
                if winner.owner == idx {
                    owned[idx].push(OwnedArtifact {
                        kind,
                        link: winner.link.clone(),
                    });
                }
            }
        }
    }
    owned
}

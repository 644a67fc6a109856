//! Per-manifest processing stages.

use std::fmt;

/// Where a manifest is in its processing.
///
/// ```text
/// Discovered -> XmlFetched -> LinksExtracted -> FilesResolved -> Downloading -> Completed
///      \              \              \               \               \
///       `--------------`--------------`---------------`---------------`--> Incomplete
/// ```
///
/// `LinksExtracted -> Completed` is also allowed for manifests with no links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ManifestStage {
    Discovered,
    XmlFetched,
    LinksExtracted,
    FilesResolved,
    Downloading,
    Completed,
    Incomplete,
}

impl ManifestStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Incomplete)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_advance_to(self, next: Self) -> bool {
        use ManifestStage::*;
        match (self, next) {
            (from, Incomplete) => !from.is_terminal(),
            (Discovered, XmlFetched)
            | (XmlFetched, LinksExtracted)
            | (LinksExtracted, FilesResolved)
            | (LinksExtracted, Completed)
            | (FilesResolved, Downloading)
            | (Downloading, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ManifestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Discovered => "discovered",
            Self::XmlFetched => "xml_fetched",
            Self::LinksExtracted => "links_extracted",
            Self::FilesResolved => "files_resolved",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Incomplete => "incomplete",
        };
        f.write_str(s)
    }
}

/// Stage tracker for one manifest.
#[derive(Debug, Clone)]
pub struct StageTracker {
    manifest: String,
    stage: ManifestStage,
}

impl StageTracker {
    pub fn new(manifest: impl Into<String>) -> Self {
        Self {
            manifest: manifest.into(),
            stage: ManifestStage::Discovered,
        }
    }

    pub fn stage(&self) -> ManifestStage {
        self.stage
    }

    /// Move to `next`, logging the transition.
    ///
    /// Illegal transitions are logged and ignored.
    pub fn advance(&mut self, next: ManifestStage) {
        if !self.stage.can_advance_to(next) {
            tracing::warn!(
                manifest = %self.manifest,
                from = %self.stage,
                to = %next,
                "Ignoring illegal stage transition"
            );
            return;
        }
        tracing::debug!(manifest = %self.manifest, from = %self.stage, to = %next, "Stage transition");
        self.stage = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ManifestStage::*;

    #[test]
    fn test_happy_path() {
        let mut t = StageTracker::new("m.xml");
        for next in [XmlFetched, LinksExtracted, FilesResolved, Downloading, Completed] {
            t.advance(next);
            assert_eq!(t.stage(), next);
        }
        assert!(t.stage().is_terminal());
    }

    #[test]
    fn test_empty_manifest_completes_early() {
        assert!(LinksExtracted.can_advance_to(Completed));
        assert!(!XmlFetched.can_advance_to(Completed));
    }

    #[test]
    fn test_any_live_stage_can_fail() {
        for from in [Discovered, XmlFetched, LinksExtracted, FilesResolved, Downloading] {
            assert!(from.can_advance_to(Incomplete), "{}", from);
        }
        assert!(!Completed.can_advance_to(Incomplete));
    }

    #[test]
    fn test_illegal_transition_is_ignored() {
        let mut t = StageTracker::new("m.xml");
        t.advance(Downloading);
        assert_eq!(t.stage(), Discovered);
    }
}

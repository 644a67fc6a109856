//! The harvest run: discover, extract, deduplicate, download, record.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Datelike;
use reqwest::Url;
use roxmltree::Document;

use super::dedup::{assign_owners, OwnedArtifact};
use super::error::{HarvestError, HarvestResult};
use super::report::{ResumePoint, RunCounters, RunReport};
use super::stage::{ManifestStage, StageTracker};
use super::status::{FileState, FileStatus, ManifestStatus, StatusKind, StatusStore};
use crate::config::HarvestConfig;
use crate::download::{
    strategy_for, CompletionCallback, DownloadEngine, DownloadOutcome, DownloadRequest,
    DownloadResult, DownloadStrategy, HttpTransport, InFlightSet, Transport,
};
use crate::integrity::{ArtifactKind, IntegrityChecker};
use crate::manifest::{
    extract_links, parse_index, raw_excerpt, ExtractedLinks, LinkKind, ManifestError,
    ManifestLocation, ManifestRef, SubManifest,
};
use crate::resolver::{basename_of, target_directory};

/// Progress notifications for front ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent<'a> {
    /// Sub-manifests selected for this run.
    ManifestsDiscovered { total: usize },
    /// A manifest entered its download phase.
    ManifestStarted { manifest: &'a str, artifacts: usize },
    FileFinished {
        manifest: &'a str,
        filename: &'a str,
        state: FileState,
    },
    ManifestFinished { manifest: &'a str, status: StatusKind },
}

/// Receives [`ProgressEvent`]s, possibly from download worker threads.
pub type ProgressCallback = dyn Fn(&ProgressEvent<'_>) + Send + Sync;

/// A sub-manifest whose links have been extracted.
struct FetchedManifest {
    sub: SubManifest,
    links: ExtractedLinks,
    tracker: StageTracker,
}

/// Artifact with its resolved local path.
struct Target {
    kind: LinkKind,
    filename: String,
    url: String,
    dest: PathBuf,
}

enum ManifestOutcome {
    Finished,
    Interrupted,
}

/// Runs the harvest pipeline.
///
/// # Architecture
///
/// ```text
/// ManifestRef ──► index ──► SubManifest* ──► extract_links ──► assign_owners
///                                                                  │
///        StatusStore ◄── ManifestStatus ◄── DownloadStrategy ◄─────┘
///                                              │
///                                     DownloadEngine ──► Transport
/// ```
pub struct Harvester {
    config: HarvestConfig,
    checker: Arc<IntegrityChecker>,
    engine: DownloadEngine,
    strategy: Box<dyn DownloadStrategy>,
    status: StatusStore,
    counters: RunCounters,
    cancel: Arc<AtomicBool>,
    progress: Option<Arc<ProgressCallback>>,
}

impl Harvester {
    /// Build a harvester with the given transport.
    ///
    /// The integrity cache and status store are loaded from the configured
    /// state directory.
    pub fn new(config: HarvestConfig, transport: Arc<dyn Transport>) -> Self {
        let checker = Arc::new(IntegrityChecker::with_cache_file(
            config.paths.integrity_cache(),
            config.integrity.archive_timeout,
        ));
        let cancel = Arc::new(AtomicBool::new(false));
        let engine = DownloadEngine::new(transport, Arc::clone(&checker), Arc::new(InFlightSet::new()))
            .with_settings(config.engine_settings())
            .with_cancel_flag(Arc::clone(&cancel));
        let status = StatusStore::load(&config.paths.status_file());
        let strategy = strategy_for(config.download.parallel);

        Self {
            config,
            checker,
            engine,
            strategy,
            status,
            counters: RunCounters::new(),
            cancel,
            progress: None,
        }
    }

    /// Build a harvester talking HTTP.
    pub fn with_http(config: HarvestConfig) -> HarvestResult<Self> {
        let transport = HttpTransport::new(config.http_options())?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    /// Share a cancellation flag, e.g. one set by a Ctrl+C handler.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.engine = self.engine.with_cancel_flag(Arc::clone(&cancel));
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: Arc<ProgressCallback>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_strategy(mut self, strategy: Box<dyn DownloadStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    pub fn status(&self) -> &StatusStore {
        &self.status
    }

    pub fn checker(&self) -> &Arc<IntegrityChecker> {
        &self.checker
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn notify(&self, event: ProgressEvent<'_>) {
        if let Some(progress) = &self.progress {
            progress(&event);
        }
    }

    /// Run the pipeline over every configured manifest.
    ///
    /// # Errors
    ///
    /// Fails only with [`HarvestError::NoManifests`] when no top-level
    /// manifest could be read. Everything else is recorded per manifest.
    pub fn run(&mut self) -> HarvestResult<RunReport> {
        let manifests = self.config.manifests.clone();
        tracing::info!(
            manifests = manifests.len(),
            strategy = self.strategy.name(),
            force = self.config.force_refresh,
            "Starting harvest"
        );

        let mut subs = Vec::new();
        let mut readable = 0;
        for manifest in &manifests {
            match self.load_index(manifest) {
                Ok(found) => {
                    readable += 1;
                    tracing::info!(
                        category = %manifest.category,
                        location = %manifest.location,
                        sub_manifests = found.len(),
                        "Read manifest index"
                    );
                    subs.extend(found);
                }
                Err(e) => {
                    tracing::error!(category = %manifest.category, error = %e, "Failed to read manifest index");
                    RunCounters::bump(&self.counters.manifests_failed);
                }
            }
        }
        if readable == 0 {
            return Err(HarvestError::NoManifests {
                attempted: manifests.len(),
            });
        }

        let pending = self.select(subs);
        self.notify(ProgressEvent::ManifestsDiscovered {
            total: pending.len(),
        });

        let mut resume = None;
        let mut fetched = Vec::with_capacity(pending.len());
        for sub in pending {
            if self.is_cancelled() {
                resume = Some(fetch_resume_point(&fetched, &sub));
                break;
            }
            let mut tracker = StageTracker::new(&sub.filename);
            match self.fetch_links(&sub, &mut tracker) {
                Ok(links) => fetched.push(FetchedManifest { sub, links, tracker }),
                Err(e) if self.is_cancelled() => {
                    tracing::warn!(manifest = %sub.filename, error = %e, "Interrupted while fetching manifest");
                    resume = Some(fetch_resume_point(&fetched, &sub));
                    break;
                }
                Err(e) => {
                    tracker.advance(ManifestStage::Incomplete);
                    tracing::error!(manifest = %sub.filename, error = %e, "Skipping manifest");
                    RunCounters::bump(&self.counters.manifests_processed);
                    RunCounters::bump(&self.counters.manifests_failed);
                    self.persist(&sub.filename, ManifestStatus::failed(e.to_string()));
                }
            }
        }

        if resume.is_none() {
            let keyed: Vec<_> = fetched.iter().map(|f| (f.sub.date, &f.links)).collect();
            let owned = assign_owners(&keyed);

            for (work, artifacts) in fetched.into_iter().zip(owned) {
                if self.is_cancelled() {
                    resume = Some(resume_point(&work.sub));
                    break;
                }
                let sub = work.sub.clone();
                if let ManifestOutcome::Interrupted = self.process(work, artifacts) {
                    resume = Some(resume_point(&sub));
                    break;
                }
            }
        }

        if let Err(e) = self.checker.flush() {
            tracing::warn!(error = %e, "Failed to save integrity cache");
        }

        let mut report = self.counters.snapshot();
        report.resume = resume;
        tracing::info!(
            processed = report.manifests_processed,
            completed = report.manifests_completed,
            incomplete = report.manifests_incomplete,
            skipped = report.manifests_skipped,
            downloaded = report.files_downloaded,
            existing = report.files_existing,
            failed = report.files_failed,
            bytes = report.bytes_downloaded,
            interrupted = report.was_interrupted(),
            "Harvest finished"
        );
        Ok(report)
    }

    /// Read a top-level manifest into sub-manifest references.
    fn load_index(&self, manifest: &ManifestRef) -> Result<Vec<SubManifest>, ManifestError> {
        let location = manifest.location.to_string();
        let content = match &manifest.location {
            ManifestLocation::Remote(url) => {
                let mut name = basename_of(url.path());
                if name.is_empty() {
                    name = "index.xml".to_string();
                }
                let dest = self
                    .config
                    .paths
                    .manifest_dir
                    .join(&manifest.category)
                    .join(name);
                let request = DownloadRequest::new(url.as_str(), &dest).with_force_refresh(true);
                if let Err(e) = self.engine.download(&request) {
                    if !dest.is_file() {
                        return Err(ManifestError::Fetch {
                            url: location,
                            reason: e.to_string(),
                        });
                    }
                    tracing::warn!(url = %url, error = %e, "Index refresh failed, using cached copy");
                }
                read_manifest(&dest)?
            }
            ManifestLocation::Local(path) => read_manifest(path)?,
        };

        let mut subs = parse_index(
            &content,
            &manifest.category,
            &location,
            manifest.location.base_url(),
        )?;

        // Relative links in a local index point next to the index file.
        if let ManifestLocation::Local(path) = &manifest.location {
            let dir = path.parent().unwrap_or_else(|| Path::new(""));
            for sub in &mut subs {
                if !is_remote(&sub.url) && Path::new(&sub.url).is_relative() {
                    sub.url = dir.join(&sub.url).to_string_lossy().into_owned();
                }
            }
        }
        Ok(subs)
    }

    /// Order sub-manifests oldest first and drop the ones not due this run.
    fn select(&self, mut subs: Vec<SubManifest>) -> Vec<SubManifest> {
        let mut seen = HashSet::new();
        subs.retain(|sub| {
            let fresh = seen.insert(sub.filename.clone());
            if !fresh {
                tracing::warn!(
                    manifest = %sub.filename,
                    category = %sub.category,
                    "Sub-manifest listed under several categories, keeping the first"
                );
            }
            fresh
        });
        subs.sort_by_key(|sub| (sub.date.is_none(), sub.date));

        let start = self.config.start.and_then(|s| s.first_day());
        subs.into_iter()
            .filter(|sub| {
                if !self.config.force_refresh && self.status.is_completed(&sub.filename) {
                    tracing::debug!(manifest = %sub.filename, "Already completed, skipping");
                    RunCounters::bump(&self.counters.manifests_skipped);
                    return false;
                }
                if let (Some(start), Some(date)) = (start, sub.date) {
                    if date < start {
                        tracing::debug!(manifest = %sub.filename, %date, "Before start date, skipping");
                        RunCounters::bump(&self.counters.manifests_skipped);
                        return false;
                    }
                }
                true
            })
            .collect()
    }

    /// Fetch (or reuse) a sub-manifest and extract its links.
    fn fetch_links(&self, sub: &SubManifest, tracker: &mut StageTracker) -> Result<ExtractedLinks, ManifestError> {
        let (path, cached) = if is_remote(&sub.url) {
            let dest = self
                .config
                .paths
                .manifest_dir
                .join(&sub.category)
                .join(&sub.filename);
            let request =
                DownloadRequest::new(&sub.url, &dest).with_force_refresh(self.config.force_refresh);
            match self.engine.download(&request) {
                Ok(DownloadOutcome::InFlight) => {
                    return Err(ManifestError::Fetch {
                        url: sub.url.clone(),
                        reason: "transfer already in progress".to_string(),
                    })
                }
                Ok(_) => {}
                Err(e) => {
                    return Err(ManifestError::Fetch {
                        url: sub.url.clone(),
                        reason: e.to_string(),
                    })
                }
            }
            (dest, true)
        } else {
            (PathBuf::from(&sub.url), false)
        };

        let content = read_manifest(&path)?;
        tracker.advance(ManifestStage::XmlFetched);

        let doc = Document::parse(&content).map_err(|e| {
            tracing::warn!(
                manifest = %sub.filename,
                error = %e,
                raw = raw_excerpt(&content),
                "Sub-manifest is not well-formed XML"
            );
            if cached {
                // Force a fresh copy next run.
                if let Err(e) = fs::remove_file(&path) {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove broken sub-manifest");
                }
                self.checker.invalidate(&path);
            }
            ManifestError::Parse {
                location: sub.url.clone(),
                reason: e.to_string(),
            }
        })?;

        let base = Url::parse(&sub.url).ok();
        let links = extract_links(&doc, base.as_ref());
        tracker.advance(ManifestStage::LinksExtracted);
        tracing::debug!(
            manifest = %sub.filename,
            archives = links.archives.len(),
            schemas = links.schemas.len(),
            "Extracted links"
        );
        Ok(links)
    }

    /// Resolve, check and download the artifacts one manifest owns.
    fn process(&mut self, work: FetchedManifest, artifacts: Vec<OwnedArtifact>) -> ManifestOutcome {
        let FetchedManifest {
            sub, links, mut tracker,
        } = work;
        let name = sub.filename.clone();

        if links.is_empty() {
            tracker.advance(ManifestStage::Completed);
            tracing::info!(manifest = %name, "Manifest has no links");
            self.finish(&name, ManifestStatus::finished(Vec::new(), Vec::new(), Vec::new()));
            return ManifestOutcome::Finished;
        }

        let mut targets = Vec::with_capacity(artifacts.len());
        let mut unresolved = Vec::new();
        for artifact in artifacts {
            let filename = artifact.link.filename.clone();
            let dest = match artifact.kind {
                LinkKind::Schema => self.config.paths.schema_dir.join(&filename),
                LinkKind::Archive => match target_directory(&sub.category, &sub.filename, &filename) {
                    Some(dir) => self.config.paths.data_dir.join(dir).join(&filename),
                    None => {
                        unresolved.push(filename.clone());
                        PathBuf::new()
                    }
                },
            };
            targets.push(Target {
                kind: artifact.kind,
                filename,
                url: artifact.link.url,
                dest,
            });
        }

        if !unresolved.is_empty() {
            tracker.advance(ManifestStage::Incomplete);
            let error = format!(
                "cannot determine target directory for {}",
                unresolved.join(", ")
            );
            tracing::error!(manifest = %name, error = %error, "Aborting manifest");
            let states = vec![FileState::Missing; targets.len()];
            self.finish(&name, build_status(&targets, &states, vec![error]));
            return ManifestOutcome::Finished;
        }
        tracker.advance(ManifestStage::FilesResolved);

        let previous = match self.status.begin(&name) {
            Ok(previous) => previous,
            Err(e) => {
                tracing::warn!(manifest = %name, error = %e, "Failed to save processing status");
                self.status.get(&name).cloned()
            }
        };
        tracker.advance(ManifestStage::Downloading);
        self.notify(ProgressEvent::ManifestStarted {
            manifest: &name,
            artifacts: targets.len(),
        });

        let mut states: Vec<Option<FileState>> = vec![None; targets.len()];
        let mut errors = Vec::new();

        let existing: Vec<PathBuf> = targets
            .iter()
            .filter(|t| t.dest.exists())
            .map(|t| t.dest.clone())
            .collect();
        let verdicts = self.checker.check_batch(&existing, self.config.batch_options());

        let mut requests = Vec::new();
        let mut request_targets = Vec::new();
        for (i, target) in targets.iter().enumerate() {
            match verdicts.get(&target.dest).copied() {
                Some(true) if !self.config.force_refresh => {
                    states[i] = Some(FileState::Exists);
                    RunCounters::bump(&self.counters.files_existing);
                    self.notify(ProgressEvent::FileFinished {
                        manifest: &name,
                        filename: &target.filename,
                        state: FileState::Exists,
                    });
                    continue;
                }
                Some(false) => {
                    tracing::warn!(path = %target.dest.display(), "Removing invalid file");
                    if let Err(e) = fs::remove_file(&target.dest) {
                        tracing::warn!(path = %target.dest.display(), error = %e, "Failed to remove invalid file");
                    }
                    self.checker.invalidate(&target.dest);
                }
                _ => {}
            }
            requests.push(DownloadRequest {
                url: target.url.clone(),
                dest: target.dest.clone(),
                kind: artifact_kind(target.kind),
                force_refresh: self.config.force_refresh,
            });
            request_targets.push(i);
        }

        let progress = self.progress.clone();
        let on_complete: &CompletionCallback<'_> = &|request, result| {
            if let Some(progress) = &progress {
                let filename = request
                    .dest
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                progress(&ProgressEvent::FileFinished {
                    manifest: &name,
                    filename: &filename,
                    state: file_state(result),
                });
            }
        };
        let results = self.strategy.execute(&self.engine, &requests, Some(on_complete));

        let mut interrupted = false;
        for (i, result) in request_targets.into_iter().zip(results) {
            let target = &targets[i];
            let state = file_state(&result);
            match result {
                Ok(DownloadOutcome::Downloaded { bytes }) => {
                    RunCounters::bump(&self.counters.files_downloaded);
                    RunCounters::add(&self.counters.bytes_downloaded, bytes);
                }
                Ok(DownloadOutcome::AlreadyValid) => {
                    RunCounters::bump(&self.counters.files_existing);
                }
                Ok(DownloadOutcome::InFlight) => {
                    errors.push(format!("{}: transfer already in progress", target.filename));
                }
                Err(e) if e.is_cancelled() => interrupted = true,
                Err(e) => {
                    tracing::error!(manifest = %name, url = %target.url, error = %e, "Download failed");
                    RunCounters::bump(&self.counters.files_failed);
                    errors.push(format!("{}: {}", target.filename, e));
                }
            }
            states[i] = Some(state);
        }

        if interrupted {
            tracing::warn!(manifest = %name, "Interrupted, manifest will be retried on the next run");
            if let Err(e) = self.status.restore(&name, previous) {
                tracing::warn!(manifest = %name, error = %e, "Failed to save processing status");
            }
            return ManifestOutcome::Interrupted;
        }

        let states: Vec<FileState> = states
            .into_iter()
            .map(|s| s.unwrap_or(FileState::Missing))
            .collect();
        let status = build_status(&targets, &states, errors);
        tracker.advance(if status.is_completed() {
            ManifestStage::Completed
        } else {
            ManifestStage::Incomplete
        });
        self.finish(&name, status);
        ManifestOutcome::Finished
    }

    /// Count, persist and announce a finished manifest.
    fn finish(&mut self, name: &str, status: ManifestStatus) {
        RunCounters::bump(&self.counters.manifests_processed);
        if status.is_completed() {
            RunCounters::bump(&self.counters.manifests_completed);
        } else {
            RunCounters::bump(&self.counters.manifests_incomplete);
        }
        tracing::info!(
            manifest = %name,
            status = %status.status,
            downloaded = status.count(FileState::Downloaded),
            existing = status.count(FileState::Exists),
            failed = status.count(FileState::Failed),
            errors = status.errors.len(),
            "Manifest processed"
        );
        let kind = status.status;
        self.persist(name, status);
        self.notify(ProgressEvent::ManifestFinished {
            manifest: name,
            status: kind,
        });
    }

    fn persist(&mut self, name: &str, status: ManifestStatus) {
        if let Err(e) = self.status.record(name, status) {
            tracing::warn!(manifest = %name, error = %e, "Failed to save processing status");
        }
    }
}

fn artifact_kind(kind: LinkKind) -> ArtifactKind {
    match kind {
        LinkKind::Archive => ArtifactKind::Archive,
        LinkKind::Schema => ArtifactKind::Plain,
    }
}

fn build_status(targets: &[Target], states: &[FileState], errors: Vec<String>) -> ManifestStatus {
    let mut zip_files = Vec::new();
    let mut xsd_files = Vec::new();
    for (target, state) in targets.iter().zip(states) {
        let entry = FileStatus::new(target.filename.clone(), *state);
        match target.kind {
            LinkKind::Archive => zip_files.push(entry),
            LinkKind::Schema => xsd_files.push(entry),
        }
    }
    ManifestStatus::finished(zip_files, xsd_files, errors)
}

fn file_state(result: &DownloadResult<DownloadOutcome>) -> FileState {
    match result {
        Ok(DownloadOutcome::Downloaded { .. }) => FileState::Downloaded,
        Ok(DownloadOutcome::AlreadyValid) => FileState::Exists,
        Ok(DownloadOutcome::InFlight) => FileState::Missing,
        Err(e) if e.is_cancelled() => FileState::Missing,
        Err(_) => FileState::Failed,
    }
}

fn resume_point(sub: &SubManifest) -> ResumePoint {
    ResumePoint {
        category: sub.category.clone(),
        manifest: sub.filename.clone(),
        year: sub.date.map(|d| d.year()),
        month: sub.date.map(|d| d.month()),
    }
}

/// Where to pick up after an interrupt in the fetch phase.
///
/// Nothing has been downloaded yet, so the oldest fetched manifest is the
/// first unfinished one.
fn fetch_resume_point(fetched: &[FetchedManifest], current: &SubManifest) -> ResumePoint {
    resume_point(fetched.first().map_or(current, |f| &f.sub))
}

fn is_remote(location: &str) -> bool {
    let lower = location.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn read_manifest(path: &Path) -> Result<String, ManifestError> {
    let bytes = fs::read(path).map_err(|e| ManifestError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

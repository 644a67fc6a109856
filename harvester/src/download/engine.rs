//! Single-artifact download with retry, throttling and in-flight exclusion.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::error::{DownloadError, DownloadResult};
use super::inflight::InFlightSet;
use super::retry::{is_retryable_status, RetryPolicy};
use super::throttle;
use super::transport::{Transport, TransportResponse};
use crate::integrity::{ArtifactKind, IntegrityChecker};

/// Buffer size for streaming response bodies (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Granularity of cancellable sleeps.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// One artifact to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub dest: PathBuf,
    pub kind: ArtifactKind,
    /// Re-download even if `dest` is already valid.
    pub force_refresh: bool,
}

impl DownloadRequest {
    /// Request with the kind inferred from `dest`.
    pub fn new(url: impl Into<String>, dest: impl Into<PathBuf>) -> Self {
        let dest = dest.into();
        Self {
            url: url.into(),
            kind: ArtifactKind::from_path(&dest),
            dest,
            force_refresh: false,
        }
    }

    pub fn with_force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }
}

/// What a successful call to [`DownloadEngine::download`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// `dest` already existed and passed its integrity check.
    AlreadyValid,
    /// A transfer completed and was moved into place.
    Downloaded { bytes: u64 },
    /// Another caller is already fetching this URL.
    InFlight,
}

/// Engine-level settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineSettings {
    pub retry: RetryPolicy,
    /// Average throughput ceiling in bytes per second.
    pub rate_limit: Option<u64>,
    /// Pause before every request.
    pub request_delay: Duration,
}

/// Downloads artifacts through a [`Transport`].
///
/// Transfers are written to a `.part` sibling of the destination and
/// renamed into place only after the body is complete and verified, so the
/// destination path never holds a partial file.
pub struct DownloadEngine {
    transport: Arc<dyn Transport>,
    checker: Arc<IntegrityChecker>,
    in_flight: Arc<InFlightSet>,
    settings: EngineSettings,
    cancel: Arc<AtomicBool>,
}

impl std::fmt::Debug for DownloadEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadEngine")
            .field("settings", &self.settings)
            .field("in_flight", &self.in_flight.len())
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl DownloadEngine {
    /// Create an engine with default settings.
    pub fn new(
        transport: Arc<dyn Transport>,
        checker: Arc<IntegrityChecker>,
        in_flight: Arc<InFlightSet>,
    ) -> Self {
        Self {
            transport,
            checker,
            in_flight,
            settings: EngineSettings::default(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Share a cancellation flag; setting it aborts transfers between chunks.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn checker(&self) -> &Arc<IntegrityChecker> {
        &self.checker
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Fetch one artifact.
    ///
    /// # Returns
    ///
    /// - `AlreadyValid` when `dest` is valid and refresh is not forced
    /// - `InFlight` when another caller holds the URL
    /// - `Downloaded` after a completed, verified transfer
    pub fn download(&self, request: &DownloadRequest) -> DownloadResult<DownloadOutcome> {
        if !request.force_refresh
            && request.dest.exists()
            && self.checker.is_valid(&request.dest)
        {
            tracing::debug!(dest = %request.dest.display(), "Already valid, skipping");
            return Ok(DownloadOutcome::AlreadyValid);
        }

        let Some(_guard) = self.in_flight.try_acquire(&request.url) else {
            tracing::debug!(url = %request.url, "Already in flight, skipping");
            return Ok(DownloadOutcome::InFlight);
        };

        let policy = self.settings.retry;
        let mut retry = 0;
        loop {
            if self.is_cancelled() {
                return Err(DownloadError::Cancelled {
                    url: request.url.clone(),
                });
            }

            match self.attempt(request) {
                Ok(bytes) => {
                    tracing::info!(
                        url = %request.url,
                        dest = %request.dest.display(),
                        bytes,
                        "Downloaded"
                    );
                    return Ok(DownloadOutcome::Downloaded { bytes });
                }
                Err(e) if e.is_retryable() && retry < policy.max_retries => {
                    let delay = policy.delay(retry, e.retry_after());
                    retry += 1;
                    tracing::warn!(
                        url = %request.url,
                        error = %e,
                        attempt = retry,
                        delay_ms = delay.as_millis() as u64,
                        "Download failed, retrying"
                    );
                    self.sleep(delay);
                }
                Err(e) if e.is_retryable() => {
                    return Err(DownloadError::RetriesExhausted {
                        url: request.url.clone(),
                        attempts: policy.max_attempts(),
                        last: Box::new(e),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One request-and-transfer attempt.
    fn attempt(&self, request: &DownloadRequest) -> DownloadResult<u64> {
        if !self.settings.request_delay.is_zero() {
            self.sleep(self.settings.request_delay);
        }

        let response = self.transport.get(&request.url)?;
        if !response.is_success() {
            return Err(status_error(&request.url, &response));
        }

        if let Some(parent) = request.dest.parent() {
            fs::create_dir_all(parent).map_err(|e| DownloadError::filesystem(parent, e))?;
        }

        let part = part_path(&request.dest);
        let result = self
            .stream_to(&request.url, response, &part)
            .and_then(|bytes| self.finish(request, &part).map(|_| bytes));

        if result.is_err() {
            if let Err(e) = fs::remove_file(&part) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %part.display(), error = %e, "Failed to remove partial file");
                }
            }
        }
        result
    }

    /// Stream the response body into `part`.
    fn stream_to(&self, url: &str, response: TransportResponse, part: &Path) -> DownloadResult<u64> {
        let expected = response.content_length;
        let mut body = response.body;

        let file = File::create(part).map_err(|e| DownloadError::filesystem(part, e))?;
        let mut writer = BufWriter::new(file);
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut written: u64 = 0;
        let started = Instant::now();

        loop {
            if self.is_cancelled() {
                return Err(DownloadError::Cancelled {
                    url: url.to_string(),
                });
            }

            let n = body
                .read(&mut buffer)
                .map_err(|e| DownloadError::transient(url, format!("read error: {}", e)))?;
            if n == 0 {
                break;
            }

            writer
                .write_all(&buffer[..n])
                .map_err(|e| DownloadError::filesystem(part, e))?;
            written += n as u64;

            if let Some(limit) = self.settings.rate_limit {
                if let Some(wait) = throttle::pace(written, started.elapsed(), limit) {
                    self.sleep(wait);
                }
            }
        }

        let file = writer
            .into_inner()
            .map_err(|e| DownloadError::filesystem(part, e.into_error()))?;
        file.sync_all()
            .map_err(|e| DownloadError::filesystem(part, e))?;

        if let Some(expected) = expected {
            if written != expected {
                return Err(DownloadError::transient(
                    url,
                    format!("body truncated: got {} of {} bytes", written, expected),
                ));
            }
        }

        Ok(written)
    }

    /// Verify the finished `.part` file and move it into place.
    fn finish(&self, request: &DownloadRequest, part: &Path) -> DownloadResult<()> {
        self.checker
            .verify_as(part, request.kind)
            .map_err(|source| DownloadError::CorruptArchive {
                path: request.dest.clone(),
                source,
            })?;

        fs::rename(part, &request.dest)
            .map_err(|e| DownloadError::filesystem(&request.dest, e))?;
        self.checker.invalidate(&request.dest);
        Ok(())
    }

    /// Sleep for `duration`, waking early on cancellation.
    fn sleep(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.is_cancelled() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

fn status_error(url: &str, response: &TransportResponse) -> DownloadError {
    if is_retryable_status(response.status) {
        DownloadError::Transient {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status),
            retry_after: response.retry_after,
        }
    } else {
        DownloadError::Permanent {
            url: url.to_string(),
            status: response.status,
        }
    }
}

/// Temporary sibling used while a transfer is in progress.
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

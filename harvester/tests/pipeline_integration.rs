//! Integration tests for the harvest pipeline.
//!
//! These tests drive a complete run against a scripted transport:
//! - Dated archives and undated schemas land in their target folders
//! - Reruns find valid files and download nothing
//! - Failed transfers never leave partial files behind
//! - Overlapping requests for one URL transfer it once
//!
//! Run with: `cargo test --test pipeline_integration`

use std::collections::HashMap;
use std::fs;
use std::io::{self, Cursor, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use tempfile::TempDir;
use zip::write::FileOptions;
use zip::ZipWriter;

use harvester::config::{HarvestConfig, PathsConfig};
use harvester::download::{
    part_path, DownloadEngine, DownloadError, DownloadOutcome, DownloadRequest, DownloadResult,
    EngineSettings, InFlightSet, RetryPolicy, Transport, TransportResponse,
};
use harvester::integrity::IntegrityChecker;
use harvester::manifest::ManifestRef;
use harvester::pipeline::{FileState, Harvester, StatusKind};

// ============================================================================
// Test Transport
// ============================================================================

#[derive(Clone)]
struct Page {
    status: u16,
    body: Vec<u8>,
    /// Error the body after this many bytes.
    cut_at: Option<usize>,
    read_delay: Duration,
}

impl Page {
    fn ok(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            body,
            cut_at: None,
            read_delay: Duration::ZERO,
        }
    }
}

struct Body {
    data: Cursor<Vec<u8>>,
    cut_at: Option<usize>,
    read_delay: Duration,
}

impl Read for Body {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        thread::sleep(self.read_delay);
        let pos = self.data.position() as usize;
        let limit = self.cut_at.unwrap_or(usize::MAX);
        if pos >= limit {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        }
        let max = buf.len().min(limit - pos).min(512);
        self.data.read(&mut buf[..max])
    }
}

/// Serves fixed pages and counts requests per URL.
#[derive(Default)]
struct StaticSite {
    pages: HashMap<String, Page>,
    hits: Mutex<HashMap<String, usize>>,
    bytes_served: AtomicUsize,
}

impl StaticSite {
    fn page(mut self, url: &str, page: Page) -> Self {
        self.pages.insert(url.to_string(), page);
        self
    }

    fn hits(&self, url: &str) -> usize {
        self.hits.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    fn total_hits(&self) -> usize {
        self.hits.lock().unwrap().values().sum()
    }
}

impl Transport for StaticSite {
    fn get(&self, url: &str) -> DownloadResult<TransportResponse> {
        *self.hits.lock().unwrap().entry(url.to_string()).or_default() += 1;
        let page = self.pages.get(url).cloned().unwrap_or(Page {
            status: 404,
            body: Vec::new(),
            cut_at: None,
            read_delay: Duration::ZERO,
        });
        if page.status == 200 {
            self.bytes_served.fetch_add(page.body.len(), Ordering::SeqCst);
        }
        Ok(TransportResponse {
            status: page.status,
            content_length: Some(page.body.len() as u64),
            retry_after: None,
            body: Box::new(Body {
                data: Cursor::new(page.body),
                cut_at: page.cut_at,
                read_delay: page.read_delay,
            }),
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

const SUB_URL: &str = "https://portal.example/opendata/248/data-20230915.xml";
const ZIP_URL: &str = "https://portal.example/files/data-20230915-structure.zip";
const XSD_URL: &str = "https://portal.example/files/schema.xsd";

fn archive(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut zip = ZipWriter::new(&mut cursor);
        for (name, data) in members {
            zip.start_file(*name, FileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }
    cursor.into_inner()
}

fn portal() -> StaticSite {
    let sub_manifest = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<meta>
  <data>
    <file modified="2023-09-15T10:00:00">
      <source>{}</source>
    </file>
  </data>
  <structure href="{}"/>
</meta>"#,
        ZIP_URL, XSD_URL
    );
    StaticSite::default()
        .page(SUB_URL, Page::ok(sub_manifest.into_bytes()))
        .page(ZIP_URL, Page::ok(archive(&[("data.xml", &[b'd'; 4096])])))
        .page(XSD_URL, Page::ok(b"<xs:schema/>".to_vec()))
}

fn config_for(root: &Path) -> HarvestConfig {
    let index = root.join("list.xml");
    fs::write(
        &index,
        format!(r#"<list><item link="{}"/><item link="readme.txt"/></list>"#, SUB_URL),
    )
    .unwrap();
    HarvestConfig::default()
        .with_paths(PathsConfig::under(root))
        .with_manifests(vec![ManifestRef::new("248", &index.to_string_lossy())])
}

fn fast_engine(transport: Arc<dyn Transport>) -> DownloadEngine {
    DownloadEngine::new(
        transport,
        Arc::new(IntegrityChecker::default()),
        Arc::new(InFlightSet::new()),
    )
    .with_settings(EngineSettings {
        retry: RetryPolicy {
            max_retries: 1,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(10),
        },
        ..EngineSettings::default()
    })
}

// ============================================================================
// Integration Tests
// ============================================================================

#[test]
fn test_end_to_end_layout_and_rerun() {
    let temp = TempDir::new().unwrap();
    let site = Arc::new(portal());

    let mut harvester = Harvester::new(config_for(temp.path()), site.clone());
    let report = harvester.run().unwrap();

    assert_eq!(report.manifests_completed, 1);
    assert_eq!(report.files_downloaded, 2);
    assert!(report.is_clean());

    let zip_path = temp
        .path()
        .join("data/248/2023-09/data-20230915-structure.zip");
    let xsd_path = temp.path().join("data/xsd/schema.xsd");
    assert!(zip_path.is_file());
    assert!(xsd_path.is_file());
    assert!(!part_path(&zip_path).exists());

    let status = harvester.status().get("data-20230915.xml").unwrap();
    assert_eq!(status.status, StatusKind::Completed);
    assert_eq!(status.zip_files[0].status, FileState::Downloaded);
    assert_eq!(status.xsd_files[0].status, FileState::Downloaded);

    // Forget the status record so the manifest is processed again.
    fs::remove_file(temp.path().join("processing_status.json")).unwrap();
    let hits_before = site.total_hits();

    let mut rerun = Harvester::new(config_for(temp.path()), site.clone());
    let report = rerun.run().unwrap();

    assert_eq!(report.bytes_downloaded, 0);
    assert_eq!(report.files_downloaded, 0);
    assert_eq!(report.files_existing, 2);
    assert_eq!(site.total_hits(), hits_before);

    let status = rerun.status().get("data-20230915.xml").unwrap();
    assert_eq!(status.status, StatusKind::Completed);
    assert_eq!(status.zip_files[0].status, FileState::Exists);
    assert_eq!(status.xsd_files[0].status, FileState::Exists);
}

#[test]
fn test_completed_manifest_skipped_on_rerun() {
    let temp = TempDir::new().unwrap();
    let site = Arc::new(portal());

    Harvester::new(config_for(temp.path()), site.clone())
        .run()
        .unwrap();
    let hits_before = site.total_hits();

    let report = Harvester::new(config_for(temp.path()), site.clone())
        .run()
        .unwrap();
    assert_eq!(report.manifests_skipped, 1);
    assert_eq!(report.manifests_processed, 0);
    assert_eq!(site.total_hits(), hits_before);
}

#[test]
fn test_corrupted_local_archive_is_replaced() {
    let temp = TempDir::new().unwrap();
    let site = Arc::new(portal());
    let zip_path = temp
        .path()
        .join("data/248/2023-09/data-20230915-structure.zip");
    fs::create_dir_all(zip_path.parent().unwrap()).unwrap();
    fs::write(&zip_path, b"PK\x03\x04 truncated").unwrap();

    let report = Harvester::new(config_for(temp.path()), site.clone())
        .run()
        .unwrap();

    assert_eq!(report.files_downloaded, 2);
    assert_eq!(site.hits(ZIP_URL), 1);
    assert!(IntegrityChecker::default().is_valid(&zip_path));
}

#[test]
fn test_interrupted_transfer_leaves_no_file() {
    let temp = TempDir::new().unwrap();
    let body = archive(&[("data.xml", &[b'x'; 8192])]);
    let site = Arc::new(StaticSite::default().page(
        ZIP_URL,
        Page {
            cut_at: Some(body.len() / 2),
            ..Page::ok(body)
        },
    ));
    let engine = fast_engine(site.clone());
    let dest = temp.path().join("out").join("data.zip");

    let err = engine
        .download(&DownloadRequest::new(ZIP_URL, &dest))
        .unwrap_err();

    assert!(matches!(err, DownloadError::RetriesExhausted { .. }));
    assert_eq!(site.hits(ZIP_URL), 2);
    assert!(!dest.exists());
    assert!(!part_path(&dest).exists());
}

#[test]
fn test_concurrent_requests_transfer_once() {
    let temp = TempDir::new().unwrap();
    let site = Arc::new(StaticSite::default().page(
        ZIP_URL,
        Page {
            read_delay: Duration::from_millis(100),
            ..Page::ok(archive(&[("data.xml", &[b'y'; 2048])]))
        },
    ));
    let engine = Arc::new(fast_engine(site.clone()));
    let dest = temp.path().join("shared.zip");
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            let dest = dest.clone();
            thread::spawn(move || {
                barrier.wait();
                engine.download(&DownloadRequest::new(ZIP_URL, &dest))
            })
        })
        .collect();
    let outcomes: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect();

    assert_eq!(site.hits(ZIP_URL), 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, DownloadOutcome::Downloaded { .. }))
            .count(),
        1
    );
    assert!(outcomes.contains(&DownloadOutcome::InFlight));
    assert!(dest.is_file());
}

//! Configuration.
//!
//! Settings come from an INI file layered under command-line overrides:
//!
//! ```ini
//! [paths]
//! data_dir = data
//! schema_dir = data/xsd
//! manifest_dir = data/xml
//! state_dir = .
//! log_dir = logs
//!
//! [manifests]
//! 248 = https://portal.example/opendata/248/list.xml
//! no248 = https://portal.example/opendata/no248/list.xml
//!
//! [download]
//! timeout = 30
//! connect_timeout = 10
//! max_retries = 5
//! backoff_secs = 2
//! rate_limit_kib = 0
//! parallel = 1
//! request_delay_ms = 0
//! user_agent = harvester
//!
//! [integrity]
//! archive_timeout = 30
//! workers = 8
//! batch_size = 1000
//! ```
//!
//! A missing file means defaults; unknown keys are ignored.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use crate::download::{EngineSettings, HttpOptions, RetryPolicy, DEFAULT_USER_AGENT};
use crate::integrity::{BatchOptions, DEFAULT_ARCHIVE_TIMEOUT};
use crate::manifest::ManifestRef;

/// File name looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "harvester.ini";

/// File name of the integrity cache inside the state directory.
pub const INTEGRITY_CACHE_FILE: &str = "integrity_cache.json";

/// File name of the processing status inside the state directory.
pub const STATUS_FILE: &str = "processing_status.json";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("invalid value for [{section}] {key}: '{value}'")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
    },

    #[error("invalid manifest entry '{entry}': {reason}")]
    InvalidManifest { entry: String, reason: String },

    #[error("--start-month requires --start-year")]
    MonthWithoutYear,

    #[error("start month must be 1-12, got {0}")]
    InvalidMonth(u32),
}

/// First month to process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartPoint {
    pub year: i32,
    /// 1-12; `None` means January.
    pub month: Option<u32>,
}

impl StartPoint {
    /// Validate and build a start point from optional CLI values.
    pub fn from_parts(year: Option<i32>, month: Option<u32>) -> Result<Option<Self>, ConfigError> {
        match (year, month) {
            (None, None) => Ok(None),
            (None, Some(_)) => Err(ConfigError::MonthWithoutYear),
            (Some(_), Some(m)) if !(1..=12).contains(&m) => Err(ConfigError::InvalidMonth(m)),
            (Some(year), month) => Ok(Some(Self { year, month })),
        }
    }

    /// First day covered.
    pub fn first_day(&self) -> Option<chrono::NaiveDate> {
        chrono::NaiveDate::from_ymd_opt(self.year, self.month.unwrap_or(1), 1)
    }
}

/// Filesystem layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathsConfig {
    /// Root for `{category}/{YYYY}-{MM}` archive folders.
    pub data_dir: PathBuf,
    /// Flat folder for schema files.
    pub schema_dir: PathBuf,
    /// Cache of fetched manifests.
    pub manifest_dir: PathBuf,
    /// Location of the integrity cache and status files.
    pub state_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            schema_dir: PathBuf::from("data").join("xsd"),
            manifest_dir: PathBuf::from("data").join("xml"),
            state_dir: PathBuf::from("."),
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl PathsConfig {
    /// Layout with every directory under `root`.
    pub fn under(root: &Path) -> Self {
        Self {
            data_dir: root.join("data"),
            schema_dir: root.join("data").join("xsd"),
            manifest_dir: root.join("data").join("xml"),
            state_dir: root.to_path_buf(),
            log_dir: root.join("logs"),
        }
    }

    pub fn integrity_cache(&self) -> PathBuf {
        self.state_dir.join(INTEGRITY_CACHE_FILE)
    }

    pub fn status_file(&self) -> PathBuf {
        self.state_dir.join(STATUS_FILE)
    }
}

/// Network settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub max_retries: u32,
    pub backoff: Duration,
    /// Throughput ceiling in KiB/s.
    pub rate_limit_kib: Option<u64>,
    /// Download workers; 1 means sequential.
    pub parallel: usize,
    pub request_delay: Duration,
    pub user_agent: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        let http = HttpOptions::default();
        Self {
            timeout: http.timeout,
            connect_timeout: http.connect_timeout,
            max_retries: retry.max_retries,
            backoff: retry.initial_backoff,
            rate_limit_kib: None,
            parallel: 1,
            request_delay: Duration::ZERO,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Integrity checking settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityConfig {
    pub archive_timeout: Duration,
    pub workers: usize,
    pub batch_size: usize,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        let batch = BatchOptions::default();
        Self {
            archive_timeout: DEFAULT_ARCHIVE_TIMEOUT,
            workers: batch.workers,
            batch_size: batch.batch_size,
        }
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarvestConfig {
    pub paths: PathsConfig,
    pub manifests: Vec<ManifestRef>,
    pub download: DownloadConfig,
    pub integrity: IntegrityConfig,
    pub start: Option<StartPoint>,
    pub force_refresh: bool,
}

impl HarvestConfig {
    /// Load from an explicit file, `./harvester.ini`, or the user config
    /// directory, in that order. Returns the file actually used, if any.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        if let Some(path) = explicit {
            return Ok((Self::from_file(path)?, Some(path.to_path_buf())));
        }

        for candidate in default_locations() {
            if candidate.is_file() {
                return Ok((Self::from_file(&candidate)?, Some(candidate)));
            }
        }

        Ok((Self::default(), None))
    }

    /// Load from an INI file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_ini(&ini)
    }

    /// Parse INI text.
    pub fn from_ini_str(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Read {
            path: PathBuf::from("<string>"),
            reason: e.to_string(),
        })?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(section) = ini.section(Some("paths")) {
            let paths = &mut config.paths;
            for (key, target) in [
                ("data_dir", &mut paths.data_dir),
                ("schema_dir", &mut paths.schema_dir),
                ("manifest_dir", &mut paths.manifest_dir),
                ("state_dir", &mut paths.state_dir),
                ("log_dir", &mut paths.log_dir),
            ] {
                if let Some(value) = section.get(key).filter(|v| !v.trim().is_empty()) {
                    *target = expand_home(value.trim());
                }
            }
        }

        if let Some(section) = ini.section(Some("manifests")) {
            for (category, location) in section.iter() {
                let entry = format!("{}={}", category, location);
                let manifest = entry
                    .parse::<ManifestRef>()
                    .map_err(|e| ConfigError::InvalidManifest {
                        entry: entry.clone(),
                        reason: e.to_string(),
                    })?;
                config.manifests.push(manifest);
            }
        }

        if let Some(section) = ini.section(Some("download")) {
            let d = &mut config.download;
            if let Some(v) = parse_key::<u64>(section, "download", "timeout")? {
                d.timeout = Duration::from_secs(v);
            }
            if let Some(v) = parse_key::<u64>(section, "download", "connect_timeout")? {
                d.connect_timeout = Duration::from_secs(v);
            }
            if let Some(v) = parse_key::<u32>(section, "download", "max_retries")? {
                d.max_retries = v;
            }
            if let Some(v) = parse_key::<u64>(section, "download", "backoff_secs")? {
                d.backoff = Duration::from_secs(v);
            }
            if let Some(v) = parse_key::<u64>(section, "download", "rate_limit_kib")? {
                d.rate_limit_kib = (v > 0).then_some(v);
            }
            if let Some(v) = parse_key::<usize>(section, "download", "parallel")? {
                d.parallel = v.max(1);
            }
            if let Some(v) = parse_key::<u64>(section, "download", "request_delay_ms")? {
                d.request_delay = Duration::from_millis(v);
            }
            if let Some(v) = section.get("user_agent").filter(|v| !v.trim().is_empty()) {
                d.user_agent = v.trim().to_string();
            }
        }

        if let Some(section) = ini.section(Some("integrity")) {
            let i = &mut config.integrity;
            if let Some(v) = parse_key::<u64>(section, "integrity", "archive_timeout")? {
                i.archive_timeout = Duration::from_secs(v);
            }
            if let Some(v) = parse_key::<usize>(section, "integrity", "workers")? {
                i.workers = v.max(1);
            }
            if let Some(v) = parse_key::<usize>(section, "integrity", "batch_size")? {
                i.batch_size = v.max(1);
            }
        }

        Ok(config)
    }

    pub fn with_paths(mut self, paths: PathsConfig) -> Self {
        self.paths = paths;
        self
    }

    /// Replace the configured manifests (used when given on the command line).
    pub fn with_manifests(mut self, manifests: Vec<ManifestRef>) -> Self {
        self.manifests = manifests;
        self
    }

    pub fn with_start(mut self, start: Option<StartPoint>) -> Self {
        self.start = start;
        self
    }

    pub fn with_force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }

    pub fn with_parallel(mut self, workers: usize) -> Self {
        self.download.parallel = workers.max(1);
        self
    }

    /// Set the throughput ceiling in KiB/s; zero disables it.
    pub fn with_rate_limit_kib(mut self, kib: u64) -> Self {
        self.download.rate_limit_kib = (kib > 0).then_some(kib);
        self
    }

    pub fn http_options(&self) -> HttpOptions {
        HttpOptions {
            timeout: self.download.timeout,
            connect_timeout: self.download.connect_timeout,
            user_agent: self.download.user_agent.clone(),
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            retry: RetryPolicy {
                max_retries: self.download.max_retries,
                initial_backoff: self.download.backoff,
                ..RetryPolicy::default()
            },
            rate_limit: self.download.rate_limit_kib.map(|kib| kib * 1024),
            request_delay: self.download.request_delay,
        }
    }

    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            workers: self.integrity.workers,
            batch_size: self.integrity.batch_size,
        }
    }
}

fn parse_key<T: FromStr>(
    section: &ini::Properties,
    section_name: &str,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match section.get(key).map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(value) => value.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
            section: section_name.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn default_locations() -> Vec<PathBuf> {
    let mut locations = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
    if let Some(dir) = dirs::config_dir() {
        locations.push(dir.join("harvester").join("config.ini"));
    }
    locations
}

fn expand_home(value: &str) -> PathBuf {
    match value.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(value)),
        None => PathBuf::from(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = HarvestConfig::default();
        assert_eq!(config.download.max_retries, 5);
        assert_eq!(config.download.parallel, 1);
        assert_eq!(config.integrity.workers, 8);
        assert_eq!(config.integrity.batch_size, 1000);
        assert!(config.manifests.is_empty());
        assert_eq!(config.paths.status_file(), PathBuf::from(".").join(STATUS_FILE));
    }

    #[test]
    fn test_parse_full_file() {
        let config = HarvestConfig::from_ini_str(
            r#"
[paths]
data_dir = /srv/opendata
schema_dir = /srv/opendata/xsd

[manifests]
248 = https://portal.example/248/list.xml
no248 = xml/no248/list.xml

[download]
timeout = 60
max_retries = 3
rate_limit_kib = 512
parallel = 4
request_delay_ms = 250
user_agent = test-agent

[integrity]
archive_timeout = 5
workers = 2
batch_size = 50
"#,
        )
        .unwrap();

        assert_eq!(config.paths.data_dir, PathBuf::from("/srv/opendata"));
        assert_eq!(config.paths.manifest_dir, PathBuf::from("data").join("xml"));
        assert_eq!(config.manifests.len(), 2);
        assert_eq!(config.manifests[0].category, "248");
        assert_eq!(config.download.timeout, Duration::from_secs(60));
        assert_eq!(config.download.rate_limit_kib, Some(512));
        assert_eq!(config.download.parallel, 4);
        assert_eq!(config.download.user_agent, "test-agent");
        assert_eq!(config.integrity.batch_size, 50);

        let settings = config.engine_settings();
        assert_eq!(settings.rate_limit, Some(512 * 1024));
        assert_eq!(settings.retry.max_retries, 3);
        assert_eq!(settings.request_delay, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_number_is_reported() {
        let err = HarvestConfig::from_ini_str("[download]\ntimeout = soon\n").unwrap_err();
        match err {
            ConfigError::InvalidValue { section, key, value } => {
                assert_eq!(section, "download");
                assert_eq!(key, "timeout");
                assert_eq!(value, "soon");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_zero_rate_limit_disables_throttle() {
        let config = HarvestConfig::from_ini_str("[download]\nrate_limit_kib = 0\n").unwrap();
        assert_eq!(config.download.rate_limit_kib, None);
        assert_eq!(config.with_rate_limit_kib(64).download.rate_limit_kib, Some(64));
    }

    #[test]
    fn test_load_explicit_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("custom.ini");
        std::fs::write(&path, "[integrity]\nworkers = 3\n").unwrap();

        let (config, used) = HarvestConfig::load(Some(&path)).unwrap();
        assert_eq!(config.integrity.workers, 3);
        assert_eq!(used.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let temp = TempDir::new().unwrap();
        assert!(HarvestConfig::load(Some(&temp.path().join("none.ini"))).is_err());
    }

    #[test]
    fn test_start_point_validation() {
        assert_eq!(StartPoint::from_parts(None, None).unwrap(), None);
        assert!(matches!(
            StartPoint::from_parts(None, Some(3)),
            Err(ConfigError::MonthWithoutYear)
        ));
        assert!(matches!(
            StartPoint::from_parts(Some(2023), Some(13)),
            Err(ConfigError::InvalidMonth(13))
        ));
        let start = StartPoint::from_parts(Some(2023), Some(9)).unwrap().unwrap();
        assert_eq!(start.first_day(), chrono::NaiveDate::from_ymd_opt(2023, 9, 1));
        let year_only = StartPoint::from_parts(Some(2023), None).unwrap().unwrap();
        assert_eq!(year_only.first_day(), chrono::NaiveDate::from_ymd_opt(2023, 1, 1));
    }

    #[test]
    fn test_builder_overrides() {
        let config = HarvestConfig::default()
            .with_parallel(0)
            .with_force_refresh(true)
            .with_manifests(vec![ManifestRef::new("248", "list.xml")]);
        assert_eq!(config.download.parallel, 1);
        assert!(config.force_refresh);
        assert_eq!(config.manifests.len(), 1);
    }
}

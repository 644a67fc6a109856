//! Shared setup for every command: configuration and logging.

use std::path::{Path, PathBuf};

use harvester::config::HarvestConfig;
use harvester::logging::{init_logging, LogGuard};

use crate::error::CliError;

/// Loaded configuration plus the live logging guard.
pub struct CliRunner {
    config: HarvestConfig,
    config_path: Option<PathBuf>,
    _log_guard: LogGuard,
}

impl CliRunner {
    /// Load configuration and install logging.
    ///
    /// `file_logging` enables the rolling log file in the configured log
    /// directory; read-only commands log to the console only.
    pub fn new(config_path: Option<&Path>, verbose: bool, file_logging: bool) -> Result<Self, CliError> {
        let (config, config_path) = HarvestConfig::load(config_path)?;
        let log_dir = file_logging.then_some(config.paths.log_dir.as_path());
        let log_guard = init_logging(verbose, log_dir);

        Ok(Self {
            config,
            config_path,
            _log_guard: log_guard,
        })
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Configuration file actually loaded, if any.
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    pub fn log_startup(&self, command: &str) {
        tracing::info!(
            version = harvester::VERSION,
            command,
            config = %self
                .config_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "defaults".to_string()),
            "Harvester starting"
        );
    }
}

//! CLI error type and exit codes.

use harvester::config::ConfigError;
use harvester::inspect::InspectError;
use harvester::pipeline::HarvestError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Harvest(#[from] HarvestError),

    #[error(transparent)]
    Inspect(#[from] InspectError),

    #[error("{count} of {checked} files failed the integrity check")]
    InvalidFiles { count: usize, checked: usize },

    #[error("run interrupted")]
    Interrupted,
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Config(_) => 2,
            CliError::Harvest(_) => 3,
            CliError::Inspect(_) => 4,
            CliError::InvalidFiles { .. } => 1,
            CliError::Interrupted => 130,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct_and_nonzero() {
        let errors = [
            CliError::Config("x".into()),
            CliError::Harvest(HarvestError::NoManifests { attempted: 1 }),
            CliError::Inspect(InspectError::NotADirectory("x".into())),
            CliError::InvalidFiles { count: 1, checked: 2 },
            CliError::Interrupted,
        ];
        let mut codes: Vec<u8> = errors.iter().map(CliError::exit_code).collect();
        assert!(codes.iter().all(|c| *c != 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_config_error_conversion() {
        let err: CliError = ConfigError::MonthWithoutYear.into();
        assert!(matches!(err, CliError::Config(_)));
    }
}

//! Harvester CLI - Command-line interface
//!
//! Mirrors open-data portal archives to local storage and inspects what was
//! collected.

mod commands;
mod error;
mod progress;
mod runner;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use crate::commands::run::RunArgs;
use crate::error::CliError;
use crate::runner::CliRunner;

#[derive(Debug, Parser)]
#[command(name = "harvester", version, about = "Incremental downloader for open-data portal archives")]
struct Cli {
    /// Configuration file (defaults to ./harvester.ini, then the user config dir)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable debug logging on the console
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download new and missing artifacts from the configured manifests
    Run(RunArgs),

    /// Check local files (or directories of files) for integrity
    Verify {
        #[arg(required = true, value_name = "PATH")]
        paths: Vec<PathBuf>,

        /// Also require every file to have this SHA-256 digest
        #[arg(long, value_name = "HEX")]
        sha256: Option<String>,
    },

    /// Show compressed vs uncompressed archive sizes per directory
    Inspect {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },

    /// Compare digests and member listings across archives
    Compare {
        #[arg(required = true, value_name = "ARCHIVE")]
        archives: Vec<PathBuf>,
    },
}

fn dispatch(cli: Cli) -> Result<(), CliError> {
    let file_logging = matches!(cli.command, Commands::Run(_));
    let runner = CliRunner::new(cli.config.as_deref(), cli.verbose, file_logging)?;

    match cli.command {
        Commands::Run(args) => commands::run::run(&runner, args),
        Commands::Verify { paths, sha256 } => {
            commands::verify::run(&runner, &paths, sha256.as_deref())
        }
        Commands::Inspect { dir } => commands::inspect::run_inspect(&runner, &dir),
        Commands::Compare { archives } => commands::inspect::run_compare(&runner, &archives),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match dispatch(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Interrupted) => ExitCode::from(CliError::Interrupted.exit_code()),
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

//! Run command - harvest every configured manifest.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Args;
use harvester::config::{HarvestConfig, StartPoint};
use harvester::inspect::format_size;
use harvester::manifest::ManifestRef;
use harvester::pipeline::{Harvester, ResumePoint, RunReport};

use crate::error::CliError;
use crate::progress::ProgressDisplay;
use crate::runner::CliRunner;

/// Arguments for the run command.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Skip sub-manifests dated before this year
    #[arg(long, value_name = "YEAR")]
    pub start_year: Option<i32>,

    /// Month (1-12) within --start-year to start from
    #[arg(long, value_name = "MONTH", requires = "start_year")]
    pub start_month: Option<u32>,

    /// Re-download everything, ignoring completed status and valid files
    #[arg(long)]
    pub force: bool,

    /// Top-level manifest as CATEGORY=URL_OR_PATH (replaces configured ones)
    #[arg(long = "manifest", value_name = "CAT=LOC")]
    pub manifests: Vec<ManifestRef>,

    /// Number of concurrent downloads
    #[arg(long, value_name = "N")]
    pub parallel: Option<usize>,

    /// Throughput ceiling in KiB/s (0 disables)
    #[arg(long, value_name = "KIB_PER_SEC")]
    pub rate_limit: Option<u64>,

    /// Hide the progress bar
    #[arg(long)]
    pub quiet: bool,
}

/// Apply command-line overrides on top of the loaded configuration.
pub fn build_config(base: &HarvestConfig, args: &RunArgs) -> Result<HarvestConfig, CliError> {
    let start = StartPoint::from_parts(args.start_year, args.start_month)?;
    let mut config = base
        .clone()
        .with_start(start)
        .with_force_refresh(args.force);

    if !args.manifests.is_empty() {
        config = config.with_manifests(args.manifests.clone());
    }
    if let Some(workers) = args.parallel {
        config = config.with_parallel(workers);
    }
    if let Some(kib) = args.rate_limit {
        config = config.with_rate_limit_kib(kib);
    }

    if config.manifests.is_empty() {
        return Err(CliError::Config(
            "no manifests configured; add a [manifests] section or pass --manifest CAT=LOC"
                .to_string(),
        ));
    }
    Ok(config)
}

/// Command line that resumes an interrupted run.
///
/// Flags from the original invocation are repeated so the resumed run behaves
/// the same; configured manifests are picked up from the same config file.
pub fn resume_command(resume: &ResumePoint, config_path: Option<&Path>, args: &RunArgs) -> String {
    let mut parts = vec!["harvester".to_string()];
    if let Some(path) = config_path {
        parts.push("--config".to_string());
        parts.push(path.display().to_string());
    }
    parts.push("run".to_string());
    parts.extend(resume.to_args());
    // Undated manifests sort last, so the original start still applies.
    if resume.year.is_none() {
        if let Some(year) = args.start_year {
            parts.push("--start-year".to_string());
            parts.push(year.to_string());
        }
        if let Some(month) = args.start_month {
            parts.push("--start-month".to_string());
            parts.push(month.to_string());
        }
    }
    if args.force {
        parts.push("--force".to_string());
    }
    for manifest in &args.manifests {
        parts.push("--manifest".to_string());
        parts.push(format!("{}={}", manifest.category, manifest.location));
    }
    if let Some(workers) = args.parallel {
        parts.push("--parallel".to_string());
        parts.push(workers.to_string());
    }
    if let Some(kib) = args.rate_limit {
        parts.push("--rate-limit".to_string());
        parts.push(kib.to_string());
    }
    if args.quiet {
        parts.push("--quiet".to_string());
    }
    parts.join(" ")
}

/// Run the harvest.
pub fn run(runner: &CliRunner, args: RunArgs) -> Result<(), CliError> {
    runner.log_startup("run");
    let config = build_config(runner.config(), &args)?;

    let cancel = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&cancel);
    ctrlc::set_handler(move || {
        if handler_flag.swap(true, Ordering::SeqCst) {
            eprintln!("Interrupt received again, exiting immediately");
            std::process::exit(130);
        }
        eprintln!();
        eprintln!("Interrupt received, finishing current transfers...");
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    println!("Harvester v{}", harvester::VERSION);
    println!("================================");
    println!();
    for manifest in &config.manifests {
        println!("Manifest:  {} = {}", manifest.category, manifest.location);
    }
    println!("Data dir:  {}", config.paths.data_dir.display());
    println!("Schemas:   {}", config.paths.schema_dir.display());
    println!("Parallel:  {}", config.download.parallel);
    if let Some(kib) = config.download.rate_limit_kib {
        println!("Rate limit: {} KiB/s", kib);
    }
    if let Some(start) = &config.start {
        println!("Starting:  {}-{:02}", start.year, start.month.unwrap_or(1));
    }
    println!();
    println!("Press Ctrl+C to stop; progress is saved per manifest");
    println!();

    let display = if args.quiet {
        ProgressDisplay::hidden()
    } else {
        ProgressDisplay::new()
    };

    let mut harvester = Harvester::with_http(config)?
        .with_cancel_flag(cancel)
        .with_progress(display.callback());
    let started = std::time::Instant::now();
    let report = harvester.run();
    display.finish();
    let report = report?;

    print_summary(&report, started.elapsed());

    if let Some(resume) = &report.resume {
        println!();
        println!("Interrupted at {}", resume);
        println!("Resume with:");
        println!(
            "  {}",
            resume_command(resume, runner.config_path(), &args)
        );
        return Err(CliError::Interrupted);
    }
    Ok(())
}

fn print_summary(report: &RunReport, elapsed: std::time::Duration) {
    println!();
    println!("Run Summary");
    println!("───────────");
    println!(
        "  Manifests: {} processed ({} completed, {} incomplete, {} failed, {} skipped)",
        report.manifests_processed,
        report.manifests_completed,
        report.manifests_incomplete,
        report.manifests_failed,
        report.manifests_skipped
    );
    println!(
        "  Files:     {} downloaded, {} already present, {} failed",
        report.files_downloaded, report.files_existing, report.files_failed
    );
    println!("  Data:      {}", format_size(report.bytes_downloaded));
    println!("  Elapsed:   {}", format_elapsed(elapsed));
}

fn format_elapsed(elapsed: std::time::Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

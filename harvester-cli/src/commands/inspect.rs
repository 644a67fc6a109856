//! Inspect and compare commands - offline archive reports.

use std::path::{Path, PathBuf};

use harvester::inspect::{archive_stats, compare_archives, format_size, SizeStats};

use crate::error::CliError;
use crate::runner::CliRunner;

/// Members listed per archive in a comparison.
const MEMBER_PREVIEW: usize = 5;

fn print_stats(label: &str, stats: &SizeStats) {
    println!("{}", label);
    println!("  Archives:     {}", stats.archives);
    if stats.unreadable > 0 {
        println!("  Unreadable:   {}", stats.unreadable);
    }
    println!("  Compressed:   {}", format_size(stats.compressed));
    println!("  Uncompressed: {}", format_size(stats.uncompressed));
    if let Some(ratio) = stats.ratio() {
        println!("  Ratio:        {:.2}x", ratio);
    }
}

/// Print per-directory size statistics.
pub fn run_inspect(runner: &CliRunner, dir: &Path) -> Result<(), CliError> {
    runner.log_startup("inspect");
    let tree = archive_stats(dir)?;
    if tree.directories.is_empty() {
        println!("No archives under {}", dir.display());
        return Ok(());
    }

    print_stats(&format!("Total ({})", dir.display()), &tree.total());
    for (subdir, stats) in &tree.directories {
        println!();
        print_stats(&subdir.display().to_string(), stats);
    }
    Ok(())
}

/// Print digests and member differences across archives.
pub fn run_compare(runner: &CliRunner, archives: &[PathBuf]) -> Result<(), CliError> {
    runner.log_startup("compare");
    let comparison = compare_archives(archives)?;

    for summary in &comparison.archives {
        println!("{}", summary.path.display());
        println!("  Size:    {}", format_size(summary.size));
        println!("  SHA-256: {}", summary.sha256);
        match &summary.members {
            Some(members) => {
                println!("  Members: {}", members.len());
                for member in members.iter().take(MEMBER_PREVIEW) {
                    println!("    {}: {} bytes, CRC {:08x}", member.name, member.size, member.crc32);
                }
            }
            None => println!("  Not a readable archive"),
        }
        println!();
    }

    if comparison.archives.len() < 2 {
        println!("Need at least two archives to compare contents");
    } else if comparison.is_identical() {
        println!("All archives hold identical members");
    } else {
        println!("Differences:");
        for diff in &comparison.differences {
            println!("  {}", diff.name);
            if diff.sizes.len() > 1 {
                println!("    sizes: {:?}", diff.sizes);
            }
            if diff.crcs.len() > 1 {
                let crcs: Vec<String> = diff.crcs.iter().map(|c| format!("{:08x}", c)).collect();
                println!("    CRCs:  {}", crcs.join(", "));
            }
            for &i in &diff.absent_from {
                println!("    missing from {}", comparison.archives[i].path.display());
            }
        }
    }
    Ok(())
}

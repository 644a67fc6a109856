//! Verify command - batch integrity check of local files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use harvester::inspect::verify_sha256;
use harvester::integrity::IntegrityChecker;

use crate::error::CliError;
use crate::runner::CliRunner;

/// Expand directories into the artifact files below them.
pub fn collect_files(inputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            for ext in ["zip", "xsd"] {
                let pattern = input.join("**").join(format!("*.{}", ext));
                match glob::glob(&pattern.to_string_lossy()) {
                    Ok(paths) => files.extend(paths.flatten().filter(|p| p.is_file())),
                    Err(e) => tracing::warn!(path = %input.display(), error = %e, "Invalid search pattern"),
                }
            }
        } else {
            files.push(input.clone());
        }
    }
    files.sort();
    files.dedup();
    files
}

/// Files whose SHA-256 digest differs from `expected`, with the reason.
pub fn digest_failures(files: &[PathBuf], expected: &str) -> BTreeMap<PathBuf, String> {
    files
        .iter()
        .filter_map(|path| {
            verify_sha256(path, expected)
                .err()
                .map(|e| (path.clone(), e.to_string()))
        })
        .collect()
}

/// Check every file, reporting the invalid ones.
///
/// With `sha256`, each file must also match that digest.
pub fn run(runner: &CliRunner, paths: &[PathBuf], sha256: Option<&str>) -> Result<(), CliError> {
    runner.log_startup("verify");
    let config = runner.config();

    let files = collect_files(paths);
    if files.is_empty() {
        println!("No files to verify");
        return Ok(());
    }
    println!("Verifying {} files...", files.len());

    let checker = IntegrityChecker::with_cache_file(
        config.paths.integrity_cache(),
        config.integrity.archive_timeout,
    );
    let verdicts = checker.check_batch(&files, config.batch_options());
    if let Err(e) = checker.flush() {
        tracing::warn!(error = %e, "Failed to save integrity cache");
    }

    let mut failures = match sha256 {
        Some(expected) => digest_failures(&files, expected),
        None => BTreeMap::new(),
    };
    for (path, _) in verdicts.iter().filter(|(_, valid)| !**valid) {
        let reason = checker
            .verify(path)
            .err()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "changed since last check".to_string());
        failures.insert(path.clone(), reason);
    }

    for (path, reason) in &failures {
        println!("  INVALID {}: {}", path.display(), reason);
    }
    println!("{} valid, {} invalid", files.len() - failures.len(), failures.len());

    if failures.is_empty() {
        Ok(())
    } else {
        Err(CliError::InvalidFiles {
            count: failures.len(),
            checked: files.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_collect_files_expands_directories() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("248").join("2023-09");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("a.zip"), b"x").unwrap();
        fs::write(temp.path().join("s.xsd"), b"x").unwrap();
        fs::write(temp.path().join("notes.txt"), b"x").unwrap();
        let explicit = temp.path().join("notes.txt");

        let files = collect_files(&[temp.path().to_path_buf(), explicit.clone()]);
        assert_eq!(files.len(), 3);
        assert!(files.contains(&nested.join("a.zip")));
        assert!(files.contains(&explicit));
    }

    #[test]
    fn test_digest_failures_reports_only_mismatches() {
        let temp = TempDir::new().unwrap();
        let good = temp.path().join("good.xsd");
        let bad = temp.path().join("bad.xsd");
        fs::write(&good, b"hello world").unwrap();
        fs::write(&bad, b"hello there").unwrap();
        let expected = "B94D27B9934D3E08A52E52D7DA7DABFAC484EFE37A5380EE9088F7ACE2EFCDE9";

        let failures = digest_failures(&[good, bad.clone()], expected);
        assert_eq!(failures.len(), 1);
        assert!(failures[&bad].contains("checksum mismatch"));
    }
}

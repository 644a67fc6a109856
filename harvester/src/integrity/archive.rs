//! ZIP archive scanning.
//!
//! A scan opens the archive, then decompresses every member to a sink. The
//! zip reader validates each member's CRC-32 once it reaches the end of the
//! member's data, so a clean pass over all members is a full integrity test.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use serde::Serialize;
use zip::result::ZipError;
use zip::ZipArchive;

use super::IntegrityError;

/// Metadata for one archive member, as recorded in the central directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveMember {
    pub name: String,
    /// Uncompressed size in bytes.
    pub size: u64,
    pub compressed_size: u64,
    pub crc32: u32,
}

/// Result of a completed archive scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveScan {
    /// Members in central-directory order.
    pub members: Vec<ArchiveMember>,
    /// Name of the first member that failed to decompress or verify.
    pub first_corrupt: Option<String>,
}

impl ArchiveScan {
    /// Whether every member verified.
    pub fn is_intact(&self) -> bool {
        self.first_corrupt.is_none()
    }

    /// Sum of uncompressed member sizes.
    pub fn uncompressed_size(&self) -> u64 {
        self.members.iter().map(|m| m.size).sum()
    }
}

/// Open an archive, mapping zip errors onto [`IntegrityError`].
pub(crate) fn open_archive(path: &Path) -> Result<ZipArchive<BufReader<File>>, IntegrityError> {
    let file = File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => IntegrityError::Missing(path.to_path_buf()),
        _ => IntegrityError::Io {
            path: path.to_path_buf(),
            source: e,
        },
    })?;

    ZipArchive::new(BufReader::new(file)).map_err(|e| match e {
        ZipError::Io(source) => IntegrityError::Io {
            path: path.to_path_buf(),
            source,
        },
        other => IntegrityError::Malformed {
            path: path.to_path_buf(),
            reason: other.to_string(),
        },
    })
}

/// List archive members from the central directory without decompressing.
pub fn list_members(path: &Path) -> Result<Vec<ArchiveMember>, IntegrityError> {
    let mut archive = open_archive(path)?;
    let mut members = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive.by_index_raw(i).map_err(|e| IntegrityError::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        members.push(ArchiveMember {
            name: entry.name().to_string(),
            size: entry.size(),
            compressed_size: entry.compressed_size(),
            crc32: entry.crc32(),
        });
    }
    Ok(members)
}

/// Scan every member of an archive.
///
/// Returns `Err` only when the archive cannot be opened at all; corruption
/// inside a member is reported through [`ArchiveScan::first_corrupt`].
pub fn scan_archive(path: &Path) -> Result<ArchiveScan, IntegrityError> {
    let mut archive = open_archive(path)?;
    let mut scan = ArchiveScan::default();

    for i in 0..archive.len() {
        let mut entry = match archive.by_index(i) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(path = %path.display(), index = i, error = %e, "Archive member unreadable");
                scan.first_corrupt.get_or_insert_with(|| format!("#{}", i));
                continue;
            }
        };

        let member = ArchiveMember {
            name: entry.name().to_string(),
            size: entry.size(),
            compressed_size: entry.compressed_size(),
            crc32: entry.crc32(),
        };

        if let Err(e) = io::copy(&mut entry, &mut io::sink()) {
            tracing::debug!(path = %path.display(), member = %member.name, error = %e, "Archive member failed verification");
            scan.first_corrupt.get_or_insert_with(|| member.name.clone());
        }

        scan.members.push(member);
    }

    Ok(scan)
}

/// Scan an archive on a helper thread, giving up after `timeout`.
///
/// A scan that exceeds the timeout is reported as [`IntegrityError::Timeout`];
/// the helper thread is detached and finishes on its own.
pub fn scan_archive_with_timeout(
    path: &Path,
    timeout: Duration,
) -> Result<ArchiveScan, IntegrityError> {
    let (tx, rx) = mpsc::channel();
    let owned: PathBuf = path.to_path_buf();

    thread::Builder::new()
        .name("archive-scan".to_string())
        .spawn(move || {
            let _ = tx.send(scan_archive(&owned));
        })
        .map_err(|e| IntegrityError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(_) => Err(IntegrityError::Timeout {
            path: path.to_path_buf(),
            timeout,
        }),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::Write;
    use std::path::Path;

    use zip::write::FileOptions;
    use zip::{CompressionMethod, ZipWriter};

    /// Write a small deflated archive with the given members.
    pub fn write_zip(path: &Path, members: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, data) in members {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    /// Build archive bytes in memory.
    pub fn zip_bytes(members: &[(&str, &[u8])]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut zip = ZipWriter::new(&mut cursor);
            let options = FileOptions::default().compression_method(CompressionMethod::Stored);
            for (name, data) in members {
                zip.start_file(*name, options).unwrap();
                zip.write_all(data).unwrap();
            }
            zip.finish().unwrap();
        }
        cursor.into_inner()
    }
}

//! SHA-256 digests of local artifacts.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use super::{InspectError, InspectResult};

/// Read buffer size (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Calculate the SHA-256 digest of a file.
///
/// # Returns
///
/// The lowercase hexadecimal digest of the file contents.
pub fn file_sha256(path: &Path) -> InspectResult<String> {
    let read_failed = |e| InspectError::Read {
        path: path.to_path_buf(),
        source: e,
    };
    let mut file = File::open(path).map_err(read_failed)?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    loop {
        let n = file.read(&mut buffer).map_err(read_failed)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Verify that a file has the expected digest.
pub fn verify_sha256(path: &Path, expected: &str) -> InspectResult<()> {
    let actual = file_sha256(path)?;
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(InspectError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const HELLO_WORLD: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_file_sha256() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.xsd");
        fs::write(&path, b"hello world").unwrap();

        assert_eq!(file_sha256(&path).unwrap(), HELLO_WORLD);
    }

    #[test]
    fn test_empty_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("empty");
        fs::write(&path, b"").unwrap();

        assert_eq!(
            file_sha256(&path).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            file_sha256(Path::new("/nonexistent/file.zip")),
            Err(InspectError::Read { .. })
        ));
    }

    #[test]
    fn test_verify_sha256() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.xsd");
        fs::write(&path, b"hello world").unwrap();

        assert!(verify_sha256(&path, HELLO_WORLD).is_ok());
        assert!(verify_sha256(&path, &HELLO_WORLD.to_uppercase()).is_ok());
        match verify_sha256(&path, "deadbeef") {
            Err(InspectError::ChecksumMismatch { actual, .. }) => assert_eq!(actual, HELLO_WORLD),
            other => panic!("expected mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_digest_spans_buffer_boundary() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("large.bin");
        let mut data = vec![0xABu8; BUFFER_SIZE + 100];
        fs::write(&path, &data).unwrap();
        let first = file_sha256(&path).unwrap();

        // A change past the first buffer must change the digest.
        *data.last_mut().unwrap() = 0;
        fs::write(&path, &data).unwrap();
        assert_ne!(file_sha256(&path).unwrap(), first);
    }
}

//! SHA-256 and size verification of staged files.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use super::download::DownloadBatch;
use crate::error::UpdateError;

/// Hex-encoded SHA-256 of `content`.
pub fn compute_sha256_checksum(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Hex-encoded SHA-256 of a file, streamed.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Compare a computed hash with the expected one, ignoring case and
/// surrounding whitespace.
pub fn verify_checksum(actual: &str, expected: &str, name: &str) -> Result<(), UpdateError> {
    if !actual.trim().eq_ignore_ascii_case(expected.trim()) {
        return Err(UpdateError::IntegrityMismatch {
            path: name.to_string(),
            expected: expected.trim().to_lowercase(),
            actual: actual.to_lowercase(),
        });
    }
    Ok(())
}

/// Verify every staged file against its manifest entry.
///
/// Stops at the first mismatch. A manifest size of zero means "unknown"
/// and is not checked.
pub fn verify_batch(batch: &DownloadBatch) -> Result<(), UpdateError> {
    for file in &batch.files {
        let name = file.entry.relative_path();

        if file.entry.size > 0 {
            let actual = std::fs::metadata(&file.staged_path)
                .map_err(|e| UpdateError::io(format!("Failed to stat staged {name}"), e))?
                .len();
            if actual != file.entry.size {
                return Err(UpdateError::SizeMismatch {
                    path: name,
                    expected: file.entry.size,
                    actual,
                });
            }
        }

        let actual = sha256_file(&file.staged_path)
            .map_err(|e| UpdateError::io(format!("Failed to hash staged {name}"), e))?;
        verify_checksum(&actual, &file.entry.sha256, &name)?;
        tracing::debug!(file = %name, "checksum verified");
    }
    Ok(())
}

//! Log file setup.
//!
//! Logs go to `<data_dir>/logs/tether.log` through `tracing-subscriber`.
//! The file is rotated by size when the process starts, keeping a fixed
//! number of numbered backups (`tether.log.1` is the newest).

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Environment variable holding an `EnvFilter` directive, e.g. `tether=debug`.
pub const LOG_ENV: &str = "TETHER_LOG";

pub const LOG_FILE_NAME: &str = "tether.log";
pub const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;
pub const LOG_BACKUPS: usize = 5;

/// Install the global subscriber writing to `log_dir`.
///
/// Returns the path of the active log file.
pub fn init(log_dir: &Path, debug: bool) -> Result<PathBuf> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let log_path = log_dir.join(LOG_FILE_NAME);
    rotate(&log_path, MAX_LOG_SIZE, LOG_BACKUPS)?;

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install log subscriber: {e}"))?;

    Ok(log_path)
}

/// Shift `path` to `path.1`, `path.1` to `path.2`, ... when it exceeds `max_size`.
///
/// The oldest backup beyond `keep` is deleted. Returns whether a rotation happened.
pub fn rotate(path: &Path, max_size: u64, keep: usize) -> Result<bool> {
    let size = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(_) => return Ok(false),
    };
    if size <= max_size {
        return Ok(false);
    }

    if keep == 0 {
        fs::remove_file(path)
            .with_context(|| format!("Failed to remove log file {}", path.display()))?;
        return Ok(true);
    }

    let oldest = backup_path(path, keep);
    crate::fs::remove_if_exists(&oldest)
        .with_context(|| format!("Failed to remove old log {}", oldest.display()))?;

    for index in (1..keep).rev() {
        let from = backup_path(path, index);
        if from.exists() {
            let to = backup_path(path, index + 1);
            fs::rename(&from, &to)
                .with_context(|| format!("Failed to rotate log {}", from.display()))?;
        }
    }

    fs::rename(path, backup_path(path, 1))
        .with_context(|| format!("Failed to rotate log {}", path.display()))?;
    Ok(true)
}

fn backup_path(path: &Path, index: usize) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_log_not_rotated() {
        let temp = tempfile::tempdir().unwrap();
        let log = temp.path().join(LOG_FILE_NAME);
        fs::write(&log, "short").unwrap();

        assert!(!rotate(&log, 100, 3).unwrap());
        assert!(log.exists());
    }

    #[test]
    fn test_missing_log_not_rotated() {
        let temp = tempfile::tempdir().unwrap();
        assert!(!rotate(&temp.path().join(LOG_FILE_NAME), 1, 3).unwrap());
    }

    #[test]
    fn test_rotation_shifts_and_drops_oldest() {
        let temp = tempfile::tempdir().unwrap();
        let log = temp.path().join(LOG_FILE_NAME);
        fs::write(&log, "current-current").unwrap();
        fs::write(backup_path(&log, 1), "one").unwrap();
        fs::write(backup_path(&log, 2), "two").unwrap();

        assert!(rotate(&log, 5, 2).unwrap());

        assert!(!log.exists());
        assert_eq!(
            fs::read_to_string(backup_path(&log, 1)).unwrap(),
            "current-current"
        );
        assert_eq!(fs::read_to_string(backup_path(&log, 2)).unwrap(), "one");
        assert!(!backup_path(&log, 3).exists());
    }
}

//! Single-instance PID lock for the companion service.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::LockError;
use crate::process::is_process_alive;

pub const LOCK_FILE: &str = "service.lock";

/// Held while the service runs; removed on drop.
///
/// The lock file holds the owner's PID. A lock whose PID is dead, or
/// whose content is not a PID, is stale and taken over.
#[derive(Debug)]
pub struct ServiceLock {
    path: PathBuf,
    pid: u32,
}

impl ServiceLock {
    pub fn acquire(state_dir: &Path) -> Result<Self, LockError> {
        Self::acquire_as(state_dir, std::process::id())
    }

    /// Take the lock on behalf of `pid`.
    pub fn acquire_as(state_dir: &Path, pid: u32) -> Result<Self, LockError> {
        let path = state_dir.join(LOCK_FILE);
        let io_err = |source: anyhow::Error| LockError::Io {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(state_dir).map_err(|e| io_err(e.into()))?;

        if path.is_file() {
            match read_owner(&path) {
                Some(owner) if owner != pid && is_process_alive(owner) => {
                    return Err(LockError::AlreadyRunning { pid: owner });
                }
                Some(owner) => {
                    tracing::info!(pid = owner, "stale lock detected, taking over");
                }
                None => tracing::info!("corrupt lock file detected, taking over"),
            }
        }

        crate::fs::locked_write(&path, &pid.to_string()).map_err(io_err)?;
        tracing::debug!(path = %path.display(), pid, "service lock acquired");
        Ok(Self { path, pid })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for ServiceLock {
    fn drop(&mut self) {
        // Another instance may have taken over a lock it judged stale
        if read_owner(&self.path) != Some(self.pid) {
            return;
        }
        if let Err(e) = crate::fs::remove_if_exists(&self.path) {
            tracing::warn!(error = %e, "failed to remove service lock");
        }
    }
}

fn read_owner(path: &Path) -> Option<u32> {
    crate::fs::locked_read(path).ok()?.trim().parse().ok()
}

//! Companion-service plumbing: the liveness heartbeat the host writes and
//! the PID lock a background service holds.

pub mod heartbeat;
pub mod lock;

pub use heartbeat::{Heartbeat, HeartbeatMonitor, HeartbeatVerdict, HEARTBEAT_FILE};
pub use lock::{ServiceLock, LOCK_FILE};

use std::path::{Path, PathBuf};

/// Directory shared by the host and its companion service.
///
/// A development checkout keeps the service next to the host, so
/// `dev_dir` (relative to `base`) wins when it exists; otherwise the
/// per-user `fallback` is used.
pub fn resolve_state_dir(dev_dir: Option<&Path>, base: &Path, fallback: PathBuf) -> PathBuf {
    if let Some(dev) = dev_dir {
        let candidate = if dev.is_absolute() {
            dev.to_path_buf()
        } else {
            base.join(dev)
        };
        if candidate.is_dir() {
            return candidate;
        }
    }
    fallback
}

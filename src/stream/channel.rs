//! Channel file naming and teardown.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static LAST_TICK: AtomicU64 = AtomicU64::new(0);

/// Millisecond tick that strictly increases within this process.
///
/// Used as the channel suffix so a new task never reuses the files of a
/// previous one, even when two are created in the same millisecond.
pub fn next_tick() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    let mut last = LAST_TICK.load(Ordering::Relaxed);
    loop {
        let tick = now.max(last + 1);
        match LAST_TICK.compare_exchange_weak(last, tick, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return tick,
            Err(actual) => last = actual,
        }
    }
}

/// The content file and completion file of one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChannel {
    pub content_path: PathBuf,
    pub status_path: PathBuf,
}

impl StreamChannel {
    pub fn new(content_path: PathBuf, status_path: PathBuf) -> Self {
        Self {
            content_path,
            status_path,
        }
    }

    /// `stream_<tick>.txt` and `stream_status_<tick>.json` inside `dir`.
    pub fn in_dir(dir: &Path, tick: u64) -> Self {
        Self::new(
            dir.join(format!("stream_{tick}.txt")),
            dir.join(format!("stream_status_{tick}.json")),
        )
    }

    /// A fresh channel in `dir` with the next tick. Files are not created.
    pub fn allocate(dir: &Path) -> Self {
        Self::in_dir(dir, next_tick())
    }

    /// Whether the producer has signalled completion.
    pub fn is_complete(&self) -> bool {
        self.status_path.exists()
    }

    /// Delete both files. Missing files are fine.
    pub fn remove(&self) -> io::Result<()> {
        crate::fs::remove_if_exists(&self.content_path)?;
        crate::fs::remove_if_exists(&self.status_path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_ticks_strictly_increase() {
        let ticks: Vec<u64> = (0..100).map(|_| next_tick()).collect();
        assert!(ticks.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_channel_names() {
        let channel = StreamChannel::in_dir(Path::new("/tmp/tether"), 42);
        assert_eq!(channel.content_path, PathBuf::from("/tmp/tether/stream_42.txt"));
        assert_eq!(
            channel.status_path,
            PathBuf::from("/tmp/tether/stream_status_42.json")
        );
    }

    #[test]
    fn test_allocate_never_collides() {
        let temp = tempfile::tempdir().unwrap();
        let a = StreamChannel::allocate(temp.path());
        let b = StreamChannel::allocate(temp.path());
        assert_ne!(a.content_path, b.content_path);
        assert_ne!(a.status_path, b.status_path);
    }

    #[test]
    fn test_remove_tolerates_missing_files() {
        let temp = tempfile::tempdir().unwrap();
        let channel = StreamChannel::allocate(temp.path());
        fs::write(&channel.content_path, "partial").unwrap();

        channel.remove().unwrap();
        assert!(!channel.content_path.exists());
        channel.remove().unwrap();
    }
}

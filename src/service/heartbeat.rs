//! Liveness heartbeat between the host and its companion service.
//!
//! The host rewrites `<state_dir>/heartbeat` with the current time on a
//! fixed interval. The service reads it and shuts itself down once the host
//! has clearly gone away, so it never outlives the application that
//! started it.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use crate::config::HeartbeatConfig;

pub const HEARTBEAT_FILE: &str = "heartbeat";

/// Write the current time (RFC 3339) to the heartbeat file.
pub fn write_heartbeat(path: &Path, now: DateTime<Utc>) -> Result<()> {
    crate::fs::locked_write(path, &now.to_rfc3339())
}

/// Age of the last heartbeat, or `None` if the file does not exist.
///
/// Uses the timestamp in the file, falling back to its mtime when the
/// content does not parse.
pub fn heartbeat_age(path: &Path, now: DateTime<Utc>) -> Option<Duration> {
    let meta = std::fs::metadata(path).ok()?;

    let stamped = crate::fs::locked_read(path)
        .ok()
        .and_then(|text| DateTime::parse_from_rfc3339(text.trim()).ok())
        .map(|ts| ts.with_timezone(&Utc));
    if let Some(ts) = stamped {
        return Some((now - ts).to_std().unwrap_or(Duration::ZERO));
    }

    let modified = meta.modified().ok()?;
    let now_system: SystemTime = now.into();
    Some(now_system.duration_since(modified).unwrap_or(Duration::ZERO))
}

/// Background thread that keeps the heartbeat file fresh.
///
/// The file is left in place when the heartbeat stops; its age tells the
/// service how long ago the host went away.
pub struct Heartbeat {
    path: PathBuf,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Heartbeat {
    /// Write the first heartbeat now, then every `interval`.
    pub fn start(state_dir: &Path, interval: Duration) -> Result<Self> {
        std::fs::create_dir_all(state_dir)
            .with_context(|| format!("Failed to create state directory {}", state_dir.display()))?;
        let path = state_dir.join(HEARTBEAT_FILE);
        write_heartbeat(&path, Utc::now())?;

        let (tx, rx) = mpsc::channel::<()>();
        let thread_path = path.clone();
        let handle = thread::Builder::new()
            .name("heartbeat".to_string())
            .spawn(move || loop {
                match rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        if let Err(e) = write_heartbeat(&thread_path, Utc::now()) {
                            tracing::warn!(error = %e, "failed to write heartbeat");
                        }
                    }
                    // Stop requested or owner dropped
                    _ => break,
                }
            })
            .context("Failed to start heartbeat thread")?;

        tracing::info!(path = %path.display(), interval_secs = interval.as_secs(), "heartbeat started");
        Ok(Self {
            path,
            stop: Some(tx),
            handle: Some(handle),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Cancel the timer and wait for the thread to exit.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            tracing::debug!("heartbeat stopped");
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop();
    }
}

/// What the service should do after looking at the heartbeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatVerdict {
    Alive,
    /// Heartbeat is old but the grace period has not run out.
    Stale { age: Duration },
    /// No heartbeat file yet, still within the startup allowance.
    Missing,
    ShouldExit { reason: String },
}

/// Service-side watcher with grace periods.
///
/// A stale heartbeat must stay stale for a further `stale_after` before the
/// verdict turns into `ShouldExit`; a missing file is tolerated for
/// `missing_grace`. A fresh heartbeat resets both clocks.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    stale_after: Duration,
    missing_grace: Duration,
    stale_since: Option<Instant>,
    missing_since: Option<Instant>,
}

impl HeartbeatMonitor {
    pub fn new(stale_after: Duration, missing_grace: Duration) -> Self {
        Self {
            stale_after,
            missing_grace,
            stale_since: None,
            missing_since: None,
        }
    }

    pub fn from_config(config: &HeartbeatConfig) -> Self {
        Self::new(
            Duration::from_secs(config.stale_secs),
            Duration::from_secs(config.missing_grace_secs),
        )
    }

    /// Read the heartbeat file and judge it.
    pub fn check(&mut self, path: &Path) -> HeartbeatVerdict {
        let age = heartbeat_age(path, Utc::now());
        self.observe(age, Instant::now())
    }

    /// Judge a heartbeat of the given age (`None` = no file) seen at `now`.
    pub fn observe(&mut self, age: Option<Duration>, now: Instant) -> HeartbeatVerdict {
        let Some(age) = age else {
            self.stale_since = None;
            let since = *self.missing_since.get_or_insert(now);
            if now.duration_since(since) > self.missing_grace {
                return HeartbeatVerdict::ShouldExit {
                    reason: format!(
                        "No heartbeat file after {} s",
                        self.missing_grace.as_secs()
                    ),
                };
            }
            return HeartbeatVerdict::Missing;
        };
        self.missing_since = None;

        if age <= self.stale_after {
            self.stale_since = None;
            return HeartbeatVerdict::Alive;
        }

        let since = *self.stale_since.get_or_insert(now);
        if now.duration_since(since) > self.stale_after {
            return HeartbeatVerdict::ShouldExit {
                reason: format!("Heartbeat stale ({} s), host app gone", age.as_secs()),
            };
        }
        HeartbeatVerdict::Stale { age }
    }
}

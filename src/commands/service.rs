use anyhow::Result;
use colored::Colorize;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::error::LockError;
use crate::service::{HeartbeatMonitor, HeartbeatVerdict, ServiceLock, HEARTBEAT_FILE};

/// Run as the companion service: hold the PID lock and exit once the
/// host's heartbeat goes away.
pub fn execute(config: &Config) -> Result<()> {
    let dir = super::state_dir(config)?;

    let _lock = match ServiceLock::acquire(&dir) {
        Ok(lock) => lock,
        Err(LockError::AlreadyRunning { pid }) => {
            eprintln!("Service already running (PID {pid}). Exiting.");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let running = super::running_flag()?;
    let heartbeat_path = dir.join(HEARTBEAT_FILE);
    let check_every = Duration::from_secs(config.heartbeat.interval_secs.max(1));
    let mut monitor = HeartbeatMonitor::from_config(&config.heartbeat);
    let mut last_check: Option<Instant> = None;

    println!(
        "{} Service running (PID {}), watching {}",
        "●".green(),
        std::process::id(),
        heartbeat_path.display()
    );
    tracing::info!(dir = %dir.display(), "service started");

    while running.load(Ordering::SeqCst) {
        let due = last_check.map_or(true, |t| t.elapsed() >= check_every);
        if due {
            last_check = Some(Instant::now());
            match monitor.check(&heartbeat_path) {
                HeartbeatVerdict::ShouldExit { reason } => {
                    tracing::info!(%reason, "shutting down");
                    println!("{reason}, shutting down");
                    break;
                }
                HeartbeatVerdict::Stale { age } => {
                    tracing::debug!(age_secs = age.as_secs(), "heartbeat stale");
                }
                HeartbeatVerdict::Missing | HeartbeatVerdict::Alive => {}
            }
        }
        thread::sleep(Duration::from_millis(200));
    }

    tracing::info!("service stopped");
    Ok(())
}

use anyhow::Result;
use colored::Colorize;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::service::Heartbeat;

/// Keep the heartbeat file fresh until Ctrl+C.
pub fn execute(config: &Config) -> Result<()> {
    let dir = super::state_dir(config)?;
    let interval = Duration::from_secs(config.heartbeat.interval_secs.max(1));
    let running = super::running_flag()?;

    let mut heartbeat = Heartbeat::start(&dir, interval)?;
    println!(
        "{} Writing heartbeat to {} every {}s (Ctrl+C to stop)",
        "♥".red(),
        heartbeat.path().display(),
        interval.as_secs()
    );

    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(200));
    }
    heartbeat.stop();
    println!("Heartbeat stopped");
    Ok(())
}

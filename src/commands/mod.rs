//! Command-line entry points. Each subcommand has an `execute` function.

pub mod check;
pub mod heartbeat;
pub mod restore;
pub mod service;
pub mod stream;
pub mod update;
pub mod worker;

use anyhow::Result;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::Config;

/// Directory shared with the companion service.
pub(crate) fn state_dir(config: &Config) -> Result<PathBuf> {
    let base = config.update.install_dir()?;
    Ok(crate::service::resolve_state_dir(
        config.heartbeat.dev_state_dir.as_deref(),
        &base,
        config.data_dir(),
    ))
}

/// Flag cleared by Ctrl+C.
pub(crate) fn running_flag() -> Result<Arc<AtomicBool>> {
    use anyhow::Context;

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        handler_flag.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;
    Ok(running)
}

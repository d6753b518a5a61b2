use anyhow::{bail, Result};
use colored::Colorize;
use std::sync::Arc;

use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::notify::DesktopNotifier;
use crate::update::{UpdatePhase, UpdateProgress};

/// Install the latest version if the server has a newer one.
pub fn execute(config: &Config) -> Result<()> {
    println!("{}", "Checking for updates...".blue());

    let notifier = Arc::new(DesktopNotifier::new(config.server.app.clone()));
    let mut coordinator = Coordinator::from_config(config, notifier)?;

    let mut last_phase = None;
    let report = coordinator.update(&mut |progress: UpdateProgress| {
        if last_phase != Some(progress.phase) {
            last_phase = Some(progress.phase);
            if progress.phase != UpdatePhase::Complete {
                println!("{}...", progress.phase.to_string().blue());
            }
        }
        if let Some(file) = &progress.file {
            println!(
                "  [{}/{}] {}",
                progress.current,
                progress.total,
                file.dimmed()
            );
        }
    });

    if !report.success {
        bail!("{}", report.message);
    }

    match report.data {
        Some(outcome) => {
            println!("{} {}", "✓".green().bold(), report.message);
            for file in &outcome.preserved {
                println!("  kept your version of {}", file.cyan());
            }
            for file in &outcome.skipped {
                println!("  {} not on server, skipped", file.dimmed());
            }
            if let Some(dir) = &outcome.backup_dir {
                println!("  backup: {}", dir.display().to_string().dimmed());
            }
        }
        None => println!("{} {}", "✓".green().bold(), report.message),
    }
    Ok(())
}

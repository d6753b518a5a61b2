use anyhow::{bail, Result};
use colored::Colorize;
use std::sync::Arc;

use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::notify::LogNotifier;
use crate::update::VersionStatus;

/// Ask the update server for the latest version and print the result.
pub fn execute(config: &Config) -> Result<()> {
    println!("{}", "Checking for updates...".blue());

    let mut coordinator = Coordinator::from_config(config, Arc::new(LogNotifier))?;
    let report = coordinator.check_for_update();
    let Some(check) = report.data else {
        bail!("{}", report.message);
    };

    match check.status {
        VersionStatus::UpdateAvailable => {
            println!(
                "New version available: {} → {}",
                check.current_version.dimmed(),
                check.latest_version.green().bold()
            );
            if !check.release.release_date.is_empty() {
                println!("  Released: {}", check.release.release_date);
            }
            if !check.release.release_notes.trim().is_empty() {
                println!("\n{}", check.release.release_notes.trim());
            }
            println!("\nRun {} to install it.", "tether update".cyan());
        }
        VersionStatus::UpToDate => {
            println!("{} {}", "✓".green().bold(), check.summary());
        }
        VersionStatus::AheadOfServer => {
            println!("{} {}", "!".yellow().bold(), check.summary());
        }
    }
    Ok(())
}

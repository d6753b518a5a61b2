use anyhow::Result;
use colored::Colorize;
use std::path::Path;

use crate::config::Config;
use crate::update::install::{restore_backup, InstallLayout};

/// Copy a backup left by an earlier update back over the installation.
pub fn execute(config: &Config, backup_dir: &Path) -> Result<()> {
    let layout = InstallLayout::new(config.update.install_dir()?, &config.update);
    let backup_dir = if backup_dir.is_absolute() {
        backup_dir.to_path_buf()
    } else {
        layout.backups_root().join(backup_dir)
    };

    let restored = restore_backup(&layout, &backup_dir)?;
    println!(
        "{} Restored {} files from {}",
        "✓".green().bold(),
        restored,
        backup_dir.display()
    );
    Ok(())
}

//! Backing up, cleaning and installing a verified release.

use chrono::{DateTime, Local};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::download::{safe_stage_path, DownloadBatch};
use super::patterns::PatternSet;
use super::{UpdatePhase, UpdateProgress};
use crate::config::UpdateConfig;
use crate::error::UpdateError;

/// Where the installed files live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
    pub root: PathBuf,
    /// Entry point file name, relative to `root`.
    pub entry_point: String,
    /// Library directory, relative to `root`.
    pub library_dir: String,
    /// Backup directory, relative to `root`.
    pub backup_dir: String,
}

impl InstallLayout {
    pub fn new(root: impl Into<PathBuf>, config: &UpdateConfig) -> Self {
        Self {
            root: root.into(),
            entry_point: config.entry_point.clone(),
            library_dir: config.library_dir.clone(),
            backup_dir: config.backup_dir.clone(),
        }
    }

    pub fn entry_point_path(&self) -> PathBuf {
        self.root.join(&self.entry_point)
    }

    pub fn library_path(&self) -> PathBuf {
        self.root.join(&self.library_dir)
    }

    pub fn backups_root(&self) -> PathBuf {
        self.root.join(&self.backup_dir)
    }

    fn entry_stem(&self) -> String {
        file_stem(Path::new(&self.entry_point))
    }
}

/// Which files get special treatment during an install.
#[derive(Debug, Clone, Default)]
pub struct InstallPolicy {
    pub stale: PatternSet,
    pub shortcuts: PatternSet,
    /// Installed only when the destination does not exist yet.
    pub user_content: PatternSet,
}

impl InstallPolicy {
    pub fn from_config(config: &UpdateConfig) -> Self {
        Self {
            stale: PatternSet::new(&config.stale_patterns),
            shortcuts: PatternSet::new(&config.shortcut_patterns),
            user_content: PatternSet::new(&config.user_content_patterns),
        }
    }
}

/// A timestamped copy of the entry point and library directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backup {
    pub dir: PathBuf,
    pub created_at: DateTime<Local>,
    pub files: usize,
}

/// What one install run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallSummary {
    pub backup_dir: Option<PathBuf>,
    pub removed: Vec<String>,
    pub installed: Vec<String>,
    /// User-content files left untouched because they already existed.
    pub preserved: Vec<String>,
}

/// Copy the entry point and library directory into
/// `<backup_dir>/<YYYYmmdd_HHMMSS>/`.
///
/// Failing to create the backup directory aborts. A file that cannot be
/// copied is logged and left out, so the backup may be partial.
pub fn create_backup(layout: &InstallLayout, now: DateTime<Local>) -> Result<Backup, UpdateError> {
    let root = layout.backups_root();
    let stamp = now.format("%Y%m%d_%H%M%S").to_string();
    let mut dir = root.join(&stamp);
    let mut suffix = 1;
    while dir.exists() {
        dir = root.join(format!("{stamp}_{suffix}"));
        suffix += 1;
    }
    fs::create_dir_all(&dir).map_err(|e| {
        UpdateError::io(
            format!("Failed to create backup directory {}", dir.display()),
            e,
        )
    })?;

    let mut files = 0;
    let entry = layout.entry_point_path();
    if entry.is_file() {
        match fs::copy(&entry, dir.join(&layout.entry_point)) {
            Ok(_) => files += 1,
            Err(e) => {
                tracing::warn!(file = %entry.display(), error = %e, "could not back up entry point")
            }
        }
    }

    let library = layout.library_path();
    if library.is_dir() {
        files += copy_tree(&library, &dir.join(&layout.library_dir));
    }

    tracing::info!(dir = %dir.display(), files, "backup created");
    Ok(Backup {
        dir,
        created_at: now,
        files,
    })
}

/// Recursive copy that skips (and logs) anything it cannot copy.
fn copy_tree(src: &Path, dest: &Path) -> usize {
    if let Err(e) = fs::create_dir_all(dest) {
        tracing::warn!(dir = %dest.display(), error = %e, "could not create backup folder");
        return 0;
    }
    let entries = match fs::read_dir(src) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %src.display(), error = %e, "could not read folder for backup");
            return 0;
        }
    };

    let mut copied = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let target = dest.join(entry.file_name());
        match entry.file_type() {
            Ok(t) if t.is_dir() => copied += copy_tree(&path, &target),
            Ok(_) => match fs::copy(&path, &target) {
                Ok(_) => copied += 1,
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "could not back up file")
                }
            },
            Err(e) => tracing::warn!(file = %path.display(), error = %e, "could not stat file"),
        }
    }
    copied
}

/// Delete files under the install root matching the stale patterns.
///
/// The backup directory is never touched.
pub fn remove_stale_artifacts(
    layout: &InstallLayout,
    policy: &InstallPolicy,
) -> Result<Vec<String>, UpdateError> {
    if policy.stale.is_empty() {
        return Ok(Vec::new());
    }
    let backups = layout.backups_root();
    let files = walk_files(&layout.root, &backups)
        .map_err(|e| UpdateError::io("Failed to scan install directory", e))?;

    let mut removed = Vec::new();
    for path in files {
        let relative = relative_display(&layout.root, &path);
        if !policy.stale.matches(&relative) {
            continue;
        }
        fs::remove_file(&path)
            .map_err(|e| UpdateError::io(format!("Failed to remove stale {relative}"), e))?;
        tracing::info!(file = %relative, "removed stale artifact");
        removed.push(relative);
    }
    Ok(removed)
}

/// Delete shortcuts next to the entry point that no longer launch it.
///
/// A shortcut is orphaned when it is a symlink whose target is missing or
/// is not the entry point, or when its stem differs from the entry point's.
pub fn remove_orphaned_shortcuts(
    layout: &InstallLayout,
    policy: &InstallPolicy,
) -> Result<Vec<String>, UpdateError> {
    if policy.shortcuts.is_empty() {
        return Ok(Vec::new());
    }
    let entries = match fs::read_dir(&layout.root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(UpdateError::io("Failed to scan install directory", e)),
    };

    let canonical_entry = layout.entry_point_path().canonicalize().ok();
    let entry_stem = layout.entry_stem();
    let mut removed = Vec::new();

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !policy.shortcuts.matches(&name) {
            continue;
        }
        let path = entry.path();
        let is_symlink = entry.file_type().map(|t| t.is_symlink()).unwrap_or(false);

        let broken_link = is_symlink
            && match path.canonicalize() {
                Ok(target) => canonical_entry.as_ref() != Some(&target),
                Err(_) => true,
            };
        let foreign = file_stem(Path::new(&name)) != entry_stem;

        if broken_link || foreign {
            fs::remove_file(&path)
                .map_err(|e| UpdateError::io(format!("Failed to remove shortcut {name}"), e))?;
            tracing::info!(file = %name, broken_link, "removed orphaned shortcut");
            removed.push(name);
        }
    }
    Ok(removed)
}

/// Move every staged file to its final place, one atomic rename per file.
///
/// User-content files that already exist are left alone. The first failure
/// aborts; files installed before it stay installed.
pub fn install_files(
    layout: &InstallLayout,
    policy: &InstallPolicy,
    batch: &DownloadBatch,
    progress: &mut dyn FnMut(UpdateProgress),
) -> Result<(Vec<String>, Vec<String>), UpdateError> {
    let mut installed = Vec::new();
    let mut preserved = Vec::new();
    let total = batch.files.len();

    for (index, file) in batch.files.iter().enumerate() {
        let relative = file.entry.relative_path();
        progress(UpdateProgress::new(
            UpdatePhase::Installing,
            index + 1,
            total,
            Some(relative.clone()),
        ));

        let dest = safe_stage_path(&layout.root, &relative)?;
        if policy.user_content.matches(&relative) && dest.exists() {
            tracing::info!(file = %relative, "preserving user-customized file");
            preserved.push(relative);
            continue;
        }

        let content = fs::read(&file.staged_path)
            .map_err(|e| UpdateError::io(format!("Failed to read staged {relative}"), e))?;
        crate::fs::write_atomic(&dest, &content)
            .map_err(|e| UpdateError::io(format!("Failed to install {relative}"), e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if dest == layout.entry_point_path() {
                fs::set_permissions(&dest, fs::Permissions::from_mode(0o755)).map_err(|e| {
                    UpdateError::io("Failed to set executable permissions on entry point", e)
                })?;
            }
        }

        tracing::debug!(file = %relative, "installed");
        installed.push(relative);
    }
    Ok((installed, preserved))
}

/// Copy a retained backup back over the install root.
///
/// Returns the number of files restored.
pub fn restore_backup(layout: &InstallLayout, backup_dir: &Path) -> Result<usize, UpdateError> {
    if !backup_dir.is_dir() {
        return Err(UpdateError::Install(format!(
            "backup {} does not exist",
            backup_dir.display()
        )));
    }
    let files = walk_files(backup_dir, Path::new(""))
        .map_err(|e| UpdateError::io("Failed to scan backup", e))?;

    for path in &files {
        let relative = relative_display(backup_dir, path);
        let dest = safe_stage_path(&layout.root, &relative)?;
        let content = fs::read(path)
            .map_err(|e| UpdateError::io(format!("Failed to read backup of {relative}"), e))?;
        crate::fs::write_atomic(&dest, &content)
            .map_err(|e| UpdateError::io(format!("Failed to restore {relative}"), e))?;
    }
    tracing::info!(backup = %backup_dir.display(), files = files.len(), "backup restored");
    Ok(files.len())
}

/// Runs backup, cleanup and install in order.
pub struct Installer {
    layout: InstallLayout,
    policy: InstallPolicy,
}

impl Installer {
    pub fn new(layout: InstallLayout, policy: InstallPolicy) -> Self {
        Self { layout, policy }
    }

    pub fn layout(&self) -> &InstallLayout {
        &self.layout
    }

    pub fn policy(&self) -> &InstallPolicy {
        &self.policy
    }

    /// Install a downloaded and verified batch.
    pub fn run(
        &self,
        batch: &DownloadBatch,
        progress: &mut dyn FnMut(UpdateProgress),
    ) -> Result<InstallSummary, UpdateError> {
        if !self.layout.root.is_dir() {
            return Err(UpdateError::Install(format!(
                "install directory {} does not exist",
                self.layout.root.display()
            )));
        }

        progress(UpdateProgress::new(UpdatePhase::BackingUp, 0, 1, None));
        let backup = create_backup(&self.layout, Local::now())?;

        progress(UpdateProgress::new(UpdatePhase::Cleaning, 0, 1, None));
        let mut removed = remove_stale_artifacts(&self.layout, &self.policy)?;
        removed.extend(remove_orphaned_shortcuts(&self.layout, &self.policy)?);

        let (installed, preserved) = install_files(&self.layout, &self.policy, batch, progress)?;

        Ok(InstallSummary {
            backup_dir: Some(backup.dir),
            removed,
            installed,
            preserved,
        })
    }
}

/// All regular files under `root`, not following symlinked directories,
/// skipping `skip` and everything below it.
fn walk_files(root: &Path, skip: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path == skip {
                continue;
            }
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

fn relative_display(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn layout(root: &Path) -> InstallLayout {
        InstallLayout::new(root, &UpdateConfig::default())
    }

    #[test]
    fn test_backup_copies_entry_point_and_library() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        fs::write(root.join("tether"), b"v1").unwrap();
        fs::create_dir_all(root.join("lib/prompts")).unwrap();
        fs::write(root.join("lib/util.py"), b"util").unwrap();
        fs::write(root.join("lib/prompts/review_prompt.txt"), b"mine").unwrap();
        fs::write(root.join("notes.md"), b"not backed up").unwrap();

        let now = Local.with_ymd_and_hms(2026, 10, 18, 9, 30, 5).unwrap();
        let backup = create_backup(&layout(root), now).unwrap();

        assert_eq!(backup.dir, root.join("backups/20261018_093005"));
        assert_eq!(backup.files, 3);
        assert_eq!(fs::read(backup.dir.join("tether")).unwrap(), b"v1");
        assert_eq!(
            fs::read(backup.dir.join("lib/prompts/review_prompt.txt")).unwrap(),
            b"mine"
        );
        assert!(!backup.dir.join("notes.md").exists());
    }

    #[test]
    fn test_backup_name_collision_gets_suffix() {
        let temp = tempfile::tempdir().unwrap();
        let now = Local.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let first = create_backup(&layout(temp.path()), now).unwrap();
        let second = create_backup(&layout(temp.path()), now).unwrap();
        assert_ne!(first.dir, second.dir);
        assert!(second.dir.ends_with("20260102_030405_1"));
    }

    #[test]
    fn test_stale_cleanup_skips_backups() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("lib")).unwrap();
        fs::create_dir_all(root.join("backups/old")).unwrap();
        fs::write(root.join("tether.old"), b"x").unwrap();
        fs::write(root.join("lib/state.BAK"), b"x").unwrap();
        fs::write(root.join("lib/keep.py"), b"x").unwrap();
        fs::write(root.join("backups/old/tether.old"), b"x").unwrap();

        let policy = InstallPolicy::from_config(&UpdateConfig::default());
        let removed = remove_stale_artifacts(&layout(root), &policy).unwrap();

        assert_eq!(removed, vec!["lib/state.BAK".to_string(), "tether.old".to_string()]);
        assert!(root.join("lib/keep.py").exists());
        assert!(root.join("backups/old/tether.old").exists());
    }

    #[test]
    fn test_shortcut_with_foreign_stem_removed() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        fs::write(root.join("tether"), b"bin").unwrap();
        fs::write(root.join("Tether.desktop"), b"[Desktop Entry]").unwrap();
        fs::write(root.join("report-check.desktop"), b"[Desktop Entry]").unwrap();

        let policy = InstallPolicy::from_config(&UpdateConfig::default());
        let removed = remove_orphaned_shortcuts(&layout(root), &policy).unwrap();

        assert_eq!(removed, vec!["report-check.desktop".to_string()]);
        assert!(root.join("Tether.desktop").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_broken_symlink_shortcut_removed() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        fs::write(root.join("tether"), b"bin").unwrap();
        std::os::unix::fs::symlink(root.join("tether"), root.join("tether.lnk")).unwrap();
        std::os::unix::fs::symlink(root.join("gone"), root.join("Tether.desktop")).unwrap();

        let policy = InstallPolicy::from_config(&UpdateConfig::default());
        let removed = remove_orphaned_shortcuts(&layout(root), &policy).unwrap();

        assert_eq!(removed, vec!["Tether.desktop".to_string()]);
        assert!(root.join("tether.lnk").exists());
    }

    #[test]
    fn test_restore_backup_copies_files_back() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("lib")).unwrap();
        fs::write(root.join("tether"), b"v1").unwrap();
        fs::write(root.join("lib/util.py"), b"old").unwrap();

        let now = Local.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let backup = create_backup(&layout(root), now).unwrap();
        fs::write(root.join("tether"), b"v2").unwrap();
        fs::write(root.join("lib/util.py"), b"new").unwrap();

        let restored = restore_backup(&layout(root), &backup.dir).unwrap();
        assert_eq!(restored, 2);
        assert_eq!(fs::read(root.join("tether")).unwrap(), b"v1");
        assert_eq!(fs::read(root.join("lib/util.py")).unwrap(), b"old");
    }

    #[test]
    fn test_restore_missing_backup_fails() {
        let temp = tempfile::tempdir().unwrap();
        let err = restore_backup(&layout(temp.path()), &temp.path().join("nope")).unwrap_err();
        assert!(matches!(err, UpdateError::Install(_)));
    }
}

//! Multi-file updates from the release server.
//!
//! An update runs in strict order: fetch the manifest, download every file
//! into a staging directory, verify every hash, and only then back up,
//! clean and install. Nothing in the install directory changes unless the
//! whole batch downloaded and verified.

pub mod client;
pub mod download;
pub mod install;
pub mod manifest;
pub mod patterns;
pub mod verify;
pub mod version;


use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use client::{Fetch, FetchResponse, HttpClient, ManifestClient, RequestKind};
pub use download::{DownloadBatch, DownloadedFile, Downloader, RetryPolicy};
pub use install::{InstallLayout, InstallPolicy, InstallSummary, Installer};
pub use manifest::{FileEntry, ReleaseInfo, ReleaseManifest};
pub use patterns::PatternSet;
pub use version::{compare_versions, UpdateCheck, VersionStatus};

use crate::config::{ServerConfig, UpdateConfig};
use crate::error::UpdateError;

/// Stage of a running update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UpdatePhase {
    Downloading,
    BackingUp,
    Cleaning,
    Installing,
    Complete,
}

impl fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UpdatePhase::Downloading => "Downloading",
            UpdatePhase::BackingUp => "Backing up",
            UpdatePhase::Cleaning => "Cleaning up",
            UpdatePhase::Installing => "Installing",
            UpdatePhase::Complete => "Complete",
        };
        f.write_str(label)
    }
}

/// Progress report passed to the caller's callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateProgress {
    pub phase: UpdatePhase,
    /// 1-based index of the current item (0 before the first one).
    pub current: usize,
    pub total: usize,
    pub file: Option<String>,
}

impl UpdateProgress {
    pub fn new(phase: UpdatePhase, current: usize, total: usize, file: Option<String>) -> Self {
        Self {
            phase,
            current,
            total,
            file,
        }
    }

    /// Completion within the current phase, 0-100.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.current.min(self.total) * 100) / self.total) as u8
    }
}

/// Result of a successful update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateOutcome {
    pub version: String,
    pub installed: Vec<String>,
    pub preserved: Vec<String>,
    pub skipped: Vec<String>,
    pub removed: Vec<String>,
    pub backup_dir: Option<PathBuf>,
}

/// Check and apply updates for one installation.
pub struct UpdatePipeline<F = HttpClient> {
    client: ManifestClient<F>,
    config: UpdateConfig,
    install_root: PathBuf,
}

impl UpdatePipeline<HttpClient> {
    pub fn from_config(server: &ServerConfig, config: &UpdateConfig) -> anyhow::Result<Self> {
        let client = ManifestClient::from_config(
            server,
            config.metadata_timeouts,
            config.download_timeouts,
            config.max_file_size(),
        )?;
        Ok(Self::new(client, config.clone(), config.install_dir()?))
    }
}

impl<F: Fetch> UpdatePipeline<F> {
    pub fn new(client: ManifestClient<F>, config: UpdateConfig, install_root: PathBuf) -> Self {
        Self {
            client,
            config,
            install_root,
        }
    }

    pub fn client(&self) -> &ManifestClient<F> {
        &self.client
    }

    pub fn install_root(&self) -> &Path {
        &self.install_root
    }

    pub fn current_version(&self) -> &str {
        self.config.current_version()
    }

    pub fn check(&self) -> Result<UpdateCheck, UpdateError> {
        self.client.check_latest_version(self.current_version())
    }

    /// Latest version and its file list.
    pub fn release_manifest(&self, version: &str) -> Result<ReleaseManifest, UpdateError> {
        Ok(ReleaseManifest {
            latest_version: version.to_string(),
            files: self.client.file_manifest(version)?,
        })
    }

    /// Download, verify and install `version`.
    pub fn apply(
        &self,
        version: &str,
        progress: &mut dyn FnMut(UpdateProgress),
    ) -> Result<UpdateOutcome, UpdateError> {
        let manifest = self.release_manifest(version)?;
        if manifest.files.is_empty() {
            return Err(UpdateError::InvalidResponse(format!(
                "release {version} lists no files"
            )));
        }
        tracing::info!(version, files = manifest.files.len(), "starting update");

        let policy = InstallPolicy::from_config(&self.config);
        let downloader = Downloader::new(
            &self.client,
            RetryPolicy::from_config(&self.config),
            Duration::from_millis(self.config.inter_file_delay_ms),
            &policy.user_content,
        );
        let batch = downloader.download_all(version, &manifest.files, progress)?;

        // Gate: nothing below runs unless every file verified
        verify::verify_batch(&batch)?;

        let installer = Installer::new(
            InstallLayout::new(&self.install_root, &self.config),
            policy.clone(),
        );
        let summary = installer.run(&batch, progress)?;

        progress(UpdateProgress::new(
            UpdatePhase::Complete,
            summary.installed.len(),
            summary.installed.len(),
            None,
        ));
        tracing::info!(
            version,
            installed = summary.installed.len(),
            preserved = summary.preserved.len(),
            skipped = batch.skipped.len(),
            "update installed"
        );

        Ok(UpdateOutcome {
            version: version.to_string(),
            installed: summary.installed,
            preserved: summary.preserved,
            skipped: batch.skipped.clone(),
            removed: summary.removed,
            backup_dir: summary.backup_dir,
        })
    }
}

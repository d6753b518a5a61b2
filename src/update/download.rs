//! Downloading a release's files into a staging directory.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

use super::client::{ensure_success, Fetch, FetchResponse, ManifestClient};
use super::manifest::FileEntry;
use super::patterns::PatternSet;
use super::{UpdatePhase, UpdateProgress};
use crate::config::UpdateConfig;
use crate::error::UpdateError;

/// How HTTP 429 responses are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Wait before the first retry; doubles for each further one.
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &UpdateConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
        }
    }

    /// Wait before retry number `retry` (1-based): initial * 2^(retry-1).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let multiplier = 2u32.saturating_pow(retry - 1);
        self.initial_backoff.saturating_mul(multiplier)
    }
}

/// A downloaded file waiting in staging.
#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub entry: FileEntry,
    pub staged_path: PathBuf,
}

/// Every file of a release, staged in a private temporary directory.
///
/// Dropping the batch deletes the staging directory.
#[derive(Debug)]
pub struct DownloadBatch {
    staging: TempDir,
    pub files: Vec<DownloadedFile>,
    /// User-content files the server does not have (HTTP 404).
    pub skipped: Vec<String>,
}

impl DownloadBatch {
    pub fn staging_dir(&self) -> &Path {
        self.staging.path()
    }
}

/// Fetches manifest files one at a time, with 429 retry and a courtesy
/// delay between files.
pub struct Downloader<'a, F> {
    client: &'a ManifestClient<F>,
    retry: RetryPolicy,
    inter_file_delay: Duration,
    user_content: &'a PatternSet,
}

impl<'a, F: Fetch> Downloader<'a, F> {
    pub fn new(
        client: &'a ManifestClient<F>,
        retry: RetryPolicy,
        inter_file_delay: Duration,
        user_content: &'a PatternSet,
    ) -> Self {
        Self {
            client,
            retry,
            inter_file_delay,
            user_content,
        }
    }

    /// Download every entry of `version` into a fresh staging directory.
    ///
    /// Any failure other than a 404 on a user-content file aborts the whole
    /// batch; the staging directory is removed with it.
    pub fn download_all(
        &self,
        version: &str,
        entries: &[FileEntry],
        progress: &mut dyn FnMut(UpdateProgress),
    ) -> Result<DownloadBatch, UpdateError> {
        let staging = tempfile::Builder::new()
            .prefix("tether-update-")
            .tempdir()
            .map_err(|e| UpdateError::io("Failed to create staging directory", e))?;

        let mut files = Vec::with_capacity(entries.len());
        let mut skipped = Vec::new();
        let total = entries.len();

        for (index, entry) in entries.iter().enumerate() {
            if index > 0 && !self.inter_file_delay.is_zero() {
                thread::sleep(self.inter_file_delay);
            }

            let relative = entry.relative_path();
            progress(UpdateProgress::new(
                UpdatePhase::Downloading,
                index + 1,
                total,
                Some(relative.clone()),
            ));

            let staged_path = safe_stage_path(staging.path(), &relative)?;
            let url = self.client.download_url(version, Some(&relative))?;
            let response = self.fetch_with_retry(&url, &relative)?;

            if response.status == 404 && self.user_content.matches(&relative) {
                tracing::info!(file = %relative, "user content file not on server, skipping");
                skipped.push(relative);
                continue;
            }
            ensure_success(&response, &format!("Failed to download {relative}"))?;

            if let Some(parent) = staged_path.parent() {
                fs::create_dir_all(parent).map_err(|e| {
                    UpdateError::io(format!("Failed to create staging folder for {relative}"), e)
                })?;
            }
            fs::write(&staged_path, &response.body)
                .map_err(|e| UpdateError::io(format!("Failed to stage {relative}"), e))?;

            tracing::debug!(file = %relative, bytes = response.body.len(), "file downloaded");
            files.push(DownloadedFile {
                entry: entry.clone(),
                staged_path,
            });
        }

        Ok(DownloadBatch {
            staging,
            files,
            skipped,
        })
    }

    fn fetch_with_retry(&self, url: &str, relative: &str) -> Result<FetchResponse, UpdateError> {
        let mut retry = 0;
        loop {
            let response = self.client.download(url)?;
            if response.status != 429 {
                return Ok(response);
            }
            if retry >= self.retry.max_retries {
                return Err(UpdateError::RateLimited {
                    context: format!("Failed to download {relative}"),
                    attempts: retry + 1,
                });
            }
            retry += 1;
            let wait = self.retry.backoff_for(retry);
            tracing::warn!(
                file = %relative,
                status = 429,
                retry,
                wait_ms = wait.as_millis() as u64,
                "rate limited, backing off"
            );
            thread::sleep(wait);
        }
    }
}

/// Resolve a manifest path under `root`, refusing anything that could
/// land outside it.
pub fn safe_stage_path(root: &Path, relative: &str) -> Result<PathBuf, UpdateError> {
    let reject = |reason: &str| UpdateError::InvalidPath {
        path: relative.to_string(),
        reason: reason.to_string(),
    };

    if relative.trim().is_empty() {
        return Err(reject("empty path"));
    }
    if relative.starts_with('/') || relative.starts_with('\\') {
        return Err(reject("starts with a path separator"));
    }

    let normalized = relative.replace('\\', "/");
    let mut resolved = root.to_path_buf();
    let mut depth = 0usize;
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => return Err(reject("contains '..'")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(reject("absolute path"));
            }
        }
    }
    if depth == 0 {
        return Err(reject("no file name"));
    }
    // Drive-relative forms like `C:foo` parse as Normal on unix
    if normalized.contains(':') {
        return Err(reject("contains a drive or stream separator"));
    }

    Ok(resolved)
}

//! Single entry point for the host application.
//!
//! The coordinator owns the single-flight guard, so streams, update checks
//! and installs never overlap and never start in quick succession. Failures
//! never escape as errors: every operation returns an [`OperationReport`]
//! and the operator is told through the [`Notifier`].

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{Config, GuardConfig, StreamConfig};
use crate::error::UpdateError;
use crate::guard::{Admission, Rejection, SingleFlightGuard};
use crate::notify::{Notifier, NotifyLevel};
use crate::stream::{
    dispatch, timeout_message, ActiveStream, StreamEnd, StreamHandler, StreamMode, TaskRequest,
};
use crate::update::{Fetch, HttpClient, UpdateCheck, UpdateOutcome, UpdatePipeline, UpdateProgress};

/// Result of an operation, as shown to the operator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationReport<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
    /// Set when the guard refused to start the operation.
    #[serde(skip)]
    pub rejected: Option<Rejection>,
}

impl<T> OperationReport<T> {
    fn succeeded(message: impl Into<String>, data: Option<T>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
            rejected: None,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            rejected: None,
        }
    }

    fn refused(rejection: Rejection) -> Self {
        Self {
            success: false,
            message: rejection.to_string(),
            data: None,
            rejected: Some(rejection),
        }
    }

    pub fn was_rejected(&self) -> bool {
        self.rejected.is_some()
    }
}

pub struct Coordinator<F: Fetch = HttpClient> {
    stream_config: StreamConfig,
    guard: SingleFlightGuard,
    notifier: Arc<dyn Notifier>,
    pipeline: UpdatePipeline<F>,
    active: Option<ActiveStream>,
}

impl Coordinator<HttpClient> {
    pub fn from_config(config: &Config, notifier: Arc<dyn Notifier>) -> anyhow::Result<Self> {
        let pipeline = UpdatePipeline::from_config(&config.server, &config.update)?;
        Ok(Self::new(
            config.stream.clone(),
            &config.guard,
            pipeline,
            notifier,
        ))
    }
}

impl<F: Fetch> Coordinator<F> {
    pub fn new(
        stream_config: StreamConfig,
        guard: &GuardConfig,
        pipeline: UpdatePipeline<F>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            stream_config,
            guard: SingleFlightGuard::new(
                Duration::from_millis(guard.min_interval_ms),
                Arc::clone(&notifier),
            ),
            notifier,
            pipeline,
            active: None,
        }
    }

    pub fn guard(&self) -> &SingleFlightGuard {
        &self.guard
    }

    pub fn pipeline(&self) -> &UpdatePipeline<F> {
        &self.pipeline
    }

    pub fn is_streaming(&self) -> bool {
        self.active.is_some()
    }

    /// Start a worker for `mode` and begin watching its output.
    pub fn start_stream(
        &mut self,
        mode: StreamMode,
        params: Vec<(String, String)>,
    ) -> OperationReport<()> {
        if let Admission::Rejected(rejection) = self.guard.try_acquire() {
            return OperationReport::refused(rejection);
        }

        match ActiveStream::launch(&self.stream_config, mode, params) {
            Ok(stream) => {
                self.active = Some(stream);
                OperationReport::succeeded("Streaming started", None)
            }
            Err(e) => self.stream_start_failed(mode, e),
        }
    }

    /// Write the task request and watch the channel, leaving the worker
    /// launch to the caller.
    pub fn prepare_stream(
        &mut self,
        mode: StreamMode,
        params: Vec<(String, String)>,
    ) -> OperationReport<TaskRequest> {
        if let Admission::Rejected(rejection) = self.guard.try_acquire() {
            return OperationReport::refused(rejection);
        }

        let dir = self.stream_config.stream_dir();
        match ActiveStream::prepare(&dir, mode, params, self.stream_config.timeout()) {
            Ok((stream, request)) => {
                self.active = Some(stream);
                OperationReport::succeeded("Task request written", Some(request))
            }
            Err(e) => self.stream_start_failed(mode, e),
        }
    }

    fn stream_start_failed<T>(&mut self, mode: StreamMode, e: anyhow::Error) -> OperationReport<T> {
        self.guard.end();
        tracing::error!(op = mode.command(), error = %format!("{e:#}"), "failed to start stream");
        let message = format!("Failed to start task: {e:#}");
        self.notifier.notify(NotifyLevel::Error, "Task failed", &message);
        OperationReport::failed(message)
    }

    /// Poll the active stream once; call on a short timer.
    ///
    /// Returns `Some` on the tick that ends the stream. The guard is
    /// released and the worker reaped before returning.
    pub fn tick(&mut self, handler: &mut dyn StreamHandler) -> Option<StreamEnd> {
        let active = self.active.as_mut()?;
        let mode = active.mode();
        let outcome = active.poll();
        let end = dispatch(outcome, mode, handler)?;

        let elapsed_ms = match self.active.take() {
            Some(stream) => {
                let elapsed = stream.elapsed();
                stream.finish();
                elapsed.as_millis() as u64
            }
            None => 0,
        };
        self.guard.end();

        match &end {
            StreamEnd::Succeeded(_) => {
                tracing::info!(op = mode.command(), elapsed_ms, status = "ok", "stream finished");
            }
            StreamEnd::Failed(message) => {
                tracing::warn!(op = mode.command(), elapsed_ms, status = "error", error = %message, "stream failed");
                self.notifier.notify(NotifyLevel::Error, "Task failed", message);
            }
            StreamEnd::TimedOut(idle) => {
                tracing::warn!(op = mode.command(), elapsed_ms, status = "timeout", "stream timed out");
                self.notifier
                    .notify(NotifyLevel::Error, "Task timed out", &timeout_message(*idle));
            }
        }
        Some(end)
    }

    /// Ask the server whether a newer version exists.
    pub fn check_for_update(&mut self) -> OperationReport<UpdateCheck> {
        if let Admission::Rejected(rejection) = self.guard.try_acquire() {
            return OperationReport::refused(rejection);
        }
        let started = Instant::now();
        let result = self.pipeline.check();
        self.guard.end();

        match result {
            Ok(check) => {
                log_success("check_update", started);
                OperationReport::succeeded(check.summary(), Some(check))
            }
            Err(e) => self.update_failed("check_update", started, "Update check failed", e),
        }
    }

    /// Check, then download, verify and install the latest version if it
    /// is newer than the running one.
    pub fn update(
        &mut self,
        progress: &mut dyn FnMut(UpdateProgress),
    ) -> OperationReport<UpdateOutcome> {
        if let Admission::Rejected(rejection) = self.guard.try_acquire() {
            return OperationReport::refused(rejection);
        }
        let started = Instant::now();
        let result = self.run_update(progress);
        self.guard.end();

        match result {
            Ok(Some(outcome)) => {
                log_success("update", started);
                let message = format!(
                    "Updated to {} ({} files installed, {} preserved). Restart to use the new version.",
                    outcome.version,
                    outcome.installed.len(),
                    outcome.preserved.len()
                );
                self.notifier.notify(NotifyLevel::Info, "Update installed", &message);
                OperationReport::succeeded(message, Some(outcome))
            }
            Ok(None) => {
                log_success("update", started);
                OperationReport::succeeded("Already up to date", None)
            }
            Err(e) => self.update_failed("update", started, "Update failed", e),
        }
    }

    fn run_update(
        &self,
        progress: &mut dyn FnMut(UpdateProgress),
    ) -> Result<Option<UpdateOutcome>, UpdateError> {
        let check = self.pipeline.check()?;
        if !check.update_available() {
            tracing::info!(summary = %check.summary(), "no update to install");
            return Ok(None);
        }
        self.pipeline
            .apply(&check.latest_version, progress)
            .map(Some)
    }

    fn update_failed<T>(
        &self,
        op: &str,
        started: Instant,
        title: &str,
        error: UpdateError,
    ) -> OperationReport<T> {
        tracing::error!(
            op,
            elapsed_ms = started.elapsed().as_millis() as u64,
            status = ?error.status(),
            error = %error,
            "operation failed"
        );
        let message = error.to_string();
        self.notifier.notify(NotifyLevel::Error, title, &message);
        OperationReport::failed(message)
    }

    /// Drop any active stream and clear the guard.
    pub fn reset(&mut self) {
        if let Some(stream) = self.active.take() {
            stream.finish();
        }
        self.guard.reset();
        tracing::info!("coordinator reset");
    }
}

fn log_success(op: &str, started: Instant) {
    tracing::info!(
        op,
        elapsed_ms = started.elapsed().as_millis() as u64,
        status = "ok",
        "operation finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpdateConfig;
    use crate::notify::MemoryNotifier;
    use crate::stream::{CollectingHandler, StatusRecord, StreamWriter};
    use crate::update::{FetchResponse, ManifestClient, RequestKind};

    /// Version endpoint only; every other URL is a 404.
    struct VersionOnly(&'static str);

    impl Fetch for VersionOnly {
        fn get(&self, url: &str, _kind: RequestKind) -> Result<FetchResponse, UpdateError> {
            if url.ends_with("/api/versions/tether") {
                return Ok(FetchResponse {
                    status: 200,
                    body: format!(r#"{{"latest_version": "{}"}}"#, self.0).into_bytes(),
                });
            }
            Ok(FetchResponse {
                status: 404,
                body: Vec::new(),
            })
        }
    }

    fn coordinator(
        latest: &'static str,
        stream_dir: &std::path::Path,
        min_interval_ms: u64,
    ) -> (Coordinator<VersionOnly>, Arc<MemoryNotifier>) {
        let notifier = Arc::new(MemoryNotifier::new());
        let update = UpdateConfig {
            current_version: Some("1.0.0".to_string()),
            ..UpdateConfig::default()
        };
        let pipeline = UpdatePipeline::new(
            ManifestClient::new("http://updates.test", "tether", VersionOnly(latest)),
            update,
            stream_dir.to_path_buf(),
        );
        let stream = StreamConfig {
            temp_subdir: stream_dir.to_string_lossy().into_owned(),
            timeout_secs: 5,
            ..StreamConfig::default()
        };
        let coordinator = Coordinator::new(
            stream,
            &GuardConfig { min_interval_ms },
            pipeline,
            notifier.clone(),
        );
        (coordinator, notifier)
    }

    #[test]
    fn test_check_reports_status() {
        let temp = tempfile::tempdir().unwrap();
        let (mut coordinator, _) = coordinator("1.2.0", temp.path(), 0);
        let report = coordinator.check_for_update();
        assert!(report.success);
        assert!(report.data.unwrap().update_available());
        assert!(!coordinator.guard().in_progress());
    }

    #[test]
    fn test_second_request_too_soon_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let (mut coordinator, notifier) = coordinator("1.0.0", temp.path(), 60_000);

        assert!(coordinator.check_for_update().success);
        let report = coordinator.check_for_update();
        assert!(report.was_rejected());
        assert!(matches!(report.rejected, Some(Rejection::TooSoon { .. })));
        assert_eq!(notifier.sent().len(), 1);
    }

    #[test]
    fn test_up_to_date_update_is_noop() {
        let temp = tempfile::tempdir().unwrap();
        let (mut coordinator, _) = coordinator("1.0.0", temp.path(), 0);
        let report = coordinator.update(&mut |_: UpdateProgress| {});
        assert!(report.success);
        assert!(report.data.is_none());
    }

    #[test]
    fn test_update_failure_is_reported_not_raised() {
        let temp = tempfile::tempdir().unwrap();
        let (mut coordinator, notifier) = coordinator("2.0.0", temp.path(), 0);

        let report = coordinator.update(&mut |_: UpdateProgress| {});

        assert!(!report.success);
        assert!(report.message.contains("2.0.0"));
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].level, NotifyLevel::Error);
        assert!(!coordinator.guard().in_progress());
    }

    #[test]
    fn test_stream_blocks_other_operations_until_done() {
        let temp = tempfile::tempdir().unwrap();
        let (mut coordinator, _) = coordinator("1.0.0", temp.path(), 0);

        let report = coordinator.prepare_stream(
            StreamMode::Review,
            vec![("input_file".to_string(), "report.txt".to_string())],
        );
        assert!(report.success);
        let request = report.data.unwrap();
        assert_eq!(request.param("input_file"), Some("report.txt"));

        let busy = coordinator.check_for_update();
        assert_eq!(busy.rejected, Some(Rejection::InProgress));

        let mut writer = StreamWriter::open(request.channel()).unwrap();
        writer.write_chunk("Findings: none").unwrap();
        writer
            .finish(&StatusRecord::success(Some("out.html".into()), None))
            .unwrap();

        let mut handler = CollectingHandler::default();
        let mut end = None;
        for _ in 0..10 {
            if let Some(e) = coordinator.tick(&mut handler) {
                end = Some(e);
                break;
            }
        }

        assert!(matches!(end, Some(StreamEnd::Succeeded(_))));
        assert_eq!(handler.text, "Findings: none");
        assert!(!coordinator.is_streaming());
        assert!(!request.stream_file.exists());
        assert!(!request.status_file.exists());
        assert!(coordinator.check_for_update().success);
    }

    #[test]
    fn test_worker_error_is_notified() {
        let temp = tempfile::tempdir().unwrap();
        let (mut coordinator, notifier) = coordinator("1.0.0", temp.path(), 0);
        let request = coordinator
            .prepare_stream(StreamMode::FollowUp, Vec::new())
            .data
            .unwrap();

        StreamWriter::open(request.channel())
            .unwrap()
            .fail("model unavailable")
            .unwrap();

        let mut handler = CollectingHandler::default();
        let end = coordinator.tick(&mut handler);

        assert_eq!(end, Some(StreamEnd::Failed("model unavailable".to_string())));
        assert_eq!(handler.error.as_deref(), Some("model unavailable"));
        assert_eq!(notifier.sent()[0].body, "model unavailable");
    }

    #[test]
    fn test_launch_failure_releases_guard() {
        let temp = tempfile::tempdir().unwrap();
        let (mut coordinator, notifier) = coordinator("1.0.0", temp.path(), 0);

        // No worker program configured
        let report = coordinator.start_stream(StreamMode::Review, Vec::new());

        assert!(!report.success);
        assert!(!report.was_rejected());
        assert!(!coordinator.guard().in_progress());
        assert_eq!(notifier.sent()[0].level, NotifyLevel::Error);
    }

    #[test]
    fn test_reset_clears_active_stream() {
        let temp = tempfile::tempdir().unwrap();
        let (mut coordinator, _) = coordinator("1.0.0", temp.path(), 60_000);
        coordinator.prepare_stream(StreamMode::Review, Vec::new());
        assert!(coordinator.is_streaming());

        coordinator.reset();
        assert!(!coordinator.is_streaming());
        assert!(coordinator.check_for_update().success);
    }
}

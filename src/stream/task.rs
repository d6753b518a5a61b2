//! Launching a worker for one streaming task.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use wait_timeout::ChildExt;

use super::channel::StreamChannel;
use super::consumer::{PollOutcome, StreamConsumer};
use super::request::{TaskRequest, REQUEST_FILE_NAME};
use super::StreamMode;
use crate::config::StreamConfig;

/// How long to wait for a finished worker to exit before killing it.
const WORKER_EXIT_GRACE: Duration = Duration::from_secs(2);

/// A launched worker and the consumer reading its output.
#[derive(Debug)]
pub struct ActiveStream {
    mode: StreamMode,
    consumer: StreamConsumer,
    request_path: PathBuf,
    child: Option<Child>,
    started: Instant,
}

impl ActiveStream {
    /// Write the request file and start the configured worker on it.
    ///
    /// The worker is not waited on; progress is observed only through the
    /// channel.
    pub fn launch(
        config: &StreamConfig,
        mode: StreamMode,
        params: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self> {
        let program = resolve_worker(&config.worker_program)?;
        let dir = config.stream_dir();
        let (mut stream, request) = Self::prepare(&dir, mode, params, config.timeout())?;

        let child = Command::new(&program)
            .args(&config.worker_args)
            .arg(&stream.request_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to start worker {}", program.display()))?;

        tracing::info!(
            command = %request.command,
            pid = child.id(),
            stream = %stream.consumer.channel().content_path.display(),
            "worker started"
        );
        stream.child = Some(child);
        Ok(stream)
    }

    /// Allocate a channel and write the request, without starting a worker.
    ///
    /// For hosts that launch the worker themselves.
    pub fn prepare(
        dir: &Path,
        mode: StreamMode,
        params: impl IntoIterator<Item = (String, String)>,
        timeout: Duration,
    ) -> Result<(Self, TaskRequest)> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create stream directory {}", dir.display()))?;

        let channel = StreamChannel::allocate(dir);
        // Leftovers from a crashed run with the same tick would be read as output
        channel
            .remove()
            .context("Failed to clear previous stream files")?;

        let request = TaskRequest::new(mode.command(), &channel).with_params(params);
        let request_path = dir.join(REQUEST_FILE_NAME);
        request.write(&request_path)?;

        let stream = Self {
            mode,
            consumer: StreamConsumer::new(channel, timeout),
            request_path,
            child: None,
            started: Instant::now(),
        };
        Ok((stream, request))
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    pub fn poll(&mut self) -> PollOutcome {
        self.consumer.poll()
    }

    pub fn poll_at(&mut self, now: Instant) -> PollOutcome {
        self.consumer.poll_at(now)
    }

    pub fn consumer(&self) -> &StreamConsumer {
        &self.consumer
    }

    /// Hand the consumer to a watcher thread, keeping the worker handle here.
    pub fn take_consumer(self) -> (StreamConsumer, WorkerHandle) {
        let handle = WorkerHandle {
            child: self.child,
            request_path: self.request_path,
        };
        (self.consumer, handle)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Clean up after the stream ended: give the worker a short grace
    /// period to exit, then remove the request file.
    pub fn finish(self) {
        WorkerHandle {
            child: self.child,
            request_path: self.request_path,
        }
        .finish();
    }
}

/// Worker process and request file left over once the consumer is elsewhere.
#[derive(Debug)]
pub struct WorkerHandle {
    child: Option<Child>,
    request_path: PathBuf,
}

impl WorkerHandle {
    pub fn finish(mut self) {
        if let Some(child) = self.child.as_mut() {
            reap_worker(child, WORKER_EXIT_GRACE);
        }
        if let Err(e) = crate::fs::remove_if_exists(&self.request_path) {
            tracing::warn!(error = %e, "failed to remove task request file");
        }
    }
}

fn reap_worker(child: &mut Child, grace: Duration) {
    match child.wait_timeout(grace) {
        Ok(Some(status)) => {
            tracing::debug!(pid = child.id(), %status, "worker exited");
        }
        Ok(None) => {
            tracing::warn!(pid = child.id(), "worker still running after stream ended, killing");
            let _ = child.kill();
            let _ = child.wait();
        }
        Err(e) => {
            tracing::warn!(pid = child.id(), error = %e, "failed to wait for worker");
        }
    }
}

/// Resolve the worker program: paths are used as given, bare names via `PATH`.
fn resolve_worker(program: &str) -> Result<PathBuf> {
    if program.trim().is_empty() {
        bail!("No worker program configured (stream.worker_program)");
    }
    let path = Path::new(program);
    if path.components().count() > 1 || path.is_absolute() {
        if !path.exists() {
            bail!("Worker program not found: {}", path.display());
        }
        return Ok(path.to_path_buf());
    }
    which::which(program).with_context(|| format!("Worker program '{program}' not found on PATH"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_writes_request_for_channel() {
        let temp = tempfile::tempdir().unwrap();
        let (stream, request) = ActiveStream::prepare(
            temp.path(),
            StreamMode::FollowUp,
            [("session_id".to_string(), "abc".to_string())],
            Duration::from_secs(120),
        )
        .unwrap();

        let loaded = TaskRequest::load(&temp.path().join(REQUEST_FILE_NAME)).unwrap();
        assert_eq!(loaded, request);
        assert_eq!(loaded.command, "stream_follow_up");
        assert_eq!(loaded.channel(), *stream.consumer().channel());
        assert_eq!(stream.mode(), StreamMode::FollowUp);
    }

    #[test]
    fn test_finish_removes_request_file() {
        let temp = tempfile::tempdir().unwrap();
        let (stream, _) = ActiveStream::prepare(
            temp.path(),
            StreamMode::Review,
            Vec::new(),
            Duration::from_secs(120),
        )
        .unwrap();

        stream.finish();
        assert!(!temp.path().join(REQUEST_FILE_NAME).exists());
    }

    #[test]
    fn test_resolve_worker_rejects_empty_and_missing() {
        assert!(resolve_worker("").is_err());
        assert!(resolve_worker("/definitely/not/here/worker").is_err());
        assert!(resolve_worker("no-such-worker-binary-xyz").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_launch_runs_worker_with_request_path() {
        let temp = tempfile::tempdir().unwrap();
        let config = StreamConfig {
            temp_subdir: temp
                .path()
                .join("streams")
                .to_string_lossy()
                .into_owned(),
            worker_program: "sh".to_string(),
            // Copy the request next to itself so the test can see the path was passed
            worker_args: vec!["-c".to_string(), "cp \"$0\" \"$0.seen\"".to_string()],
            ..StreamConfig::default()
        };

        let stream = ActiveStream::launch(&config, StreamMode::Review, Vec::new()).unwrap();
        let dir = config.stream_dir();
        stream.finish();

        assert!(dir.join("request.json.seen").exists());
    }
}

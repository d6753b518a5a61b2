//! File-pair stream channel between a worker process and the GUI.
//!
//! A worker appends UTF-8 text to a content file and, when done, writes a
//! status record to a second file. The consumer polls: new bytes past its
//! cursor are forwarded as deltas, and the appearance of the status file
//! ends the stream. Both files are owned and removed by the consumer.

pub mod channel;
pub mod consumer;
pub mod producer;
pub mod request;
pub mod status;
pub mod task;
pub mod watcher;

pub use channel::StreamChannel;
pub use consumer::{PollOutcome, StreamConsumer};
pub use producer::StreamWriter;
pub use request::TaskRequest;
pub use status::StatusRecord;
pub use task::ActiveStream;
pub use watcher::{StreamEvent, StreamWatcher};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What the stream feeds. The protocol is identical for both; only the
/// success handling differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamMode {
    /// First response for a new request; success opens the rendered result.
    Review,
    /// Reply within an existing conversation; success marks it complete.
    FollowUp,
}

impl StreamMode {
    /// Worker command name for this mode.
    pub fn command(&self) -> &'static str {
        match self {
            StreamMode::Review => "stream_review",
            StreamMode::FollowUp => "stream_follow_up",
        }
    }

    pub fn from_command(command: &str) -> Option<Self> {
        [StreamMode::Review, StreamMode::FollowUp]
            .into_iter()
            .find(|mode| mode.command() == command)
    }
}

/// Receives the output of one stream, typically the display surface.
pub trait StreamHandler {
    /// New text to append to what is already shown.
    fn on_delta(&mut self, mode: StreamMode, text: &str);

    /// The worker finished without error.
    fn on_success(&mut self, mode: StreamMode, status: &StatusRecord);

    /// The worker reported an error.
    fn on_error(&mut self, mode: StreamMode, message: &str);

    /// The worker went silent for longer than the timeout.
    fn on_timeout(&mut self, mode: StreamMode, idle: Duration);
}

/// Final state of a stream, after the handler has been called.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEnd {
    Succeeded(StatusRecord),
    Failed(String),
    TimedOut(Duration),
}

/// Message shown when a stream times out.
pub fn timeout_message(idle: Duration) -> String {
    format!(
        "Request timed out: no response from the worker for {} seconds",
        idle.as_secs()
    )
}

/// Route a poll result to the handler.
///
/// Returns `Some` once the stream has ended.
pub fn dispatch(
    outcome: PollOutcome,
    mode: StreamMode,
    handler: &mut dyn StreamHandler,
) -> Option<StreamEnd> {
    match outcome {
        PollOutcome::Idle => None,
        PollOutcome::Delta(text) => {
            handler.on_delta(mode, &text);
            None
        }
        PollOutcome::Completed { tail, status } => {
            if !tail.is_empty() {
                handler.on_delta(mode, &tail);
            }
            match status.error_message() {
                Some(message) => {
                    let message = message.to_string();
                    handler.on_error(mode, &message);
                    Some(StreamEnd::Failed(message))
                }
                None => {
                    handler.on_success(mode, &status);
                    Some(StreamEnd::Succeeded(status))
                }
            }
        }
        PollOutcome::TimedOut { idle } => {
            handler.on_timeout(mode, idle);
            Some(StreamEnd::TimedOut(idle))
        }
    }
}

/// Handler that collects everything, for callers that only want the result.
#[derive(Debug, Default, Clone)]
pub struct CollectingHandler {
    pub text: String,
    pub success: Option<StatusRecord>,
    pub error: Option<String>,
    pub timed_out: Option<Duration>,
}

impl StreamHandler for CollectingHandler {
    fn on_delta(&mut self, _mode: StreamMode, text: &str) {
        self.text.push_str(text);
    }

    fn on_success(&mut self, _mode: StreamMode, status: &StatusRecord) {
        self.success = Some(status.clone());
    }

    fn on_error(&mut self, _mode: StreamMode, message: &str) {
        self.error = Some(message.to_string());
    }

    fn on_timeout(&mut self, _mode: StreamMode, idle: Duration) {
        self.timed_out = Some(idle);
    }
}

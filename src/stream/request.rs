//! Task request handed from the caller to the worker.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::channel::StreamChannel;

/// Well-known name of the request file inside the stream directory.
pub const REQUEST_FILE_NAME: &str = "request.json";

/// One unit of work for a worker process.
///
/// Serialized flat: `{ "command": ..., "<param>": ..., "stream_file": ...,
/// "status_file": ... }`. Written once before the worker starts and never
/// modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub command: String,
    pub stream_file: PathBuf,
    pub status_file: PathBuf,
    #[serde(flatten)]
    pub params: BTreeMap<String, String>,
}

impl TaskRequest {
    pub fn new(command: impl Into<String>, channel: &StreamChannel) -> Self {
        Self {
            command: command.into(),
            stream_file: channel.content_path.clone(),
            status_file: channel.status_path.clone(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    /// The channel this request tells the worker to write to.
    pub fn channel(&self) -> StreamChannel {
        StreamChannel::new(self.stream_file.clone(), self.status_file.clone())
    }

    /// Write the request so the worker never sees a partial file.
    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).context("Failed to serialize task request")?;
        crate::fs::write_atomic(path, &json)
            .with_context(|| format!("Failed to write task request {}", path.display()))
    }

    /// Read a request file (worker side).
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read task request {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse task request {}", path.display()))
    }
}

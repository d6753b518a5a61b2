//! Worker side of the channel.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use super::channel::StreamChannel;
use super::status::StatusRecord;

/// Appends content to a channel and finishes it with a status record.
///
/// Each chunk is flushed as soon as it is written so the consumer sees it on
/// its next poll. The writer never deletes channel files.
#[derive(Debug)]
pub struct StreamWriter {
    channel: StreamChannel,
    file: File,
    written: u64,
}

impl StreamWriter {
    /// Create (or truncate) the content file.
    pub fn open(channel: StreamChannel) -> Result<Self> {
        if let Some(parent) = channel.content_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create stream directory {}", parent.display())
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&channel.content_path)
            .with_context(|| {
                format!(
                    "Failed to open stream file {}",
                    channel.content_path.display()
                )
            })?;
        Ok(Self {
            channel,
            file,
            written: 0,
        })
    }

    pub fn write_chunk(&mut self, text: &str) -> Result<()> {
        self.file
            .write_all(text.as_bytes())
            .context("Failed to write stream chunk")?;
        self.file.flush().context("Failed to flush stream chunk")?;
        self.written += text.len() as u64;
        Ok(())
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn channel(&self) -> &StreamChannel {
        &self.channel
    }

    /// Write the final status. Consumes the writer: nothing may follow.
    pub fn finish(mut self, status: &StatusRecord) -> Result<()> {
        self.file.flush().context("Failed to flush stream file")?;
        self.file
            .sync_all()
            .context("Failed to sync stream file")?;
        write_status(&self.channel.status_path, status)
    }

    /// Finish with an error status.
    pub fn fail(self, message: impl Into<String>) -> Result<()> {
        let status = StatusRecord::failure(message);
        self.finish(&status)
    }
}

/// Write a status record in one step, so a reader never parses a partial file.
///
/// Also used by workers that fail before they could open the content file.
pub fn write_status(path: &Path, status: &StatusRecord) -> Result<()> {
    let json = serde_json::to_vec(status).context("Failed to serialize status record")?;
    crate::fs::write_atomic(path, &json)
        .with_context(|| format!("Failed to write status file {}", path.display()))
}

//! Reference worker: streams the contents of a text file through the
//! channel named in a task request.
//!
//! Real deployments point `stream.worker_program` at their own model
//! client; this one exists so the protocol can be exercised end to end.

use anyhow::{Context, Result};
use std::path::Path;
use std::thread;
use std::time::Duration;

use crate::stream::{producer::write_status, StatusRecord, StreamMode, StreamWriter, TaskRequest};

/// Delay between streamed lines unless the request sets `delay_ms`.
const DEFAULT_CHUNK_DELAY: Duration = Duration::from_millis(20);

pub fn execute(request_path: &Path) -> Result<()> {
    let request = TaskRequest::load(request_path)?;
    tracing::info!(command = %request.command, "worker started");

    if StreamMode::from_command(&request.command).is_none() {
        let status = StatusRecord::failure(format!("Unknown command: {}", request.command));
        return write_status(&request.status_file, &status);
    }

    let Some(input) = request.param("input_file") else {
        return write_status(
            &request.status_file,
            &StatusRecord::failure("No input_file given in the task request"),
        );
    };
    let text = match std::fs::read_to_string(input) {
        Ok(text) => text,
        Err(e) => {
            return write_status(
                &request.status_file,
                &StatusRecord::failure(format!("Failed to read {input}: {e}")),
            );
        }
    };

    let delay = request
        .param("delay_ms")
        .and_then(|d| d.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_CHUNK_DELAY);

    let mut writer = StreamWriter::open(request.channel()).context("Failed to open stream file")?;
    for line in text.split_inclusive('\n') {
        writer.write_chunk(line)?;
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
    tracing::info!(bytes = writer.written(), "worker finished streaming");

    let status = StatusRecord::success(
        request.param("output_file").map(str::to_string),
        request.param("session_id").map(str::to_string),
    );
    writer.finish(&status)
}

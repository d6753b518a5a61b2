use anyhow::{bail, Result};
use colored::Colorize;
use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::notify::LogNotifier;
use crate::stream::{timeout_message, StatusRecord, StreamEnd, StreamHandler, StreamMode};

/// Prints streamed text to the terminal as it arrives.
struct ConsoleHandler;

impl StreamHandler for ConsoleHandler {
    fn on_delta(&mut self, _mode: StreamMode, text: &str) {
        print!("{text}");
        let _ = std::io::stdout().flush();
    }

    fn on_success(&mut self, mode: StreamMode, status: &StatusRecord) {
        println!();
        match (mode, status.result_file()) {
            (StreamMode::Review, Some(file)) => {
                println!("{} Result written to {}", "✓".green().bold(), file.cyan())
            }
            _ => println!("{} Done", "✓".green().bold()),
        }
        if let Some(session) = status.session_id() {
            println!("  session: {}", session.dimmed());
        }
    }

    fn on_error(&mut self, _mode: StreamMode, message: &str) {
        println!();
        eprintln!("{} {}", "✗".red().bold(), message);
    }

    fn on_timeout(&mut self, _mode: StreamMode, idle: Duration) {
        println!();
        eprintln!("{} {}", "✗".red().bold(), timeout_message(idle));
    }
}

/// Run one streaming task through the configured worker and print its output.
pub fn execute(config: &Config, params: Vec<(String, String)>, follow_up: bool) -> Result<()> {
    let mode = if follow_up {
        StreamMode::FollowUp
    } else {
        StreamMode::Review
    };

    let mut coordinator = Coordinator::from_config(config, Arc::new(LogNotifier))?;
    let report = coordinator.start_stream(mode, params);
    if !report.success {
        bail!("{}", report.message);
    }

    let interval = config.stream.poll_interval();
    let mut handler = ConsoleHandler;
    let end = loop {
        if let Some(end) = coordinator.tick(&mut handler) {
            break end;
        }
        thread::sleep(interval);
    };

    match end {
        StreamEnd::Succeeded(_) => Ok(()),
        StreamEnd::Failed(message) => bail!("Task failed: {message}"),
        StreamEnd::TimedOut(_) => bail!("Task timed out"),
    }
}

/// Parse `key=value` pairs given with `--param`.
pub fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_param() {
        assert_eq!(
            parse_param("input_file=/tmp/report.txt").unwrap(),
            ("input_file".to_string(), "/tmp/report.txt".to_string())
        );
        assert_eq!(
            parse_param("note=a=b").unwrap(),
            ("note".to_string(), "a=b".to_string())
        );
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=x").is_err());
    }
}

//! User-facing notifications.
//!
//! The GUI host shows toasts; this crate only needs somewhere to send the
//! message. [`DesktopNotifier`] uses notify-send on Linux and osascript on
//! macOS, [`LogNotifier`] only logs, and [`MemoryNotifier`] records what was
//! sent so callers (and tests) can inspect it.

use std::process::Command;
use std::sync::Mutex;

/// Severity of a notification, mapped to urgency where the platform has one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyLevel {
    Info,
    Warning,
    Error,
}

/// Something that can put a short message in front of the operator.
pub trait Notifier: Send + Sync {
    fn notify(&self, level: NotifyLevel, title: &str, body: &str);
}

/// Desktop notification via the platform notification tool.
///
/// Failures are logged but never propagated; notifications are best-effort.
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    app_name: String,
}

impl DesktopNotifier {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
        }
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&self, level: NotifyLevel, title: &str, body: &str) {
        tracing::info!(?level, title, body, "notification");

        let result = if cfg!(target_os = "macos") {
            send_macos_notification(title, body)
        } else {
            send_linux_notification(&self.app_name, level, title, body)
        };

        if let Err(e) = result {
            tracing::warn!(error = %e, "desktop notification failed");
        }
    }
}

fn send_linux_notification(
    app_name: &str,
    level: NotifyLevel,
    title: &str,
    body: &str,
) -> Result<(), String> {
    let urgency = match level {
        NotifyLevel::Info => "low",
        NotifyLevel::Warning => "normal",
        NotifyLevel::Error => "critical",
    };

    Command::new("notify-send")
        .arg(format!("--urgency={urgency}"))
        .arg(format!("--app-name={app_name}"))
        .arg(title)
        .arg(body)
        .output()
        .map_err(|e| format!("notify-send failed: {e}"))
        .and_then(|output| {
            if output.status.success() {
                Ok(())
            } else {
                Err(format!("notify-send exited with: {}", output.status))
            }
        })
}

fn send_macos_notification(title: &str, body: &str) -> Result<(), String> {
    let script = format!(
        r#"display notification "{}" with title "{}""#,
        body.replace('"', r#"\""#),
        title.replace('"', r#"\""#)
    );

    Command::new("osascript")
        .arg("-e")
        .arg(&script)
        .output()
        .map_err(|e| format!("osascript failed: {e}"))
        .and_then(|output| {
            if output.status.success() {
                Ok(())
            } else {
                Err(format!("osascript exited with: {}", output.status))
            }
        })
}

/// Notifier that only writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, level: NotifyLevel, title: &str, body: &str) {
        match level {
            NotifyLevel::Info => tracing::info!(title, body, "notification"),
            NotifyLevel::Warning => tracing::warn!(title, body, "notification"),
            NotifyLevel::Error => tracing::error!(title, body, "notification"),
        }
    }
}

/// A notification captured by [`MemoryNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NotifyLevel,
    pub title: String,
    pub body: String,
}

/// Notifier that keeps every message in memory.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far, oldest first.
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, level: NotifyLevel, title: &str, body: &str) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(Notification {
                level,
                title: title.to_string(),
                body: body.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_notifier_records_in_order() {
        let notifier = MemoryNotifier::new();
        notifier.notify(NotifyLevel::Warning, "Busy", "Please wait");
        notifier.notify(NotifyLevel::Error, "Update failed", "HTTP 500");

        let sent = notifier.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].title, "Busy");
        assert_eq!(sent[1].level, NotifyLevel::Error);
    }
}

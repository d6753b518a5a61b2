//! Completion record written once by the producer.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Contents of the status file.
///
/// `error` set to a non-empty string means the task failed; otherwise the
/// success fields describe what was produced. Fields this crate does not
/// know about are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
    /// Rendered artifact to open on success.
    #[serde(default, alias = "html_file", skip_serializing_if = "Option::is_none")]
    pub result_file: Option<String>,
    /// Conversation that follow-up requests continue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl StatusRecord {
    pub fn success(result_file: Option<String>, session_id: Option<String>) -> Self {
        Self {
            done: true,
            error: None,
            result_file,
            session_id,
            extra: BTreeMap::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            done: true,
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// The error message, if the record describes a failure.
    pub fn error_message(&self) -> Option<&str> {
        self.error
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
    }

    pub fn is_success(&self) -> bool {
        self.error_message().is_none()
    }

    /// Non-empty result file path.
    pub fn result_file(&self) -> Option<&str> {
        self.result_file.as_deref().filter(|f| !f.is_empty())
    }

    /// Non-empty session id.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref().filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_worker_success_record() {
        let json = r#"{"done": true, "error": null, "html_file": "C:\\out\\r.html", "session_id": "abc123"}"#;
        let status: StatusRecord = serde_json::from_str(json).unwrap();

        assert!(status.is_success());
        assert_eq!(status.result_file(), Some("C:\\out\\r.html"));
        assert_eq!(status.session_id(), Some("abc123"));
        assert!(status.extra.is_empty());
    }

    #[test]
    fn test_parse_error_record_with_empty_success_fields() {
        let json = r#"{"done": true, "error": "Config file not found", "html_file": "", "session_id": ""}"#;
        let status: StatusRecord = serde_json::from_str(json).unwrap();

        assert_eq!(status.error_message(), Some("Config file not found"));
        assert!(status.result_file().is_none());
        assert!(status.session_id().is_none());
    }

    #[test]
    fn test_blank_error_counts_as_success() {
        let status: StatusRecord = serde_json::from_str(r#"{"done": true, "error": "  "}"#).unwrap();
        assert!(status.is_success());
    }

    #[test]
    fn test_unknown_fields_preserved() {
        let status: StatusRecord =
            serde_json::from_str(r#"{"done": true, "tokens": 512, "model": "m"}"#).unwrap();
        assert_eq!(status.extra.get("tokens"), Some(&Value::from(512)));

        let round = serde_json::to_value(&status).unwrap();
        assert_eq!(round["model"], "m");
    }

    #[test]
    fn test_failure_serializes_null_free_success_fields() {
        let json = serde_json::to_value(StatusRecord::failure("boom")).unwrap();
        assert_eq!(json["done"], true);
        assert_eq!(json["error"], "boom");
        assert!(json.get("result_file").is_none());
    }
}

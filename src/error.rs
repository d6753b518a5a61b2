//! Error types for operations whose callers branch on the failure kind.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure of an update check, download, verification or install.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// Server kept answering HTTP 429 after every retry.
    #[error("{context}: HTTP 429 - still rate limited after {attempts} attempts")]
    RateLimited { context: String, attempts: u32 },

    /// Any other non-success status.
    #[error("{context}: HTTP {status} - {reason}")]
    Http {
        context: String,
        status: u16,
        reason: String,
    },

    /// The files endpoint does not know this version (HTTP 404).
    /// Usually a development build that was never published.
    #[error("Version {version} is not published on the update server")]
    VersionNotFound { version: String },

    /// Connection, DNS, TLS or timeout failure before a status was received.
    #[error("{context}: {message}")]
    Network { context: String, message: String },

    #[error("Checksum verification failed for {path}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Size verification failed for {path}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        path: String,
        expected: u64,
        actual: u64,
    },

    #[error("{context}: exceeds maximum allowed size of {limit} bytes")]
    TooLarge { context: String, limit: u64 },

    /// Manifest path that would escape the staging or install directory.
    #[error("Rejected manifest path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// Install step refused or could not proceed; nothing further was written.
    #[error("Install failed: {0}")]
    Install(String),

    #[error("Invalid server response: {0}")]
    InvalidResponse(String),

    #[error("Invalid update server URL '{0}'")]
    InvalidUrl(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl UpdateError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// HTTP status associated with the failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RateLimited { .. } => Some(429),
            Self::Http { status, .. } => Some(*status),
            Self::VersionNotFound { .. } => Some(404),
            _ => None,
        }
    }

    /// Whether the failure means the staged batch must be discarded
    /// because its content cannot be trusted.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            Self::IntegrityMismatch { .. } | Self::SizeMismatch { .. }
        )
    }
}

/// Failure to take the cross-process service lock.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Service already running (PID {pid})")]
    AlreadyRunning { pid: u32 },

    #[error("Lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_surface() {
        let err = UpdateError::Http {
            context: "Download failed".into(),
            status: 503,
            reason: "Service Unavailable".into(),
        };
        assert_eq!(err.status(), Some(503));
        assert_eq!(err.to_string(), "Download failed: HTTP 503 - Service Unavailable");

        let err = UpdateError::RateLimited {
            context: "Download failed".into(),
            attempts: 4,
        };
        assert_eq!(err.status(), Some(429));
        assert!(UpdateError::InvalidResponse("x".into()).status().is_none());
    }

    #[test]
    fn test_integrity_classification() {
        let err = UpdateError::IntegrityMismatch {
            path: "lib/a.txt".into(),
            expected: "aa".into(),
            actual: "bb".into(),
        };
        assert!(err.is_integrity_failure());
        assert!(!UpdateError::VersionNotFound {
            version: "1.0".into()
        }
        .is_integrity_failure());
    }
}

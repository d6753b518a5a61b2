//! Dotted-integer version comparison.
//!
//! Versions are compared component by component as integers, so `1.2.10`
//! is newer than `1.2.3`, and missing trailing components count as zero, so
//! `1.2` equals `1.2.0`. A leading `v` is ignored. A component that does not
//! start with a digit counts as zero; trailing text after the digits (as in
//! `3-beta`) is ignored.

use serde::Serialize;
use std::cmp::Ordering;

use super::manifest::ReleaseInfo;

/// Compare two version strings.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let a = components(a);
    let b = components(b);
    let len = a.len().max(b.len());

    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

fn components(version: &str) -> Vec<u64> {
    let trimmed = version.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Vec::new();
    }

    trimmed
        .split('.')
        .map(|part| {
            let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<u64>().unwrap_or(0)
        })
        .collect()
}

/// How the server's latest version relates to the installed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    /// Server has a newer version.
    UpdateAvailable,
    UpToDate,
    /// Installed version is newer than anything published (development build).
    AheadOfServer,
}

/// `latest.cmp(current)` → status.
impl From<Ordering> for VersionStatus {
    fn from(latest_vs_current: Ordering) -> Self {
        match latest_vs_current {
            Ordering::Greater => VersionStatus::UpdateAvailable,
            Ordering::Equal => VersionStatus::UpToDate,
            Ordering::Less => VersionStatus::AheadOfServer,
        }
    }
}

/// Result of asking the server for its latest version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateCheck {
    pub current_version: String,
    pub latest_version: String,
    pub status: VersionStatus,
    pub release: ReleaseInfo,
}

impl UpdateCheck {
    pub fn update_available(&self) -> bool {
        self.status == VersionStatus::UpdateAvailable
    }

    /// One-line description for the operator.
    pub fn summary(&self) -> String {
        match self.status {
            VersionStatus::UpdateAvailable => format!(
                "Update available: {} → {}",
                self.current_version, self.latest_version
            ),
            VersionStatus::UpToDate => {
                format!("You're running the latest version ({})", self.current_version)
            }
            VersionStatus::AheadOfServer => format!(
                "Development build {} is ahead of the server ({})",
                self.current_version, self.latest_version
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_not_lexical() {
        assert_eq!(compare_versions("1.2.3", "1.2.10"), Ordering::Less);
        assert_eq!(compare_versions("1.2.10", "1.2.3"), Ordering::Greater);
    }

    #[test]
    fn test_missing_components_are_zero() {
        assert_eq!(compare_versions("1.2", "1.2.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.2.0.0", "1.2"), Ordering::Equal);
        assert_eq!(compare_versions("1.2.0.1", "1.2"), Ordering::Greater);
    }

    #[test]
    fn test_major_dominates() {
        assert_eq!(compare_versions("2.0.0", "1.9.9"), Ordering::Greater);
    }

    #[test]
    fn test_prefix_and_suffix_tolerated() {
        assert_eq!(compare_versions("v0.30.2", "0.30.2"), Ordering::Equal);
        assert_eq!(compare_versions("1.0.3-beta", "1.0.3"), Ordering::Equal);
        assert_eq!(compare_versions(" 1.1 ", "1.0.9"), Ordering::Greater);
        assert_eq!(compare_versions("", "0.0"), Ordering::Equal);
    }

    #[test]
    fn test_status_from_ordering() {
        assert_eq!(
            VersionStatus::from(compare_versions("0.31.0", "0.30.2")),
            VersionStatus::UpdateAvailable
        );
        assert_eq!(
            VersionStatus::from(compare_versions("0.30.2", "0.31.0")),
            VersionStatus::AheadOfServer
        );
        assert_eq!(
            VersionStatus::from(compare_versions("0.30", "0.30.0")),
            VersionStatus::UpToDate
        );
    }
}

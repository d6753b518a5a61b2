//! Wire types of the update server.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// `GET /api/versions/{app}`
#[derive(Debug, Clone, Deserialize)]
pub struct VersionResponse {
    pub latest_version: String,
    #[serde(default)]
    pub version_info: ReleaseInfo,
}

/// Metadata about the latest release, shown to the operator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    #[serde(default)]
    pub sha256: String,
    #[serde(default)]
    pub release_notes: String,
    #[serde(default)]
    pub release_date: String,
    #[serde(default)]
    pub filename: String,
}

/// `GET /api/files/{app}/{version}`
#[derive(Debug, Clone, Deserialize)]
pub struct FilesResponse {
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

/// One file of a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub filename: String,
    /// Location inside the install tree. Either the full relative path
    /// (ending in `filename`), the containing directory, or empty for the root.
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub size: u64,
    pub sha256: String,
}

impl FileEntry {
    /// Relative path of the file inside the install tree, `/`-separated.
    pub fn relative_path(&self) -> String {
        let path = self.path.replace('\\', "/");
        let path = path.trim_matches('/');
        if path.is_empty() {
            return self.filename.clone();
        }
        let ends_with_name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy() == self.filename.as_str())
            .unwrap_or(false);
        if ends_with_name {
            path.to_string()
        } else {
            format!("{path}/{}", self.filename)
        }
    }
}

/// Latest version together with its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseManifest {
    pub latest_version: String,
    pub files: Vec<FileEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(filename: &str, path: &str) -> FileEntry {
        FileEntry {
            filename: filename.to_string(),
            path: path.to_string(),
            size: 0,
            sha256: String::new(),
        }
    }

    #[test]
    fn test_relative_path_forms() {
        assert_eq!(entry("app.exe", "").relative_path(), "app.exe");
        assert_eq!(entry("util.py", "lib/util.py").relative_path(), "lib/util.py");
        assert_eq!(entry("util.py", "lib").relative_path(), "lib/util.py");
        assert_eq!(entry("util.py", "lib/").relative_path(), "lib/util.py");
        assert_eq!(entry("a.txt", "lib\\prompts\\a.txt").relative_path(), "lib/prompts/a.txt");
    }

    #[test]
    fn test_parse_server_payloads() {
        let version: VersionResponse = serde_json::from_str(
            r#"{"latest_version": "0.31.0", "version_info": {"sha256": "ab", "release_notes": "Fixes", "release_date": "2026-10-01", "filename": "tether.zip"}}"#,
        )
        .unwrap();
        assert_eq!(version.latest_version, "0.31.0");
        assert_eq!(version.version_info.release_notes, "Fixes");

        let bare: VersionResponse = serde_json::from_str(r#"{"latest_version": "1"}"#).unwrap();
        assert_eq!(bare.version_info, ReleaseInfo::default());

        let files: FilesResponse = serde_json::from_str(
            r#"{"files": [{"filename": "a.txt", "path": "lib/a.txt", "size": 3, "sha256": "ABC"}]}"#,
        )
        .unwrap();
        assert_eq!(files.files.len(), 1);
        assert_eq!(files.files[0].size, 3);
    }
}

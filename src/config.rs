//! Configuration loaded from `config.toml`.
//!
//! Every field has a default, so a missing file or a partial file is valid.
//! The API key may be supplied through `TETHER_API_KEY` instead of the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides `server.api_key`.
pub const API_KEY_ENV: &str = "TETHER_API_KEY";

const APP_DIR_NAME: &str = "tether";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub update: UpdateConfig,
    pub stream: StreamConfig,
    pub guard: GuardConfig,
    pub heartbeat: HeartbeatConfig,
    pub settings: Settings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Root of the update server, e.g. `https://updates.example.com`.
    pub base_url: String,
    /// Application name used in every endpoint path.
    pub app: String,
    pub api_key: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://updates.example.com".to_string(),
            app: APP_DIR_NAME.to_string(),
            api_key: String::new(),
        }
    }
}

/// Per-phase HTTP timeouts in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpTimeouts {
    pub resolve_secs: u64,
    pub connect_secs: u64,
    pub send_secs: u64,
    pub receive_secs: u64,
}

impl HttpTimeouts {
    /// Timeouts for small JSON metadata requests.
    pub const METADATA: HttpTimeouts = HttpTimeouts {
        resolve_secs: 15,
        connect_secs: 15,
        send_secs: 20,
        receive_secs: 30,
    };

    /// Timeouts for binary file downloads.
    pub const DOWNLOAD: HttpTimeouts = HttpTimeouts {
        resolve_secs: 15,
        connect_secs: 15,
        send_secs: 30,
        receive_secs: 30,
    };

    /// Bound on name resolution plus TCP/TLS connect.
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.resolve_secs + self.connect_secs)
    }

    /// Bound on the whole request.
    pub fn total(&self) -> Duration {
        Duration::from_secs(
            self.resolve_secs + self.connect_secs + self.send_secs + self.receive_secs,
        )
    }
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self::METADATA
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Installation root. Defaults to the directory of the running executable.
    pub install_dir: Option<PathBuf>,
    /// Version of the installed files. Defaults to the crate version.
    pub current_version: Option<String>,
    /// File name of the main entry point inside `install_dir`.
    pub entry_point: String,
    /// Library directory inside `install_dir`, backed up with the entry point.
    pub library_dir: String,
    /// Directory inside `install_dir` that receives timestamped backups.
    pub backup_dir: String,
    /// Glob patterns (relative to `install_dir`) of superseded artifacts.
    pub stale_patterns: Vec<String>,
    /// Glob patterns (relative to `install_dir`) of launcher shortcuts.
    pub shortcut_patterns: Vec<String>,
    /// File-name patterns of user-editable files that are never overwritten.
    pub user_content_patterns: Vec<String>,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub inter_file_delay_ms: u64,
    pub max_file_size_mb: u64,
    pub metadata_timeouts: HttpTimeouts,
    pub download_timeouts: HttpTimeouts,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            install_dir: None,
            current_version: None,
            entry_point: APP_DIR_NAME.to_string(),
            library_dir: "lib".to_string(),
            backup_dir: "backups".to_string(),
            stale_patterns: vec!["*.old".to_string(), "*.bak".to_string()],
            shortcut_patterns: vec!["*.lnk".to_string(), "*.desktop".to_string()],
            user_content_patterns: vec!["*prompt*.txt".to_string(), "*template*.txt".to_string()],
            max_retries: 3,
            initial_backoff_ms: 1000,
            inter_file_delay_ms: 50,
            max_file_size_mb: 50,
            metadata_timeouts: HttpTimeouts::METADATA,
            download_timeouts: HttpTimeouts::DOWNLOAD,
        }
    }
}

impl UpdateConfig {
    pub fn install_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.install_dir {
            return Ok(dir.clone());
        }
        let exe = env::current_exe().context("Failed to get current executable path")?;
        exe.parent()
            .map(Path::to_path_buf)
            .context("Executable has no parent directory")
    }

    pub fn current_version(&self) -> &str {
        self.current_version
            .as_deref()
            .unwrap_or(crate::CURRENT_VERSION)
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub poll_interval_ms: u64,
    /// Silence after the last received content before the task times out.
    pub timeout_secs: u64,
    /// Subdirectory of the system temp dir holding channel and request files.
    pub temp_subdir: String,
    /// Worker executable; resolved on `PATH` when not a path.
    pub worker_program: String,
    /// Arguments placed before the request file path.
    pub worker_args: Vec<String>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            timeout_secs: 120,
            temp_subdir: APP_DIR_NAME.to_string(),
            worker_program: String::new(),
            worker_args: Vec::new(),
        }
    }
}

impl StreamConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn stream_dir(&self) -> PathBuf {
        env::temp_dir().join(&self.temp_subdir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub min_interval_ms: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_secs: u64,
    pub stale_secs: u64,
    /// How long a service waits for a heartbeat file to appear at all.
    pub missing_grace_secs: u64,
    /// Development state directory, relative to `install_dir`.
    pub dev_state_dir: Option<PathBuf>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            stale_secs: 30,
            missing_grace_secs: 120,
            dev_state_dir: Some(PathBuf::from("../service/data")),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub debug_logging: bool,
}

impl Config {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match default_config_path() {
                Some(p) => p,
                None => return Ok(Self::default().with_env_overrides()),
            },
        };

        if !path.exists() {
            return Ok(Self::default().with_env_overrides());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Parse TOML content and apply environment overrides.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Invalid configuration")?;
        Ok(config.with_env_overrides())
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.server.api_key = key.trim().to_string();
            }
        }
        self
    }

    /// Directory for logs and the service lock when no state dir is given.
    pub fn data_dir(&self) -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(env::temp_dir)
            .join(APP_DIR_NAME)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir().join("logs")
    }
}

/// `<config_dir>/tether/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_empty_config_uses_defaults() {
        env::remove_var(API_KEY_ENV);
        let config = Config::parse("").unwrap();

        assert_eq!(config.stream.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.stream.timeout(), Duration::from_secs(120));
        assert_eq!(config.guard.min_interval_ms, 2000);
        assert_eq!(config.update.max_retries, 3);
        assert_eq!(config.update.initial_backoff_ms, 1000);
        assert_eq!(config.update.inter_file_delay_ms, 50);
        assert_eq!(config.heartbeat.interval_secs, 10);
        assert_eq!(config.heartbeat.stale_secs, 30);
        assert_eq!(config.update.metadata_timeouts, HttpTimeouts::METADATA);
        assert!(config.server.api_key.is_empty());
    }

    #[test]
    #[serial]
    fn test_partial_config_overrides_fields() {
        env::remove_var(API_KEY_ENV);
        let config = Config::parse(
            r#"
            [server]
            base_url = "https://example.test"
            app = "report-check"
            api_key = "file-key"

            [update]
            entry_point = "report-check.exe"
            user_content_patterns = ["prompts/*.txt"]

            [update.download_timeouts]
            receive_secs = 90

            [stream]
            worker_program = "python3"
            worker_args = ["backend.py"]
            "#,
        )
        .unwrap();

        assert_eq!(config.server.app, "report-check");
        assert_eq!(config.server.api_key, "file-key");
        assert_eq!(config.update.entry_point, "report-check.exe");
        assert_eq!(config.update.library_dir, "lib");
        assert_eq!(config.update.user_content_patterns, vec!["prompts/*.txt"]);
        assert_eq!(config.update.download_timeouts.receive_secs, 90);
        assert_eq!(config.update.download_timeouts.connect_secs, 15);
        assert_eq!(config.stream.worker_args, vec!["backend.py"]);
    }

    #[test]
    #[serial]
    fn test_env_api_key_overrides_file() {
        env::set_var(API_KEY_ENV, "  env-key  ");
        let config = Config::parse("[server]\napi_key = \"file-key\"\n").unwrap();
        env::remove_var(API_KEY_ENV);

        assert_eq!(config.server.api_key, "env-key");
    }

    #[test]
    #[serial]
    fn test_load_missing_file_is_default() {
        env::remove_var(API_KEY_ENV);
        let temp = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&temp.path().join("nope.toml"))).unwrap();
        assert_eq!(config.update.entry_point, "tether");
    }

    #[test]
    fn test_invalid_toml_is_error() {
        assert!(Config::parse("[server\nbase_url = 1").is_err());
    }

    #[test]
    fn test_timeouts_compose() {
        let t = HttpTimeouts::METADATA;
        assert_eq!(t.connect(), Duration::from_secs(30));
        assert_eq!(t.total(), Duration::from_secs(80));
    }

    #[test]
    fn test_explicit_install_dir_and_version() {
        let update = UpdateConfig {
            install_dir: Some(PathBuf::from("/opt/tether")),
            current_version: Some("0.30.2".to_string()),
            ..UpdateConfig::default()
        };
        assert_eq!(update.install_dir().unwrap(), PathBuf::from("/opt/tether"));
        assert_eq!(update.current_version(), "0.30.2");
        assert_eq!(update.max_file_size(), 50 * 1024 * 1024);
    }
}

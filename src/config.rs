//! Configuration loader and validator for the staffdesk client.
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub api: Api,
    pub session: Session,
    pub lists: Lists,
    pub attendance: Attendance,
}

/// REST service settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Api {
    pub base_url: String,
    pub language: String,
    pub timeout_secs: u64,
}

/// Where the session token is persisted between runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub token_file: String,
}

/// Page sizes for list resources, keyed by resource name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Lists {
    pub default_page_size: u32,
    #[serde(default)]
    pub page_sizes: BTreeMap<String, u32>,
}

/// Attendance timers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attendance {
    pub poll_interval_secs: u64,
    pub tick_interval_ms: u64,
    pub bias_window_ms: u64,
    pub geolocation_timeout_secs: u64,
}

impl Config {
    /// Ensure the directory holding the token file exists.
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        match self.token_path().parent() {
            Some(dir) if !dir.as_os_str().is_empty() => fs::create_dir_all(dir),
            _ => Ok(()),
        }
    }

    pub fn token_path(&self) -> PathBuf {
        PathBuf::from(&self.session.token_file)
    }

    /// Base URL with a guaranteed trailing slash so relative joins keep any path prefix.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let mut raw = self.api.base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Url::parse(&raw).map_err(|_| ConfigError::Invalid("api.base_url must be a valid URL"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }

    pub fn page_size_for(&self, resource: &str) -> u32 {
        self.lists
            .page_sizes
            .get(resource)
            .copied()
            .unwrap_or(self.lists.default_page_size)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.attendance.poll_interval_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.attendance.tick_interval_ms)
    }

    pub fn bias_window(&self) -> Duration {
        Duration::from_millis(self.attendance.bias_window_ms)
    }

    pub fn geolocation_timeout(&self) -> Duration {
        Duration::from_secs(self.attendance.geolocation_timeout_secs)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.api.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("api.base_url must be non-empty"));
    }
    cfg.base_url()?;
    if cfg.api.language.trim().is_empty() {
        return Err(ConfigError::Invalid("api.language must be non-empty"));
    }
    if cfg.api.timeout_secs == 0 {
        return Err(ConfigError::Invalid("api.timeout_secs must be > 0"));
    }

    if cfg.session.token_file.trim().is_empty() {
        return Err(ConfigError::Invalid("session.token_file must be non-empty"));
    }

    if cfg.lists.default_page_size == 0 {
        return Err(ConfigError::Invalid("lists.default_page_size must be > 0"));
    }
    if cfg.lists.page_sizes.values().any(|size| *size == 0) {
        return Err(ConfigError::Invalid("lists.page_sizes entries must be > 0"));
    }

    let att = &cfg.attendance;
    if att.poll_interval_secs == 0 {
        return Err(ConfigError::Invalid("attendance.poll_interval_secs must be > 0"));
    }
    if att.tick_interval_ms == 0 {
        return Err(ConfigError::Invalid("attendance.tick_interval_ms must be > 0"));
    }
    if att.geolocation_timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "attendance.geolocation_timeout_secs must be > 0",
        ));
    }
    // bias_window_ms may be 0, which disables the local bias entirely

    Ok(())
}

/// Returns the example YAML printed by `staffdesk init-config`.
pub fn example() -> &'static str {
    r#"api:
  base_url: "http://127.0.0.1:8000/"
  language: "ru"
  timeout_secs: 15

session:
  token_file: "./data/token"

lists:
  default_page_size: 20
  page_sizes:
    departments: 10
    requests: 10

attendance:
  poll_interval_secs: 30
  tick_interval_ms: 1000
  bias_window_ms: 1500
  geolocation_timeout_secs: 5
"#
}

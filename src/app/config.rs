use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::app::error::AppError;

pub const DEFAULT_POOL_SIZE: usize = 1;
pub const MAX_POOL_SIZE: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConsoleSettings {
    pub prompt: String,
    /// Depth at which a command list fans out into parallel branches; 0 disables.
    pub parallel_depth: usize,
    pub command_timeout_secs: u64,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            prompt: "HC> ".to_string(),
            parallel_depth: 1,
            command_timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JobPoolSettings {
    pub pool_size: usize,
    pub hostname: String,
    pub exclusive_lease: bool,
}

impl Default for JobPoolSettings {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            hostname: String::new(),
            exclusive_lease: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VtiSettings {
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for VtiSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceSettings {
    pub adb_path: String,
    pub lock_dir: String,
    pub use_lock_files: bool,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            adb_path: String::new(),
            lock_dir: String::new(),
            use_lock_files: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    pub log_level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathSettings {
    pub tmp_root: String,
    pub version_file: String,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            tmp_root: "tmp".to_string(),
            version_file: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub console: ConsoleSettings,
    #[serde(default)]
    pub job_pool: JobPoolSettings,
    #[serde(default)]
    pub vti: VtiSettings,
    #[serde(default)]
    pub device: DeviceSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub paths: PathSettings,
}

impl AppConfig {
    pub fn tmp_root(&self) -> PathBuf {
        PathBuf::from(&self.paths.tmp_root)
    }

    pub fn lock_dir(&self) -> PathBuf {
        if self.device.lock_dir.trim().is_empty() {
            self.tmp_root().join("locks")
        } else {
            PathBuf::from(self.device.lock_dir.trim())
        }
    }

    pub fn hostname(&self) -> String {
        let configured = self.job_pool.hostname.trim();
        if !configured.is_empty() {
            return configured.to_string();
        }
        std::env::var("HOSTNAME")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| "localhost".to_string())
    }
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("HOST_CONTROLLER_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".host_controller_config.json")
}

pub fn load_config() -> Result<AppConfig, AppError> {
    load_config_from_path(&config_path())
}

pub fn load_config_from_path(path: &Path) -> Result<AppConfig, AppError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::system(format!("Failed to read config: {err}"), ""))?;
    let config: AppConfig = serde_json::from_str(&raw)
        .map_err(|err| AppError::validation(format!("Failed to parse config: {err}"), ""))?;
    Ok(validate_config(config))
}

pub fn validate_config(mut config: AppConfig) -> AppConfig {
    if config.job_pool.pool_size == 0 {
        config.job_pool.pool_size = DEFAULT_POOL_SIZE;
    }
    if config.job_pool.pool_size > MAX_POOL_SIZE {
        config.job_pool.pool_size = MAX_POOL_SIZE;
    }
    if config.console.command_timeout_secs == 0 {
        config.console.command_timeout_secs = 600;
    }
    if config.vti.timeout_secs == 0 {
        config.vti.timeout_secs = 30;
    }
    if config.paths.tmp_root.trim().is_empty() {
        config.paths.tmp_root = "tmp".to_string();
    }
    if !matches!(
        config.logging.log_level.to_ascii_uppercase().as_str(),
        "TRACE" | "DEBUG" | "INFO" | "WARN" | "ERROR"
    ) {
        config.logging.log_level = "INFO".to_string();
    }
    config.vti.endpoint = config.vti.endpoint.trim().trim_end_matches('/').to_string();
    config
}

/// Reads the first non-empty line of the version file; empty when unset or unreadable.
pub fn read_version(path: &str) -> String {
    if path.trim().is_empty() {
        return String::new();
    }
    fs::read_to_string(path.trim())
        .ok()
        .and_then(|raw| {
            raw.lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_default()
}
